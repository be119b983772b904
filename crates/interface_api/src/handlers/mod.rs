//! Request handlers

pub mod attachments;
pub mod health;
pub mod metrics;
pub mod submissions;

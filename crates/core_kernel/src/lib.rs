//! Core Kernel - Foundational types for the claim submission pipeline
//!
//! This crate provides the building blocks shared by every other crate:
//! - Strongly-typed identifiers for submissions, jobs and batches
//! - The `PortError` type every adapter reports failures with

pub mod identifiers;
pub mod ports;

pub use identifiers::{SubmissionId, JobId, BatchId, UserId, SavedClaimId};
pub use ports::{PortError, DomainPort};

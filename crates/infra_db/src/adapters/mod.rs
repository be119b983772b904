//! Domain Adapters
//!
//! This module provides adapter implementations for the submission ports
//! and the durable job queue, connecting them to the PostgreSQL database
//! layer.
//!
//! # Architecture
//!
//! Each adapter:
//! - Implements one storage port of `domain_submission`
//! - Translates between domain models and database row types
//! - Uses the repository layer for database operations

pub mod job_queue;
pub mod submission;

pub use job_queue::{PostgresJobQueue, DEFAULT_VISIBILITY_TIMEOUT};
pub use submission::{
    PostgresAttachmentAdapter, PostgresBatchAdapter, PostgresJobStatusAdapter, PostgresSubmissionAdapter,
};

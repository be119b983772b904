//! Repository implementations for the pipeline tables
//!
//! Repositories encapsulate SQL and work on plain row types; the adapters in
//! [`crate::adapters`] map rows to domain types.
//!
//! Queries are built at runtime with `sqlx::query` / `sqlx::query_as` so the
//! crate compiles without a live database.

pub mod attachments;
pub mod batches;
pub mod job_queue;
pub mod job_statuses;
pub mod submissions;

pub use attachments::AttachmentRepository;
pub use batches::{BatchMemberRow, BatchProgressRow, BatchRepository};
pub use job_queue::{JobQueueRepository, QueuedJob};
pub use job_statuses::{JobStatusRepository, JobStatusRow, NewJobStatus};
pub use submissions::{SubmissionRepository, SubmissionRow};

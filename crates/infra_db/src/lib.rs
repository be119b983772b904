//! Infrastructure Database Layer
//!
//! This crate provides PostgreSQL persistence for the claim submission
//! pipeline using SQLx: submissions, job statuses, ancillary batches,
//! uploaded attachments and the durable job queue.
//!
//! # Architecture
//!
//! The crate follows the repository pattern. Repositories own the SQL and
//! work on row types; adapters implement the domain ports on top of them and
//! translate every failure into a `PortError`.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig};
//! use infra_db::adapters::PostgresSubmissionAdapter;
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/submissions")).await?;
//! run_migrations(&pool).await?;
//! let submissions = PostgresSubmissionAdapter::new(pool);
//! ```

pub mod adapters;
pub mod error;
pub mod pool;
pub mod repositories;

pub use adapters::{
    PostgresAttachmentAdapter, PostgresBatchAdapter, PostgresJobQueue, PostgresJobStatusAdapter,
    PostgresSubmissionAdapter, DEFAULT_VISIBILITY_TIMEOUT,
};
pub use error::DatabaseError;
pub use pool::{create_pool, run_migrations, DatabaseConfig};

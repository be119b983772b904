//! Port adapters that live with the domain
//!
//! PostgreSQL adapters are in `infra_db`.

pub mod claims_api;
pub mod memory;

pub use claims_api::{ClaimsApiConfig, HttpClaimsBackend};
pub use memory::{
    InMemoryAttachmentStore, InMemoryBatchStore, InMemoryJobStatusStore, InMemorySubmissionStore,
};

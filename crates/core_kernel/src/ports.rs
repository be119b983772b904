//! Ports and Adapters Infrastructure
//!
//! The pipeline is written against port traits (submission store, job status
//! tracker, batch store, claims backend, job queue). Each port is implemented by
//! one or more adapters: PostgreSQL in `infra_db`, the HTTP claims backend and
//! the in-memory stores in `domain_submission`.
//!
//! ```text
//!   JobRunner / BatchCoordinator / SubmissionService
//!                        │
//!                        ▼
//!        SubmissionPort, JobStatusPort, BatchPort, ...
//!              ▲                          ▲
//!   ┌──────────┴─────────┐      ┌─────────┴──────────┐
//!   │ PostgreSQL adapter │      │ in-memory adapter  │
//!   └────────────────────┘      └────────────────────┘
//! ```
//!
//! Every adapter reports failures as [`PortError`], so the domain layer never
//! sees a driver-specific error type.

use std::fmt;
use thiserror::Error;

/// Error type for port operations
#[derive(Debug, Error)]
pub enum PortError {
    /// The requested entity was not found
    #[error("Not found: {entity_type} with id {id}")]
    NotFound {
        entity_type: String,
        id: String,
    },

    /// Data handed to or read from the adapter is invalid
    #[error("Validation error: {message}")]
    Validation {
        message: String,
    },

    /// The operation conflicts with existing data
    #[error("Conflict: {message}")]
    Conflict {
        message: String,
    },

    /// Connection to the underlying system failed
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The operation timed out
    #[error("Timeout after {duration_ms}ms: {operation}")]
    Timeout {
        operation: String,
        duration_ms: u64,
    },

    /// An internal error occurred
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl PortError {
    pub fn not_found(entity_type: impl Into<String>, id: impl fmt::Display) -> Self {
        PortError::NotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        PortError::Validation {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        PortError::Conflict {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        PortError::Connection {
            message: message.into(),
            source: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        PortError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps a lower-level error as an internal failure, keeping it as the source
    pub fn internal_from(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        PortError::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns true if this error indicates a transient failure that may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, PortError::Connection { .. } | PortError::Timeout { .. })
    }

    /// Returns true if this error indicates the entity was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, PortError::NotFound { .. })
    }
}

/// Marker trait for all domain ports
///
/// Ports are shared between worker tasks behind `Arc<dyn ...>`, so every
/// implementation must be thread-safe.
pub trait DomainPort: Send + Sync + 'static {}

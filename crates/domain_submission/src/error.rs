//! Submission domain errors

use thiserror::Error;

use core_kernel::{JobId, PortError, SubmissionId};

use crate::job::JobState;
use crate::submission::BackendClaimId;

/// Errors that can occur in the submission domain
///
/// Backend failures are not errors here: they are classified and recorded on
/// the job status. These variants cover storage and invariant violations.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Submission not found: {0}")]
    SubmissionNotFound(SubmissionId),

    #[error("Job status not found: {0}")]
    JobNotFound(JobId),

    #[error("Submission {submission_id} already has backend claim id {existing}, refusing {attempted}")]
    ConflictingClaimId {
        submission_id: SubmissionId,
        existing: BackendClaimId,
        attempted: BackendClaimId,
    },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: JobState, to: JobState },

    #[error("Unknown {field} value: {value}")]
    UnknownValue { field: &'static str, value: String },

    #[error("Storage error: {0}")]
    Port(#[from] PortError),
}

impl SubmissionError {
    /// Returns true if re-running the same job attempt may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            SubmissionError::Port(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns true if the worker should deliver the same envelope again
    ///
    /// Storage failures qualify; missing rows and rejected writes do not.
    pub fn is_redeliverable(&self) -> bool {
        match self {
            SubmissionError::Port(e) => !matches!(
                e,
                PortError::NotFound { .. } | PortError::Validation { .. } | PortError::Conflict { .. }
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_failures_are_redelivered() {
        let err = SubmissionError::from(PortError::connection("pool closed"));
        assert!(err.is_transient());
        assert!(err.is_redeliverable());

        let err = SubmissionError::from(PortError::internal("deadlock detected"));
        assert!(!err.is_transient());
        assert!(err.is_redeliverable());
    }

    #[test]
    fn test_domain_errors_are_not_redelivered() {
        let err = SubmissionError::SubmissionNotFound(SubmissionId::new());
        assert!(!err.is_redeliverable());

        let err = SubmissionError::from(PortError::conflict("claim id already set"));
        assert!(!err.is_redeliverable());
    }
}

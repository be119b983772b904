//! Queued units of work and their tracked status
//!
//! # Job state machine
//!
//! ```text
//! Queued -> Trying -> Success
//!             |  ^ -> NonRetryableError
//!             v  |  -> Exhausted
//!           Retrying
//! ```
//!
//! `Success`, `NonRetryableError` and `Exhausted` are terminal.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{BatchId, JobId, SubmissionId};

use crate::error::SubmissionError;
use crate::payload::{AuthContext, UploadDescriptor};
use crate::submission::BackendClaimId;

/// Which dependent sub-form an ancillary job submits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AncillaryForm {
    A,
    B,
}

/// Closed set of job classes; persisted as the JobStatus `job_class`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Primary,
    Upload,
    AncillaryFormA,
    AncillaryFormB,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Primary => "submit_claim",
            JobKind::Upload => "submit_upload",
            JobKind::AncillaryFormA => "submit_ancillary_form_a",
            JobKind::AncillaryFormB => "submit_ancillary_form_b",
        }
    }

    pub fn is_ancillary(&self) -> bool {
        !matches!(self, JobKind::Primary)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = SubmissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submit_claim" => Ok(JobKind::Primary),
            "submit_upload" => Ok(JobKind::Upload),
            "submit_ancillary_form_a" => Ok(JobKind::AncillaryFormA),
            "submit_ancillary_form_b" => Ok(JobKind::AncillaryFormB),
            other => Err(SubmissionError::UnknownValue {
                field: "job_class",
                value: other.to_string(),
            }),
        }
    }
}

/// What a job does, with the variant-specific data it needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", content = "data", rename_all = "snake_case")]
pub enum JobTask {
    /// Submit the core claim form
    Primary,
    /// Upload one supporting-evidence file
    Upload(UploadDescriptor),
    /// Submit one dependent sub-form
    AncillaryForm(AncillaryForm),
}

impl JobTask {
    pub fn kind(&self) -> JobKind {
        match self {
            JobTask::Primary => JobKind::Primary,
            JobTask::Upload(_) => JobKind::Upload,
            JobTask::AncillaryForm(AncillaryForm::A) => JobKind::AncillaryFormA,
            JobTask::AncillaryForm(AncillaryForm::B) => JobKind::AncillaryFormB,
        }
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Enqueued, not yet attempted; never persisted
    Queued,
    #[serde(rename = "try")]
    Trying,
    Retrying,
    Success,
    NonRetryableError,
    Exhausted,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Trying => "try",
            JobState::Retrying => "retrying",
            JobState::Success => "success",
            JobState::NonRetryableError => "non_retryable_error",
            JobState::Exhausted => "exhausted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Success | JobState::NonRetryableError | JobState::Exhausted
        )
    }

    /// Checks a transition against the state machine
    ///
    /// `Trying -> Trying` is allowed: at-least-once delivery may run the same
    /// attempt twice.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, target),
            (Queued, Trying)
                | (Retrying, Trying)
                | (Trying, Trying)
                | (Trying, Success)
                | (Trying, Retrying)
                | (Trying, NonRetryableError)
                | (Trying, Exhausted)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = SubmissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "try" => Ok(JobState::Trying),
            "retrying" => Ok(JobState::Retrying),
            "success" => Ok(JobState::Success),
            "non_retryable_error" => Ok(JobState::NonRetryableError),
            "exhausted" => Ok(JobState::Exhausted),
            other => Err(SubmissionError::UnknownValue {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// The persisted status row of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub submission_id: SubmissionId,
    pub job_id: JobId,
    pub job_class: JobKind,
    pub status: JobState,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One status write, applied as an upsert keyed by `job_id`
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatusUpdate {
    pub submission_id: SubmissionId,
    pub job_id: JobId,
    pub job_class: JobKind,
    pub status: JobState,
    pub error_message: Option<String>,
}

impl JobStatusUpdate {
    pub fn new(envelope: &JobEnvelope, status: JobState) -> Self {
        Self {
            submission_id: envelope.submission_id,
            job_id: envelope.job_id,
            job_class: envelope.kind(),
            status,
            error_message: None,
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// A scheduled unit of work as it travels through the queue
///
/// `attempt` counts from zero; a retry re-enqueues the same envelope with the
/// same `job_id` and `attempt + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub job_id: JobId,
    pub submission_id: SubmissionId,
    pub task: JobTask,
    pub auth_context: AuthContext,
    pub attempt: u32,
    /// Batch the job belongs to; `None` for the primary job
    pub batch_id: Option<BatchId>,
    /// Claim id ancillary jobs attach their documents to
    pub backend_claim_id: Option<BackendClaimId>,
}

impl JobEnvelope {
    /// Creates the primary submission job for a submission
    pub fn primary(submission_id: SubmissionId, auth_context: AuthContext) -> Self {
        Self {
            job_id: JobId::new(),
            submission_id,
            task: JobTask::Primary,
            auth_context,
            attempt: 0,
            batch_id: None,
            backend_claim_id: None,
        }
    }

    /// Creates the first attempt of batch member `job_id`
    pub fn ancillary(
        job_id: JobId,
        submission_id: SubmissionId,
        task: JobTask,
        auth_context: AuthContext,
        batch_id: BatchId,
        backend_claim_id: BackendClaimId,
    ) -> Self {
        Self {
            job_id,
            submission_id,
            task,
            auth_context,
            attempt: 0,
            batch_id: Some(batch_id),
            backend_claim_id: Some(backend_claim_id),
        }
    }

    pub fn kind(&self) -> JobKind {
        self.task.kind()
    }

    /// The same job, one attempt later
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Success.is_terminal());
        assert!(JobState::NonRetryableError.is_terminal());
        assert!(JobState::Exhausted.is_terminal());
        assert!(!JobState::Trying.is_terminal());
        assert!(!JobState::Retrying.is_terminal());
        assert!(!JobState::Queued.is_terminal());
    }

    #[test]
    fn test_terminal_states_have_no_outgoing_transitions() {
        let all = [
            JobState::Queued,
            JobState::Trying,
            JobState::Retrying,
            JobState::Success,
            JobState::NonRetryableError,
            JobState::Exhausted,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_retrying_goes_back_to_trying() {
        assert!(JobState::Retrying.can_transition_to(JobState::Trying));
        assert!(!JobState::Retrying.can_transition_to(JobState::Success));
    }

    #[test]
    fn test_state_string_roundtrip() {
        for s in ["try", "retrying", "success", "non_retryable_error", "exhausted"] {
            assert_eq!(s.parse::<JobState>().unwrap().as_str(), s);
        }
        assert!("trying".parse::<JobState>().is_err());
    }

    #[test]
    fn test_trying_serializes_as_try() {
        assert_eq!(serde_json::to_string(&JobState::Trying).unwrap(), "\"try\"");
        assert_eq!(
            serde_json::from_str::<JobState>("\"try\"").unwrap(),
            JobState::Trying
        );
        assert_eq!(JobState::Trying.to_string(), "try");
    }

    #[test]
    fn test_job_kind_from_task() {
        assert_eq!(JobTask::Primary.kind(), JobKind::Primary);
        assert_eq!(
            JobTask::AncillaryForm(AncillaryForm::B).kind(),
            JobKind::AncillaryFormB
        );
        assert!(!JobKind::Primary.is_ancillary());
        assert!(JobKind::Upload.is_ancillary());
    }

    #[test]
    fn test_next_attempt_keeps_job_id() {
        let envelope = JobEnvelope::primary(SubmissionId::new(), AuthContext::default());
        let retry = envelope.next_attempt();
        assert_eq!(retry.job_id, envelope.job_id);
        assert_eq!(retry.attempt, 1);
    }
}

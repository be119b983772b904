//! Job outcome counters
//!
//! Emitted through the `metrics` facade; nothing is recorded until the
//! process installs a recorder. Every counter carries a `job_class` label
//! with the persisted job class.
//!
//! | counter | incremented when |
//! |---|---|
//! | `submission_job_tries_total` | an attempt calls the backend |
//! | `submission_job_outcomes_total{outcome="success"}` | the job reaches `Success` |
//! | `submission_job_outcomes_total{outcome="retryable"}` | a retry is scheduled |
//! | `submission_job_outcomes_total{outcome="non_retryable"}` | the job reaches `NonRetryableError` |
//! | `submission_job_outcomes_total{outcome="exhausted"}` | the job reaches `Exhausted` |

use crate::job::JobKind;

pub const JOB_TRIES: &str = "submission_job_tries_total";
pub const JOB_OUTCOMES: &str = "submission_job_outcomes_total";

/// How an attempt ended, as a counter label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeLabel {
    Success,
    Retryable,
    NonRetryable,
    Exhausted,
}

impl OutcomeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeLabel::Success => "success",
            OutcomeLabel::Retryable => "retryable",
            OutcomeLabel::NonRetryable => "non_retryable",
            OutcomeLabel::Exhausted => "exhausted",
        }
    }
}

pub fn record_try(kind: JobKind) {
    metrics::counter!(JOB_TRIES, "job_class" => kind.as_str()).increment(1);
}

pub fn record_outcome(kind: JobKind, outcome: OutcomeLabel) {
    metrics::counter!(
        JOB_OUTCOMES,
        "job_class" => kind.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

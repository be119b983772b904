//! Read-only status query
//!
//! Callers poll this after `create_submission`; outcomes are never pushed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{JobId, SubmissionId};

use crate::error::SubmissionError;
use crate::job::{JobKind, JobState};
use crate::ports::{JobStatusPort, SubmissionPort};
use crate::submission::BackendClaimId;

/// What a caller sees for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDocument {
    pub job_id: JobId,
    pub submission_id: SubmissionId,
    pub job_class: JobKind,
    pub status: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_claim_id: Option<BackendClaimId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the whole submission, ancillary jobs included, has finished
    pub complete: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct StatusQuery {
    statuses: Arc<dyn JobStatusPort>,
    submissions: Arc<dyn SubmissionPort>,
}

impl StatusQuery {
    pub fn new(statuses: Arc<dyn JobStatusPort>, submissions: Arc<dyn SubmissionPort>) -> Self {
        Self {
            statuses,
            submissions,
        }
    }

    /// Returns `SubmissionError::JobNotFound` when the job has no status row
    pub async fn get_status(&self, job_id: JobId) -> Result<StatusDocument, SubmissionError> {
        let status = self
            .statuses
            .find_by(job_id)
            .await?
            .ok_or(SubmissionError::JobNotFound(job_id))?;
        let submission = self.submissions.get(status.submission_id).await?;

        Ok(StatusDocument {
            job_id: status.job_id,
            submission_id: status.submission_id,
            job_class: status.job_class,
            status: status.status,
            backend_claim_id: submission.backend_claim_id,
            error: status.error_message,
            complete: submission.complete,
            updated_at: status.updated_at,
        })
    }

    /// Every tracked job of a submission, oldest update first
    pub async fn list_for_submission(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Vec<StatusDocument>, SubmissionError> {
        let submission = self.submissions.get(submission_id).await.map_err(|e| {
            if e.is_not_found() {
                SubmissionError::SubmissionNotFound(submission_id)
            } else {
                e.into()
            }
        })?;
        let mut rows = self.statuses.list_for_submission(submission_id).await?;
        rows.sort_by_key(|row| row.updated_at);

        Ok(rows
            .into_iter()
            .map(|status| StatusDocument {
                job_id: status.job_id,
                submission_id,
                job_class: status.job_class,
                status: status.status,
                backend_claim_id: submission.backend_claim_id,
                error: status.error_message,
                complete: submission.complete,
                updated_at: status.updated_at,
            })
            .collect())
    }
}

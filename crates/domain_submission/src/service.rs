//! Submission entry point

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use core_kernel::{JobId, SavedClaimId, SubmissionId, UserId};

use crate::error::SubmissionError;
use crate::job::JobEnvelope;
use crate::payload::{AuthContext, ClaimPayload};
use crate::ports::{JobQueuePort, SubmissionPort};
use crate::submission::Submission;

/// Returned by `create_submission`; the job id is what callers poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub submission_id: SubmissionId,
    pub job_id: JobId,
}

#[derive(Clone)]
pub struct SubmissionService {
    submissions: Arc<dyn SubmissionPort>,
    queue: Arc<dyn JobQueuePort>,
}

impl SubmissionService {
    pub fn new(submissions: Arc<dyn SubmissionPort>, queue: Arc<dyn JobQueuePort>) -> Self {
        Self { submissions, queue }
    }

    /// Stores the submission and enqueues its primary job
    ///
    /// Fire-and-forget: the outcome is only visible through the job status.
    pub async fn create_submission(
        &self,
        user_id: UserId,
        saved_claim_id: SavedClaimId,
        payload: ClaimPayload,
        auth_context: AuthContext,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        let submission = Submission::new(user_id, saved_claim_id, payload, auth_context);
        self.submissions.insert(&submission).await?;

        let envelope = JobEnvelope::primary(submission.id, submission.auth_context.clone());
        let receipt = SubmissionReceipt {
            submission_id: submission.id,
            job_id: envelope.job_id,
        };
        self.queue.enqueue(envelope).await?;

        info!(
            submission_id = %receipt.submission_id,
            job_id = %receipt.job_id,
            %user_id,
            ancillary_jobs = submission.payload.ancillary_tasks().len(),
            "Submission created"
        );
        Ok(receipt)
    }
}

//! Ancillary fan-out and batch join
//!
//! After the primary job succeeds, [`BatchCoordinator::start`] turns the
//! payload's uploads and sub-forms into one batch of independent jobs. Each
//! member reports back through [`BatchCoordinator::member_finished`] when it
//! reaches a terminal state, whatever that state is. Once every member is
//! terminal the submission is marked complete.
//!
//! Both entry points can run again for the same submission or member. The
//! batch is registered with its members' tasks, so a repeated `start` picks
//! up members that were never enqueued, and the completion write is repeated
//! until it has gone through.

use std::sync::Arc;

use tracing::{debug, info, warn};

use core_kernel::{BatchId, JobId, PortError, SubmissionId};

use crate::error::SubmissionError;
use crate::job::JobEnvelope;
use crate::payload::{AuthContext, ClaimPayload};
use crate::ports::{
    Batch, BatchMember, BatchPort, BatchProgress, JobQueuePort, JobStatusPort, SubmissionPort,
};
use crate::submission::BackendClaimId;

/// What `start` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanOut {
    /// A new batch was registered and its members enqueued
    Started { batch_id: BatchId, jobs: Vec<JobId> },
    /// The payload had no ancillary work; the submission is complete
    CompletedEmpty { batch_id: BatchId },
    /// The submission already had a batch; `requeued` lists the members
    /// that had never been attempted and were enqueued again
    Resumed {
        batch_id: BatchId,
        requeued: Vec<JobId>,
    },
}

#[derive(Clone)]
pub struct BatchCoordinator {
    submissions: Arc<dyn SubmissionPort>,
    statuses: Arc<dyn JobStatusPort>,
    batches: Arc<dyn BatchPort>,
    queue: Arc<dyn JobQueuePort>,
}

impl BatchCoordinator {
    pub fn new(
        submissions: Arc<dyn SubmissionPort>,
        statuses: Arc<dyn JobStatusPort>,
        batches: Arc<dyn BatchPort>,
        queue: Arc<dyn JobQueuePort>,
    ) -> Self {
        Self {
            submissions,
            statuses,
            batches,
            queue,
        }
    }

    /// Registers and enqueues the ancillary jobs of a submission
    ///
    /// Safe to call again for the same submission: the second call loads the
    /// registered batch, enqueues the members that have no status yet and
    /// re-checks completion.
    pub async fn start(
        &self,
        auth_context: &AuthContext,
        submission_id: SubmissionId,
        backend_claim_id: BackendClaimId,
        payload: &ClaimPayload,
    ) -> Result<FanOut, SubmissionError> {
        let batch = Batch::new(submission_id, payload.ancillary_tasks());

        if !self.batches.register(&batch).await? {
            debug!(%submission_id, "Ancillary batch already registered");
            return self.resume(auth_context, submission_id, backend_claim_id).await;
        }

        if batch.members.is_empty() {
            let progress = self.batches.try_complete(batch.id).await?;
            self.on_progress(batch.id, progress).await?;
            return Ok(FanOut::CompletedEmpty { batch_id: batch.id });
        }

        info!(
            %submission_id,
            batch_id = %batch.id,
            %backend_claim_id,
            members = batch.members.len(),
            "Starting ancillary jobs"
        );

        for member in &batch.members {
            self.queue
                .enqueue(member_envelope(&batch, member, auth_context, backend_claim_id))
                .await?;
        }

        Ok(FanOut::Started {
            batch_id: batch.id,
            jobs: batch.member_ids(),
        })
    }

    async fn resume(
        &self,
        auth_context: &AuthContext,
        submission_id: SubmissionId,
        backend_claim_id: BackendClaimId,
    ) -> Result<FanOut, SubmissionError> {
        let batch = self
            .batches
            .find_for_submission(submission_id)
            .await?
            .ok_or_else(|| PortError::not_found("Batch", submission_id))?;

        let mut requeued = Vec::new();
        for member in &batch.members {
            if self.statuses.find_by(member.job_id).await?.is_some() {
                continue;
            }
            self.queue
                .enqueue(member_envelope(&batch, member, auth_context, backend_claim_id))
                .await?;
            requeued.push(member.job_id);
        }
        if !requeued.is_empty() {
            warn!(
                %submission_id,
                batch_id = %batch.id,
                requeued = requeued.len(),
                "Re-enqueued ancillary jobs that were never attempted"
            );
        }

        let progress = self.batches.try_complete(batch.id).await?;
        self.on_progress(batch.id, progress).await?;

        Ok(FanOut::Resumed {
            batch_id: batch.id,
            requeued,
        })
    }

    /// Records that a batch member reached a terminal state
    pub async fn member_finished(
        &self,
        batch_id: BatchId,
        job_id: JobId,
    ) -> Result<BatchProgress, SubmissionError> {
        let progress = self.batches.record_terminal(batch_id, job_id).await?;
        debug!(
            %batch_id,
            %job_id,
            terminal = progress.terminal,
            expected = progress.expected,
            "Batch member finished"
        );
        self.on_progress(batch_id, progress).await?;
        Ok(progress)
    }

    /// Marks the submission complete once every member is terminal
    ///
    /// `mark_complete` is idempotent, so this runs on every report from a
    /// full batch, not only the one that completed it. A completion write
    /// that failed on an earlier delivery goes through on the next one.
    async fn on_progress(
        &self,
        batch_id: BatchId,
        progress: BatchProgress,
    ) -> Result<(), SubmissionError> {
        if progress.terminal < progress.expected {
            return Ok(());
        }
        let flipped = self.submissions.mark_complete(progress.submission_id).await?;
        if flipped {
            info!(
                submission_id = %progress.submission_id,
                %batch_id,
                members = progress.expected,
                "Submission complete"
            );
        }
        Ok(())
    }
}

fn member_envelope(
    batch: &Batch,
    member: &BatchMember,
    auth_context: &AuthContext,
    backend_claim_id: BackendClaimId,
) -> JobEnvelope {
    JobEnvelope::ancillary(
        member.job_id,
        batch.submission_id,
        member.task.clone(),
        auth_context.clone(),
        batch.id,
        backend_claim_id,
    )
}

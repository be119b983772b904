//! Job runner
//!
//! One implementation of the job state machine, shared by every job kind.
//! The kind only decides which backend call is made and what the payload of
//! that call is; status tracking, retry scheduling and the batch join are
//! the same for all of them.
//!
//! An attempt is:
//!
//! 1. skip if the job's row is already terminal (redelivery)
//! 2. upsert `Trying`
//! 3. call the backend and classify the reply
//! 4. upsert the resulting state, then schedule the retry, start the
//!    fan-out or report to the batch as the outcome requires

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::classifier::{ClassifiedError, ErrorClassifier, ResponseShape};
use crate::error::SubmissionError;
use crate::fanout::BatchCoordinator;
use crate::job::{AncillaryForm, JobEnvelope, JobKind, JobState, JobStatusUpdate, JobTask};
use crate::payload::UploadDescriptor;
use crate::ports::{DocumentMetadata, PipelinePorts};
use crate::retry::RetryPolicies;
use crate::submission::{BackendClaimId, Submission};
use crate::telemetry::{self, OutcomeLabel};

pub const ATTACHMENT_MISSING: &str = "attachment_missing";
pub const FORM_MISSING: &str = "form_missing";
pub const CLAIM_ID_MISSING: &str = "claim_id_missing";

/// How one delivery of a job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    RetryScheduled { attempt: u32, delay: Duration },
    Failed { code: String },
    Exhausted,
    /// The job was already terminal; nothing was called
    Skipped,
}

impl JobOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobOutcome::RetryScheduled { .. })
    }
}

#[derive(Clone)]
pub struct JobRunner {
    ports: PipelinePorts,
    coordinator: BatchCoordinator,
    classifier: ErrorClassifier,
    policies: RetryPolicies,
}

impl JobRunner {
    pub fn new(ports: PipelinePorts, classifier: ErrorClassifier, policies: RetryPolicies) -> Self {
        let coordinator = BatchCoordinator::new(
            Arc::clone(&ports.submissions),
            Arc::clone(&ports.statuses),
            Arc::clone(&ports.batches),
            Arc::clone(&ports.queue),
        );
        Self {
            ports,
            coordinator,
            classifier,
            policies,
        }
    }

    pub fn policies(&self) -> &RetryPolicies {
        &self.policies
    }

    /// Runs one delivery of a job
    ///
    /// Backend failures are recorded on the job status and never returned.
    /// An `Err` means a storage write failed part way; the delivery can be
    /// repeated with the same envelope.
    #[instrument(
        skip(self, envelope),
        fields(
            submission_id = %envelope.submission_id,
            job_id = %envelope.job_id,
            job_class = %envelope.kind(),
            attempt = envelope.attempt,
        )
    )]
    pub async fn perform(&self, envelope: &JobEnvelope) -> Result<JobOutcome, SubmissionError> {
        let current = match self.ports.statuses.find_by(envelope.job_id).await? {
            Some(status) if status.status.is_terminal() => {
                self.on_redelivered_terminal(envelope, status.status).await?;
                return Ok(JobOutcome::Skipped);
            }
            Some(status) => status.status,
            None => JobState::Queued,
        };

        let submission = self.load_submission(envelope).await?;
        self.transition(envelope, current, JobState::Trying, None).await?;
        telemetry::record_try(envelope.kind());
        debug!("Calling claims backend");

        let (classified, claim_id) = self.attempt(envelope, &submission).await;

        match classified {
            ClassifiedError::Success { claim_id: returned } => {
                self.on_success(envelope, &submission, returned.or(claim_id))
                    .await
            }
            ClassifiedError::RetryableError { reason } => self.on_retryable(envelope, reason).await,
            ClassifiedError::NonRetryableError { code, message } => {
                self.on_non_retryable(envelope, code, message).await
            }
        }
    }

    async fn load_submission(&self, envelope: &JobEnvelope) -> Result<Submission, SubmissionError> {
        self.ports
            .submissions
            .get(envelope.submission_id)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    SubmissionError::SubmissionNotFound(envelope.submission_id)
                } else {
                    e.into()
                }
            })
    }

    /// Makes the backend call for this job's kind
    ///
    /// Also returns the claim id the call was made under, when one applies.
    async fn attempt(
        &self,
        envelope: &JobEnvelope,
        submission: &Submission,
    ) -> (ClassifiedError, Option<BackendClaimId>) {
        let claim_id = envelope.backend_claim_id.or(submission.backend_claim_id);

        match &envelope.task {
            JobTask::Primary => {
                if let Some(existing) = submission.backend_claim_id {
                    info!(backend_claim_id = %existing, "Claim id already recorded, reusing");
                    return (
                        ClassifiedError::Success {
                            claim_id: Some(existing),
                        },
                        Some(existing),
                    );
                }
                let reply = self
                    .ports
                    .backend
                    .submit_claim(&envelope.auth_context, submission.core_form())
                    .await;
                (self.classifier.classify(&reply, ResponseShape::ClaimId), None)
            }
            JobTask::Upload(upload) => {
                let Some(claim_id) = claim_id else {
                    return (missing_claim_id(), None);
                };
                (self.upload(envelope, upload, claim_id).await, Some(claim_id))
            }
            JobTask::AncillaryForm(form) => {
                let Some(claim_id) = claim_id else {
                    return (missing_claim_id(), None);
                };
                (
                    self.ancillary_form(envelope, submission, *form, claim_id).await,
                    Some(claim_id),
                )
            }
        }
    }

    async fn upload(
        &self,
        envelope: &JobEnvelope,
        upload: &UploadDescriptor,
        claim_id: BackendClaimId,
    ) -> ClassifiedError {
        let file = match self.ports.attachments.fetch(&upload.confirmation_code).await {
            Ok(Some(file)) => file,
            Ok(None) => {
                return ClassifiedError::NonRetryableError {
                    code: ATTACHMENT_MISSING.to_string(),
                    message: format!("no file stored for {}", upload.confirmation_code),
                };
            }
            Err(e) if e.is_transient() => {
                return ClassifiedError::RetryableError {
                    reason: e.to_string(),
                };
            }
            Err(e) => {
                return ClassifiedError::NonRetryableError {
                    code: ATTACHMENT_MISSING.to_string(),
                    message: e.to_string(),
                };
            }
        };

        let metadata = DocumentMetadata {
            claim_id,
            file_name: upload.name.clone(),
            document_type: upload.attachment_id.clone(),
        };
        let reply = self
            .ports
            .backend
            .upload(&envelope.auth_context, file, &metadata)
            .await;
        self.classifier.classify(&reply, ResponseShape::Acknowledgement)
    }

    async fn ancillary_form(
        &self,
        envelope: &JobEnvelope,
        submission: &Submission,
        form: AncillaryForm,
        claim_id: BackendClaimId,
    ) -> ClassifiedError {
        let Some(content) = submission.ancillary_form(form) else {
            return ClassifiedError::NonRetryableError {
                code: FORM_MISSING.to_string(),
                message: format!("submission has no ancillary form {form:?}"),
            };
        };
        let reply = self
            .ports
            .backend
            .submit_ancillary_form(&envelope.auth_context, claim_id, form, content)
            .await;
        self.classifier.classify(&reply, ResponseShape::Acknowledgement)
    }

    async fn on_success(
        &self,
        envelope: &JobEnvelope,
        submission: &Submission,
        claim_id: Option<BackendClaimId>,
    ) -> Result<JobOutcome, SubmissionError> {
        if envelope.kind() != JobKind::Primary {
            self.transition(envelope, JobState::Trying, JobState::Success, None)
                .await?;
            telemetry::record_outcome(envelope.kind(), OutcomeLabel::Success);
            info!("Ancillary job succeeded");
            self.finish_member(envelope).await?;
            return Ok(JobOutcome::Succeeded);
        }

        let Some(claim_id) = claim_id else {
            return self
                .on_non_retryable(
                    envelope,
                    CLAIM_ID_MISSING.to_string(),
                    "backend reported success without a claim id".to_string(),
                )
                .await;
        };

        self.ports
            .submissions
            .set_backend_claim_id(envelope.submission_id, claim_id)
            .await?;
        self.transition(envelope, JobState::Trying, JobState::Success, None)
            .await?;
        telemetry::record_outcome(envelope.kind(), OutcomeLabel::Success);
        info!(backend_claim_id = %claim_id, "Claim submitted");

        self.coordinator
            .start(
                &envelope.auth_context,
                envelope.submission_id,
                claim_id,
                &submission.payload,
            )
            .await?;
        Ok(JobOutcome::Succeeded)
    }

    async fn on_retryable(
        &self,
        envelope: &JobEnvelope,
        reason: String,
    ) -> Result<JobOutcome, SubmissionError> {
        let policy = self.policies.for_kind(envelope.kind());

        if !policy.allows_retry_after(envelope.attempt) {
            self.transition(envelope, JobState::Trying, JobState::Exhausted, Some(&reason))
                .await?;
            telemetry::record_outcome(envelope.kind(), OutcomeLabel::Exhausted);
            warn!(%reason, max_retries = policy.max_retries, "Retries exhausted");
            self.finish_member(envelope).await?;
            return Ok(JobOutcome::Exhausted);
        }

        let next = envelope.next_attempt();
        let delay = policy.delay_for(next.attempt);
        self.transition(envelope, JobState::Trying, JobState::Retrying, Some(&reason))
            .await?;
        self.ports.queue.schedule(next, delay).await?;
        telemetry::record_outcome(envelope.kind(), OutcomeLabel::Retryable);
        warn!(
            %reason,
            next_attempt = envelope.attempt + 1,
            delay_secs = delay.as_secs(),
            "Retryable failure, retry scheduled"
        );
        Ok(JobOutcome::RetryScheduled {
            attempt: envelope.attempt + 1,
            delay,
        })
    }

    async fn on_non_retryable(
        &self,
        envelope: &JobEnvelope,
        code: String,
        message: String,
    ) -> Result<JobOutcome, SubmissionError> {
        let recorded = format!("{code}: {message}");
        self.transition(
            envelope,
            JobState::Trying,
            JobState::NonRetryableError,
            Some(&recorded),
        )
        .await?;
        telemetry::record_outcome(envelope.kind(), OutcomeLabel::NonRetryable);
        error!(%code, %message, "Non-retryable failure");
        self.finish_member(envelope).await?;
        Ok(JobOutcome::Failed { code })
    }

    /// Writes a state change after checking it against the state machine
    async fn transition(
        &self,
        envelope: &JobEnvelope,
        from: JobState,
        to: JobState,
        error_message: Option<&str>,
    ) -> Result<(), SubmissionError> {
        if !from.can_transition_to(to) {
            return Err(SubmissionError::InvalidStatusTransition { from, to });
        }
        let mut update = JobStatusUpdate::new(envelope, to);
        if let Some(message) = error_message {
            update = update.with_error(message);
        }
        self.ports.statuses.upsert(update).await?;
        Ok(())
    }

    async fn finish_member(&self, envelope: &JobEnvelope) -> Result<(), SubmissionError> {
        if let Some(batch_id) = envelope.batch_id {
            self.coordinator
                .member_finished(batch_id, envelope.job_id)
                .await?;
        }
        Ok(())
    }

    /// Repeats the follow-up of a terminal job in case the previous delivery
    /// stopped between the status write and the follow-up
    async fn on_redelivered_terminal(
        &self,
        envelope: &JobEnvelope,
        state: JobState,
    ) -> Result<(), SubmissionError> {
        debug!(status = %state, "Job already terminal, skipping");

        if envelope.kind() != JobKind::Primary {
            return self.finish_member(envelope).await;
        }
        if state != JobState::Success {
            return Ok(());
        }

        let submission = self.load_submission(envelope).await?;
        if let Some(claim_id) = submission.backend_claim_id {
            self.coordinator
                .start(
                    &envelope.auth_context,
                    envelope.submission_id,
                    claim_id,
                    &submission.payload,
                )
                .await?;
        }
        Ok(())
    }
}

fn missing_claim_id() -> ClassifiedError {
    ClassifiedError::NonRetryableError {
        code: CLAIM_ID_MISSING.to_string(),
        message: "job has no backend claim id to attach to".to_string(),
    }
}

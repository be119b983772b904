//! Submission Domain Ports
//!
//! The pipeline depends only on these traits. Adapters:
//!
//! - **PostgreSQL** (`infra_db`): submissions, job statuses and batches
//! - **In-memory** ([`crate::adapters::memory`]): the same stores for tests
//!   and single-process runs
//! - **HTTP** ([`crate::adapters::claims_api`]): the claims backend
//! - **Local queue** ([`crate::queue::LocalQueue`]) and **PostgreSQL**
//!   (`infra_db`): the job queue
//!
//! Every write a port exposes is idempotent: at-least-once delivery means a
//! job body can run more than once for the same job id.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use core_kernel::{BatchId, DomainPort, JobId, PortError, SubmissionId};

use crate::classifier::BackendReply;
use crate::job::{AncillaryForm, JobEnvelope, JobStatus, JobStatusUpdate, JobTask};
use crate::payload::AuthContext;
use crate::submission::{BackendClaimId, Submission};

/// Durable record of submissions
#[async_trait]
pub trait SubmissionPort: DomainPort {
    async fn insert(&self, submission: &Submission) -> Result<(), PortError>;

    /// Returns `PortError::NotFound` when the submission does not exist
    async fn get(&self, id: SubmissionId) -> Result<Submission, PortError>;

    /// Sets the backend claim id if unset
    ///
    /// Setting the same id again succeeds; a different id is a
    /// `PortError::Conflict`.
    async fn set_backend_claim_id(
        &self,
        id: SubmissionId,
        claim_id: BackendClaimId,
    ) -> Result<(), PortError>;

    /// Sets `complete = true`; returns whether this call flipped it
    async fn mark_complete(&self, id: SubmissionId) -> Result<bool, PortError>;
}

/// Idempotent persistence of job statuses, keyed by job id
#[async_trait]
pub trait JobStatusPort: DomainPort {
    /// Inserts the row, or updates status, error and timestamp in place
    ///
    /// An existing row keeps its submission id and job class.
    async fn upsert(&self, update: JobStatusUpdate) -> Result<JobStatus, PortError>;

    async fn find_by(&self, job_id: JobId) -> Result<Option<JobStatus>, PortError>;

    async fn list_for_submission(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Vec<JobStatus>, PortError>;
}

/// One ancillary job of a batch, stored with enough to enqueue it again
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMember {
    pub job_id: JobId,
    pub task: JobTask,
}

/// Batch registration as it is persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub submission_id: SubmissionId,
    pub members: Vec<BatchMember>,
}

impl Batch {
    /// A new batch with one freshly identified member per task
    pub fn new(submission_id: SubmissionId, tasks: Vec<JobTask>) -> Self {
        Self {
            id: BatchId::new(),
            submission_id,
            members: tasks
                .into_iter()
                .map(|task| BatchMember {
                    job_id: JobId::new(),
                    task,
                })
                .collect(),
        }
    }

    pub fn member_ids(&self) -> Vec<JobId> {
        self.members.iter().map(|m| m.job_id).collect()
    }
}

/// Join state of a batch after a member finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub submission_id: SubmissionId,
    pub terminal: usize,
    pub expected: usize,
    /// True for exactly one caller: the one whose call completed the batch
    pub just_completed: bool,
}

/// Batch membership and the join counter
#[async_trait]
pub trait BatchPort: DomainPort {
    /// Registers a batch; at most one batch exists per submission
    ///
    /// Returns `false` when the submission already has a batch, in which case
    /// nothing is written.
    async fn register(&self, batch: &Batch) -> Result<bool, PortError>;

    /// The batch registered for a submission, members included
    async fn find_for_submission(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Option<Batch>, PortError>;

    /// Marks a member terminal and completes the batch if it was the last one
    async fn record_terminal(
        &self,
        batch_id: BatchId,
        job_id: JobId,
    ) -> Result<BatchProgress, PortError>;

    /// Completes the batch if every member is terminal (always for an empty batch)
    async fn try_complete(&self, batch_id: BatchId) -> Result<BatchProgress, PortError>;
}

/// Document metadata sent with an upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub claim_id: BackendClaimId,
    pub file_name: String,
    pub document_type: String,
}

/// The external service that adjudicates claims
///
/// Methods never fail: every outcome, including transport failures, is a
/// [`BackendReply`] for the classifier to interpret.
#[async_trait]
pub trait ClaimsBackendPort: DomainPort {
    async fn submit_claim(&self, auth: &AuthContext, form: &Value) -> BackendReply;

    async fn submit_ancillary_form(
        &self,
        auth: &AuthContext,
        claim_id: BackendClaimId,
        form: AncillaryForm,
        content: &Value,
    ) -> BackendReply;

    async fn upload(
        &self,
        auth: &AuthContext,
        file: Vec<u8>,
        metadata: &DocumentMetadata,
    ) -> BackendReply;
}

/// Storage of supporting-evidence files, by confirmation code
#[async_trait]
pub trait AttachmentPort: DomainPort {
    /// Stores a file, replacing any file already held under the same code
    async fn store(&self, confirmation_code: &str, file: Vec<u8>) -> Result<(), PortError>;

    async fn fetch(&self, confirmation_code: &str) -> Result<Option<Vec<u8>>, PortError>;
}

/// The queue runtime jobs are delivered through
#[async_trait]
pub trait JobQueuePort: DomainPort {
    /// Adds a job for immediate delivery
    ///
    /// A job id that is already waiting in the queue is not added twice.
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<(), PortError>;

    /// Delivers `envelope` no earlier than `delay` from now
    ///
    /// Replaces whatever the queue holds for the same job id.
    async fn schedule(&self, envelope: JobEnvelope, delay: Duration) -> Result<(), PortError>;
}

/// The worker side of the job queue
///
/// A claimed job stays invisible to other workers until it is acknowledged
/// or released. `ack` and `release` match on job id and attempt, so a retry
/// scheduled during the delivery is not removed by the acknowledgement that
/// follows it.
#[async_trait]
pub trait JobSource: JobQueuePort {
    /// Takes the earliest due job, if any
    async fn claim(&self) -> Result<Option<JobEnvelope>, PortError>;

    /// Removes a delivered job
    async fn ack(&self, envelope: &JobEnvelope) -> Result<(), PortError>;

    /// Hands a claimed job back, due again after `delay`
    async fn release(&self, envelope: JobEnvelope, delay: Duration) -> Result<(), PortError>;

    /// Returns when a job may be due or after `timeout`
    async fn wait(&self, timeout: Duration);
}

/// The ports one pipeline instance is wired with
#[derive(Clone)]
pub struct PipelinePorts {
    pub submissions: Arc<dyn SubmissionPort>,
    pub statuses: Arc<dyn JobStatusPort>,
    pub batches: Arc<dyn BatchPort>,
    pub backend: Arc<dyn ClaimsBackendPort>,
    pub attachments: Arc<dyn AttachmentPort>,
    pub queue: Arc<dyn JobQueuePort>,
}

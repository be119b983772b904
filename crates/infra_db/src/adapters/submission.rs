//! PostgreSQL Submission Adapters
//!
//! Implements the storage ports of the submission pipeline on top of the
//! repositories in [`crate::repositories`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use infra_db::adapters::PostgresJobStatusAdapter;
//! use domain_submission::JobStatusPort;
//!
//! let statuses: Arc<dyn JobStatusPort> = Arc::new(PostgresJobStatusAdapter::new(pool));
//! let row = statuses.find_by(job_id).await?;
//! ```

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};

use core_kernel::{BatchId, DomainPort, JobId, PortError, SubmissionId};
use domain_submission::{
    AttachmentPort, AuthContext, BackendClaimId, Batch, BatchMember, BatchPort, BatchProgress,
    ClaimPayload, JobKind, JobState, JobStatus, JobStatusPort, JobStatusUpdate, Submission,
    SubmissionPort,
};

use crate::repositories::{
    AttachmentRepository, BatchMemberRow, BatchProgressRow, BatchRepository, JobStatusRepository,
    JobStatusRow, NewJobStatus, SubmissionRepository, SubmissionRow,
};

/// PostgreSQL-backed implementation of the SubmissionPort trait
///
/// Database errors are translated to `PortError` variants:
/// - `DatabaseError::NotFound` -> `PortError::NotFound`
/// - `DatabaseError::DuplicateEntry` -> `PortError::Conflict`
/// - connection failures -> `PortError::Connection`
/// - Other errors -> `PortError::Internal`
#[derive(Debug, Clone)]
pub struct PostgresSubmissionAdapter {
    repository: SubmissionRepository,
}

impl PostgresSubmissionAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repository: SubmissionRepository::new(pool),
        }
    }
}

impl DomainPort for PostgresSubmissionAdapter {}

#[async_trait]
impl SubmissionPort for PostgresSubmissionAdapter {
    #[instrument(skip(self, submission), fields(submission_id = %submission.id))]
    async fn insert(&self, submission: &Submission) -> Result<(), PortError> {
        let row = submission_to_row(submission)?;
        self.repository.insert(&row).await?;
        debug!("Submission stored");
        Ok(())
    }

    async fn get(&self, id: SubmissionId) -> Result<Submission, PortError> {
        let row = self.repository.get_by_id(id.as_uuid()).await?;
        row_to_submission(row)
    }

    #[instrument(skip(self), fields(submission_id = %id, backend_claim_id = %claim_id))]
    async fn set_backend_claim_id(
        &self,
        id: SubmissionId,
        claim_id: BackendClaimId,
    ) -> Result<(), PortError> {
        self.repository
            .set_backend_claim_id(id.as_uuid(), claim_id.value())
            .await?;
        Ok(())
    }

    async fn mark_complete(&self, id: SubmissionId) -> Result<bool, PortError> {
        Ok(self.repository.mark_complete(id.as_uuid()).await?)
    }
}

/// PostgreSQL-backed implementation of the JobStatusPort trait
#[derive(Debug, Clone)]
pub struct PostgresJobStatusAdapter {
    repository: JobStatusRepository,
}

impl PostgresJobStatusAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repository: JobStatusRepository::new(pool),
        }
    }
}

impl DomainPort for PostgresJobStatusAdapter {}

#[async_trait]
impl JobStatusPort for PostgresJobStatusAdapter {
    async fn upsert(&self, update: JobStatusUpdate) -> Result<JobStatus, PortError> {
        let row = self
            .repository
            .upsert(&NewJobStatus {
                job_id: update.job_id.as_uuid(),
                submission_id: update.submission_id.as_uuid(),
                job_class: update.job_class.as_str().to_string(),
                status: update.status.as_str().to_string(),
                error_message: update.error_message,
            })
            .await?;
        row_to_job_status(row)
    }

    async fn find_by(&self, job_id: JobId) -> Result<Option<JobStatus>, PortError> {
        self.repository
            .find_by_job_id(job_id.as_uuid())
            .await?
            .map(row_to_job_status)
            .transpose()
    }

    async fn list_for_submission(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Vec<JobStatus>, PortError> {
        self.repository
            .find_by_submission(submission_id.as_uuid())
            .await?
            .into_iter()
            .map(row_to_job_status)
            .collect()
    }
}

/// PostgreSQL-backed implementation of the BatchPort trait
#[derive(Debug, Clone)]
pub struct PostgresBatchAdapter {
    repository: BatchRepository,
}

impl PostgresBatchAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repository: BatchRepository::new(pool),
        }
    }
}

impl DomainPort for PostgresBatchAdapter {}

#[async_trait]
impl BatchPort for PostgresBatchAdapter {
    #[instrument(skip(self, batch), fields(batch_id = %batch.id, members = batch.members.len()))]
    async fn register(&self, batch: &Batch) -> Result<bool, PortError> {
        let members = batch
            .members
            .iter()
            .map(member_to_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self
            .repository
            .register(batch.id.as_uuid(), batch.submission_id.as_uuid(), &members)
            .await?)
    }

    async fn find_for_submission(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Option<Batch>, PortError> {
        let Some((batch_id, rows)) = self
            .repository
            .find_by_submission(submission_id.as_uuid())
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(Batch {
            id: BatchId::from(batch_id),
            submission_id,
            members: rows
                .into_iter()
                .map(row_to_member)
                .collect::<Result<_, _>>()?,
        }))
    }

    async fn record_terminal(
        &self,
        batch_id: BatchId,
        job_id: JobId,
    ) -> Result<BatchProgress, PortError> {
        let row = self
            .repository
            .record_terminal(batch_id.as_uuid(), job_id.as_uuid())
            .await?;
        Ok(row_to_progress(row))
    }

    async fn try_complete(&self, batch_id: BatchId) -> Result<BatchProgress, PortError> {
        let row = self.repository.try_complete(batch_id.as_uuid()).await?;
        Ok(row_to_progress(row))
    }
}

/// PostgreSQL-backed implementation of the AttachmentPort trait
#[derive(Debug, Clone)]
pub struct PostgresAttachmentAdapter {
    repository: AttachmentRepository,
}

impl PostgresAttachmentAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repository: AttachmentRepository::new(pool),
        }
    }
}

impl DomainPort for PostgresAttachmentAdapter {}

#[async_trait]
impl AttachmentPort for PostgresAttachmentAdapter {
    #[instrument(skip(self, file), fields(size = file.len()))]
    async fn store(&self, confirmation_code: &str, file: Vec<u8>) -> Result<(), PortError> {
        self.repository.upsert(confirmation_code, &file).await?;
        debug!("Attachment stored");
        Ok(())
    }

    async fn fetch(&self, confirmation_code: &str) -> Result<Option<Vec<u8>>, PortError> {
        Ok(self.repository.find_content(confirmation_code).await?)
    }
}

fn submission_to_row(submission: &Submission) -> Result<SubmissionRow, PortError> {
    Ok(SubmissionRow {
        id: submission.id.as_uuid(),
        user_id: submission.user_id.as_uuid(),
        saved_claim_id: submission.saved_claim_id.as_uuid(),
        payload: serde_json::to_value(&submission.payload)
            .map_err(|e| PortError::internal_from("Failed to encode claim payload", e))?,
        auth_context: serde_json::to_value(&submission.auth_context)
            .map_err(|e| PortError::internal_from("Failed to encode auth context", e))?,
        backend_claim_id: submission.backend_claim_id.map(|id| id.value()),
        complete: submission.complete,
        created_at: submission.created_at,
        updated_at: submission.updated_at,
    })
}

fn row_to_submission(row: SubmissionRow) -> Result<Submission, PortError> {
    let payload: ClaimPayload = serde_json::from_value(row.payload)
        .map_err(|e| PortError::internal_from("Stored claim payload is invalid", e))?;
    let auth_context: AuthContext = serde_json::from_value(row.auth_context)
        .map_err(|e| PortError::internal_from("Stored auth context is invalid", e))?;

    Ok(Submission {
        id: SubmissionId::from(row.id),
        user_id: row.user_id.into(),
        saved_claim_id: row.saved_claim_id.into(),
        payload,
        auth_context,
        backend_claim_id: row.backend_claim_id.map(BackendClaimId::new),
        complete: row.complete,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn row_to_job_status(row: JobStatusRow) -> Result<JobStatus, PortError> {
    let job_class: JobKind = row
        .job_class
        .parse()
        .map_err(|e: domain_submission::SubmissionError| PortError::validation(e.to_string()))?;
    let status: JobState = row
        .status
        .parse()
        .map_err(|e: domain_submission::SubmissionError| PortError::validation(e.to_string()))?;

    Ok(JobStatus {
        submission_id: row.submission_id.into(),
        job_id: row.job_id.into(),
        job_class,
        status,
        error_message: row.error_message,
        updated_at: row.updated_at,
    })
}

fn member_to_row(member: &BatchMember) -> Result<BatchMemberRow, PortError> {
    Ok(BatchMemberRow {
        job_id: member.job_id.as_uuid(),
        task: serde_json::to_value(&member.task)
            .map_err(|e| PortError::internal_from("Failed to encode batch member task", e))?,
    })
}

fn row_to_member(row: BatchMemberRow) -> Result<BatchMember, PortError> {
    Ok(BatchMember {
        job_id: row.job_id.into(),
        task: serde_json::from_value(row.task)
            .map_err(|e| PortError::internal_from("Stored batch member task is invalid", e))?,
    })
}

fn row_to_progress(row: BatchProgressRow) -> BatchProgress {
    BatchProgress {
        submission_id: row.submission_id.into(),
        terminal: row.terminal_members as usize,
        expected: row.expected_members as usize,
        just_completed: row.just_completed,
    }
}

//! In-memory storage adapters
//!
//! Thread-safe implementations of the storage ports for tests and
//! single-process runs. Each store keeps its rows behind a
//! `tokio::sync::RwLock`; every write takes the write lock for its whole
//! read-modify-write so the idempotence rules of the ports hold under
//! concurrent workers.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use core_kernel::{BatchId, DomainPort, JobId, PortError, SubmissionId};

use crate::job::{JobStatus, JobStatusUpdate};
use crate::ports::{AttachmentPort, Batch, BatchPort, BatchProgress, JobStatusPort, SubmissionPort};
use crate::submission::{BackendClaimId, Submission};

#[derive(Debug, Default)]
pub struct InMemorySubmissionStore {
    rows: RwLock<HashMap<SubmissionId, Submission>>,
}

impl InMemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DomainPort for InMemorySubmissionStore {}

#[async_trait]
impl SubmissionPort for InMemorySubmissionStore {
    async fn insert(&self, submission: &Submission) -> Result<(), PortError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&submission.id) {
            return Err(PortError::conflict(format!(
                "submission {} already exists",
                submission.id
            )));
        }
        rows.insert(submission.id, submission.clone());
        Ok(())
    }

    async fn get(&self, id: SubmissionId) -> Result<Submission, PortError> {
        self.rows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::not_found("Submission", id))
    }

    async fn set_backend_claim_id(
        &self,
        id: SubmissionId,
        claim_id: BackendClaimId,
    ) -> Result<(), PortError> {
        let mut rows = self.rows.write().await;
        let submission = rows
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found("Submission", id))?;
        submission
            .record_backend_claim_id(claim_id)
            .map(|_| ())
            .map_err(|e| PortError::conflict(e.to_string()))
    }

    async fn mark_complete(&self, id: SubmissionId) -> Result<bool, PortError> {
        let mut rows = self.rows.write().await;
        let submission = rows
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found("Submission", id))?;
        Ok(submission.mark_complete())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryJobStatusStore {
    rows: RwLock<HashMap<JobId, JobStatus>>,
}

impl InMemoryJobStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

impl DomainPort for InMemoryJobStatusStore {}

#[async_trait]
impl JobStatusPort for InMemoryJobStatusStore {
    async fn upsert(&self, update: JobStatusUpdate) -> Result<JobStatus, PortError> {
        let mut rows = self.rows.write().await;
        let now = Utc::now();
        let row = rows
            .entry(update.job_id)
            .and_modify(|row| {
                row.status = update.status;
                row.error_message = update.error_message.clone();
                row.updated_at = now;
            })
            .or_insert_with(|| JobStatus {
                submission_id: update.submission_id,
                job_id: update.job_id,
                job_class: update.job_class,
                status: update.status,
                error_message: update.error_message.clone(),
                updated_at: now,
            });
        Ok(row.clone())
    }

    async fn find_by(&self, job_id: JobId) -> Result<Option<JobStatus>, PortError> {
        Ok(self.rows.read().await.get(&job_id).cloned())
    }

    async fn list_for_submission(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Vec<JobStatus>, PortError> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|row| row.submission_id == submission_id)
            .cloned()
            .collect())
    }
}

#[derive(Debug)]
struct BatchState {
    batch: Batch,
    members: HashSet<JobId>,
    terminal: HashSet<JobId>,
    completed: bool,
}

impl BatchState {
    fn progress(&self, just_completed: bool) -> BatchProgress {
        BatchProgress {
            submission_id: self.batch.submission_id,
            terminal: self.terminal.len(),
            expected: self.members.len(),
            just_completed,
        }
    }

    fn complete_if_done(&mut self) -> BatchProgress {
        let done = !self.completed && self.terminal.len() == self.members.len();
        if done {
            self.completed = true;
        }
        self.progress(done)
    }
}

#[derive(Debug, Default)]
struct Batches {
    by_id: HashMap<BatchId, BatchState>,
    by_submission: HashMap<SubmissionId, BatchId>,
}

#[derive(Debug, Default)]
pub struct InMemoryBatchStore {
    inner: RwLock<Batches>,
}

impl InMemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The batch registered for a submission, if any
    pub async fn batch_for(&self, submission_id: SubmissionId) -> Option<BatchId> {
        self.inner.read().await.by_submission.get(&submission_id).copied()
    }
}

impl DomainPort for InMemoryBatchStore {}

#[async_trait]
impl BatchPort for InMemoryBatchStore {
    async fn register(&self, batch: &Batch) -> Result<bool, PortError> {
        let mut inner = self.inner.write().await;
        if inner.by_submission.contains_key(&batch.submission_id) {
            return Ok(false);
        }
        inner.by_submission.insert(batch.submission_id, batch.id);
        inner.by_id.insert(
            batch.id,
            BatchState {
                batch: batch.clone(),
                members: batch.member_ids().into_iter().collect(),
                terminal: HashSet::new(),
                completed: false,
            },
        );
        Ok(true)
    }

    async fn find_for_submission(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Option<Batch>, PortError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_submission
            .get(&submission_id)
            .and_then(|id| inner.by_id.get(id))
            .map(|state| state.batch.clone()))
    }

    async fn record_terminal(
        &self,
        batch_id: BatchId,
        job_id: JobId,
    ) -> Result<BatchProgress, PortError> {
        let mut inner = self.inner.write().await;
        let state = inner
            .by_id
            .get_mut(&batch_id)
            .ok_or_else(|| PortError::not_found("Batch", batch_id))?;
        if !state.members.contains(&job_id) {
            return Err(PortError::validation(format!(
                "job {job_id} is not a member of batch {batch_id}"
            )));
        }
        state.terminal.insert(job_id);
        Ok(state.complete_if_done())
    }

    async fn try_complete(&self, batch_id: BatchId) -> Result<BatchProgress, PortError> {
        let mut inner = self.inner.write().await;
        let state = inner
            .by_id
            .get_mut(&batch_id)
            .ok_or_else(|| PortError::not_found("Batch", batch_id))?;
        Ok(state.complete_if_done())
    }
}

/// Attachment files keyed by confirmation code
#[derive(Debug, Default)]
pub struct InMemoryAttachmentStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, confirmation_code: impl Into<String>, file: Vec<u8>) {
        self.files.write().await.insert(confirmation_code.into(), file);
    }
}

impl DomainPort for InMemoryAttachmentStore {}

#[async_trait]
impl AttachmentPort for InMemoryAttachmentStore {
    async fn store(&self, confirmation_code: &str, file: Vec<u8>) -> Result<(), PortError> {
        self.put(confirmation_code, file).await;
        Ok(())
    }

    async fn fetch(&self, confirmation_code: &str) -> Result<Option<Vec<u8>>, PortError> {
        Ok(self.files.read().await.get(confirmation_code).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{AncillaryForm, JobEnvelope, JobState, JobTask};
    use crate::payload::AuthContext;

    fn two_forms() -> Vec<JobTask> {
        vec![
            JobTask::AncillaryForm(AncillaryForm::A),
            JobTask::AncillaryForm(AncillaryForm::B),
        ]
    }

    #[tokio::test]
    async fn test_upsert_updates_in_place() {
        let store = InMemoryJobStatusStore::new();
        let envelope = JobEnvelope::primary(SubmissionId::new(), AuthContext::default());

        store
            .upsert(JobStatusUpdate::new(&envelope, JobState::Trying))
            .await
            .unwrap();
        let row = store
            .upsert(JobStatusUpdate::new(&envelope, JobState::Retrying).with_error("gateway timeout"))
            .await
            .unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(row.status, JobState::Retrying);
        assert_eq!(row.error_message.as_deref(), Some("gateway timeout"));
    }

    #[tokio::test]
    async fn test_batch_completes_once() {
        let store = InMemoryBatchStore::new();
        let batch = Batch::new(SubmissionId::new(), two_forms());
        let (a, b) = (batch.members[0].job_id, batch.members[1].job_id);
        assert!(store.register(&batch).await.unwrap());

        let first = store.record_terminal(batch.id, a).await.unwrap();
        assert!(!first.just_completed);
        // Redelivery of the same member does not count twice
        let again = store.record_terminal(batch.id, a).await.unwrap();
        assert_eq!(again.terminal, 1);

        let last = store.record_terminal(batch.id, b).await.unwrap();
        assert!(last.just_completed);
        let repeat = store.record_terminal(batch.id, b).await.unwrap();
        assert!(!repeat.just_completed);
    }

    #[tokio::test]
    async fn test_one_batch_per_submission() {
        let store = InMemoryBatchStore::new();
        let submission_id = SubmissionId::new();
        let first = Batch::new(submission_id, vec![]);
        assert!(store.register(&first).await.unwrap());
        assert!(!store.register(&Batch::new(submission_id, two_forms())).await.unwrap());

        let found = store.find_for_submission(submission_id).await.unwrap().unwrap();
        assert_eq!(found, first);
    }

    #[tokio::test]
    async fn test_registered_batch_keeps_member_tasks() {
        let store = InMemoryBatchStore::new();
        let batch = Batch::new(SubmissionId::new(), two_forms());
        store.register(&batch).await.unwrap();

        let found = store
            .find_for_submission(batch.submission_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.members, batch.members);
        assert!(store
            .find_for_submission(SubmissionId::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_claim_id_conflict() {
        let store = InMemorySubmissionStore::new();
        let submission = Submission::new(
            Default::default(),
            Default::default(),
            crate::payload::ClaimPayload::new(serde_json::json!({})),
            AuthContext::default(),
        );
        store.insert(&submission).await.unwrap();

        store
            .set_backend_claim_id(submission.id, BackendClaimId::new(1))
            .await
            .unwrap();
        store
            .set_backend_claim_id(submission.id, BackendClaimId::new(1))
            .await
            .unwrap();
        let err = store
            .set_backend_claim_id(submission.id, BackendClaimId::new(2))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_stored_attachment_is_replaced() {
        let store = InMemoryAttachmentStore::new();
        store.store("guid-1", b"first".to_vec()).await.unwrap();
        store.store("guid-1", b"second".to_vec()).await.unwrap();

        assert_eq!(store.fetch("guid-1").await.unwrap(), Some(b"second".to_vec()));
        assert_eq!(store.fetch("guid-2").await.unwrap(), None);
    }
}

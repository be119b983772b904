//! Failure-injecting port wrappers
//!
//! Each wrapper forwards to a real store and fails the calls a [`Faults`]
//! plan names with `PortError::Connection`, the error a dropped database
//! connection produces. The runner treats it as redeliverable, so these
//! wrappers drive the paths where a delivery stops part way and the job is
//! delivered again.
//!
//! ```rust,ignore
//! let faults = Faults::new().fail(FaultPoint::MarkComplete, 1);
//! let pipeline = TestPipelineBuilder::new().faults(faults).build();
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use core_kernel::{BatchId, DomainPort, JobId, PortError, SubmissionId};
use domain_submission::{
    Batch, BatchPort, BatchProgress, BackendClaimId, JobEnvelope, JobQueuePort, JobState,
    JobStatus, JobStatusPort, JobStatusUpdate, Submission, SubmissionPort,
};

/// A port call that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    SetBackendClaimId,
    MarkComplete,
    /// A status write moving a job into the given state
    StatusUpsert(JobState),
    RegisterBatch,
    RecordTerminal,
    TryComplete,
    Enqueue,
    Schedule,
}

#[derive(Debug, Clone, Copy, Default)]
struct Plan {
    /// Calls let through before the first failure
    skip: usize,
    /// Failures still to inject
    remaining: usize,
    /// Failures injected so far
    injected: usize,
}

/// The failures a pipeline should see, shared by every wrapper
#[derive(Debug, Default)]
pub struct Faults {
    plans: Mutex<HashMap<FaultPoint, Plan>>,
}

impl Faults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `times` calls at `point`
    pub fn fail(self, point: FaultPoint, times: usize) -> Self {
        self.fail_after(point, 0, times)
    }

    /// Lets `skip` calls at `point` through, then fails the next `times`
    pub fn fail_after(self, point: FaultPoint, skip: usize, times: usize) -> Self {
        self.lock().insert(
            point,
            Plan {
                skip,
                remaining: times,
                injected: 0,
            },
        );
        self
    }

    /// How many failures were injected at `point`
    pub fn injected(&self, point: FaultPoint) -> usize {
        self.lock().get(&point).map_or(0, |plan| plan.injected)
    }

    fn check(&self, point: FaultPoint) -> Result<(), PortError> {
        let mut plans = self.lock();
        let Some(plan) = plans.get_mut(&point) else {
            return Ok(());
        };
        if plan.skip > 0 {
            plan.skip -= 1;
            return Ok(());
        }
        if plan.remaining == 0 {
            return Ok(());
        }
        plan.remaining -= 1;
        plan.injected += 1;
        Err(PortError::connection(format!("injected failure at {point:?}")))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<FaultPoint, Plan>> {
        self.plans.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct FlakySubmissions {
    inner: Arc<dyn SubmissionPort>,
    faults: Arc<Faults>,
}

impl FlakySubmissions {
    pub fn new(inner: Arc<dyn SubmissionPort>, faults: Arc<Faults>) -> Self {
        Self { inner, faults }
    }
}

impl DomainPort for FlakySubmissions {}

#[async_trait]
impl SubmissionPort for FlakySubmissions {
    async fn insert(&self, submission: &Submission) -> Result<(), PortError> {
        self.inner.insert(submission).await
    }

    async fn get(&self, id: SubmissionId) -> Result<Submission, PortError> {
        self.inner.get(id).await
    }

    async fn set_backend_claim_id(
        &self,
        id: SubmissionId,
        claim_id: BackendClaimId,
    ) -> Result<(), PortError> {
        self.faults.check(FaultPoint::SetBackendClaimId)?;
        self.inner.set_backend_claim_id(id, claim_id).await
    }

    async fn mark_complete(&self, id: SubmissionId) -> Result<bool, PortError> {
        self.faults.check(FaultPoint::MarkComplete)?;
        self.inner.mark_complete(id).await
    }
}

pub struct FlakyStatuses {
    inner: Arc<dyn JobStatusPort>,
    faults: Arc<Faults>,
}

impl FlakyStatuses {
    pub fn new(inner: Arc<dyn JobStatusPort>, faults: Arc<Faults>) -> Self {
        Self { inner, faults }
    }
}

impl DomainPort for FlakyStatuses {}

#[async_trait]
impl JobStatusPort for FlakyStatuses {
    async fn upsert(&self, update: JobStatusUpdate) -> Result<JobStatus, PortError> {
        self.faults.check(FaultPoint::StatusUpsert(update.status))?;
        self.inner.upsert(update).await
    }

    async fn find_by(&self, job_id: JobId) -> Result<Option<JobStatus>, PortError> {
        self.inner.find_by(job_id).await
    }

    async fn list_for_submission(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Vec<JobStatus>, PortError> {
        self.inner.list_for_submission(submission_id).await
    }
}

pub struct FlakyBatches {
    inner: Arc<dyn BatchPort>,
    faults: Arc<Faults>,
}

impl FlakyBatches {
    pub fn new(inner: Arc<dyn BatchPort>, faults: Arc<Faults>) -> Self {
        Self { inner, faults }
    }
}

impl DomainPort for FlakyBatches {}

#[async_trait]
impl BatchPort for FlakyBatches {
    async fn register(&self, batch: &Batch) -> Result<bool, PortError> {
        self.faults.check(FaultPoint::RegisterBatch)?;
        self.inner.register(batch).await
    }

    async fn find_for_submission(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Option<Batch>, PortError> {
        self.inner.find_for_submission(submission_id).await
    }

    async fn record_terminal(
        &self,
        batch_id: BatchId,
        job_id: JobId,
    ) -> Result<BatchProgress, PortError> {
        self.faults.check(FaultPoint::RecordTerminal)?;
        self.inner.record_terminal(batch_id, job_id).await
    }

    async fn try_complete(&self, batch_id: BatchId) -> Result<BatchProgress, PortError> {
        self.faults.check(FaultPoint::TryComplete)?;
        self.inner.try_complete(batch_id).await
    }
}

pub struct FlakyQueue {
    inner: Arc<dyn JobQueuePort>,
    faults: Arc<Faults>,
}

impl FlakyQueue {
    pub fn new(inner: Arc<dyn JobQueuePort>, faults: Arc<Faults>) -> Self {
        Self { inner, faults }
    }
}

impl DomainPort for FlakyQueue {}

#[async_trait]
impl JobQueuePort for FlakyQueue {
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<(), PortError> {
        self.faults.check(FaultPoint::Enqueue)?;
        self.inner.enqueue(envelope).await
    }

    async fn schedule(&self, envelope: JobEnvelope, delay: Duration) -> Result<(), PortError> {
        self.faults.check(FaultPoint::Schedule)?;
        self.inner.schedule(envelope, delay).await
    }
}

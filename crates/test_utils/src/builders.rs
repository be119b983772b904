//! Test Pipeline Builder
//!
//! Wires the whole submission pipeline against in-memory stores, the local
//! queue and a [`ScriptedBackend`]. Tests specify only the backend script
//! and retry policy they care about. The stores are reached through the
//! [`Faults`] wrappers, which inject nothing unless a plan is given.

use std::sync::Arc;
use std::time::Duration;

use core_kernel::{JobId, SavedClaimId, SubmissionId, UserId};
use domain_submission::adapters::{
    InMemoryAttachmentStore, InMemoryBatchStore, InMemoryJobStatusStore, InMemorySubmissionStore,
};
use domain_submission::{
    ClaimPayload, ErrorClassifier, JobEnvelope, JobOutcome, JobRunner, JobSource,
    KnownErrorTable, LocalQueue, PipelinePorts, RetryPolicies, RetryPolicy, StatusQuery,
    Submission, SubmissionError, SubmissionReceipt, SubmissionService,
};

use crate::backend::ScriptedBackend;
use crate::faults::{Faults, FlakyBatches, FlakyQueue, FlakyStatuses, FlakySubmissions};
use crate::fixtures::AuthFixtures;

/// Upper bound on deliveries in one [`TestPipeline::drain_redelivering`]
const MAX_DELIVERIES: usize = 200;

/// Builder for a fully wired in-memory pipeline
pub struct TestPipelineBuilder {
    backend: ScriptedBackend,
    policies: RetryPolicies,
    table: KnownErrorTable,
    faults: Faults,
}

impl Default for TestPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPipelineBuilder {
    /// Accepting backend, standard error table, small retry ceilings
    pub fn new() -> Self {
        Self {
            backend: ScriptedBackend::new(),
            policies: RetryPolicies {
                primary: RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(10)),
                ancillary: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
            },
            table: KnownErrorTable::standard(),
            faults: Faults::new(),
        }
    }

    pub fn faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    pub fn backend(mut self, backend: ScriptedBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn policies(mut self, policies: RetryPolicies) -> Self {
        self.policies = policies;
        self
    }

    pub fn known_errors(mut self, table: KnownErrorTable) -> Self {
        self.table = table;
        self
    }

    pub fn build(self) -> TestPipeline {
        let submissions = Arc::new(InMemorySubmissionStore::new());
        let statuses = Arc::new(InMemoryJobStatusStore::new());
        let batches = Arc::new(InMemoryBatchStore::new());
        let attachments = Arc::new(InMemoryAttachmentStore::new());
        let backend = Arc::new(self.backend);
        let queue = Arc::new(LocalQueue::new());
        let faults = Arc::new(self.faults);

        let flaky_submissions = Arc::new(FlakySubmissions::new(submissions.clone(), faults.clone()));
        let flaky_queue = Arc::new(FlakyQueue::new(queue.clone(), faults.clone()));
        let ports = PipelinePorts {
            submissions: flaky_submissions.clone(),
            statuses: Arc::new(FlakyStatuses::new(statuses.clone(), faults.clone())),
            batches: Arc::new(FlakyBatches::new(batches.clone(), faults.clone())),
            backend: backend.clone(),
            attachments: attachments.clone(),
            queue: flaky_queue.clone(),
        };
        let runner = JobRunner::new(
            ports,
            ErrorClassifier::new(Arc::new(self.table)),
            self.policies,
        );

        TestPipeline {
            service: SubmissionService::new(flaky_submissions, flaky_queue),
            status: StatusQuery::new(statuses.clone(), submissions.clone()),
            runner,
            queue,
            submissions,
            statuses,
            batches,
            attachments,
            backend,
            faults,
        }
    }
}

/// An in-memory pipeline with direct access to every store
pub struct TestPipeline {
    pub service: SubmissionService,
    pub status: StatusQuery,
    pub runner: JobRunner,
    pub queue: Arc<LocalQueue>,
    pub submissions: Arc<InMemorySubmissionStore>,
    pub statuses: Arc<InMemoryJobStatusStore>,
    pub batches: Arc<InMemoryBatchStore>,
    pub attachments: Arc<InMemoryAttachmentStore>,
    pub backend: Arc<ScriptedBackend>,
    pub faults: Arc<Faults>,
}

impl TestPipeline {
    /// Creates a submission for a fresh user with the standard auth context
    pub async fn submit(&self, payload: ClaimPayload) -> Result<SubmissionReceipt, SubmissionError> {
        self.service
            .create_submission(UserId::new(), SavedClaimId::new(), payload, AuthFixtures::user())
            .await
    }

    /// Stores a file for every upload of `payload`
    pub async fn store_attachments(&self, payload: &ClaimPayload) {
        for upload in &payload.uploads {
            self.attachments
                .put(upload.confirmation_code.clone(), b"%PDF-1.4 test".to_vec())
                .await;
        }
    }

    /// Runs everything queued until the queue is empty
    pub async fn drain(&self) -> Result<Vec<(JobEnvelope, JobOutcome)>, SubmissionError> {
        self.queue.drain(&self.runner).await
    }

    /// Runs everything queued the way a worker does
    ///
    /// A delivery that fails with a redeliverable error is released back to
    /// the queue and runs again. Returns the finished deliveries and the
    /// number of redeliveries.
    pub async fn drain_redelivering(
        &self,
    ) -> Result<(Vec<(JobEnvelope, JobOutcome)>, usize), SubmissionError> {
        let mut ran = Vec::new();
        let mut redelivered = 0;
        for _ in 0..MAX_DELIVERIES {
            let Some(envelope) = self.queue.pop_next().await else {
                return Ok((ran, redelivered));
            };
            match self.runner.perform(&envelope).await {
                Ok(outcome) => ran.push((envelope, outcome)),
                Err(e) if e.is_redeliverable() => {
                    redelivered += 1;
                    self.queue
                        .release(envelope, Duration::ZERO)
                        .await
                        .expect("local queue accepts releases");
                }
                Err(e) => return Err(e),
            }
        }
        panic!("queue did not drain within {MAX_DELIVERIES} deliveries");
    }

    pub async fn submission(&self, id: SubmissionId) -> Submission {
        use domain_submission::SubmissionPort;
        self.submissions
            .get(id)
            .await
            .expect("submission should exist")
    }

    /// Deliveries in `ran` that belong to `job_id`
    pub fn deliveries_of(ran: &[(JobEnvelope, JobOutcome)], job_id: JobId) -> usize {
        ran.iter().filter(|(e, _)| e.job_id == job_id).count()
    }
}

//! In-process job queue and worker pool
//!
//! [`LocalQueue`] holds envelopes with the instant they become due.
//! [`WorkerPool`] runs a fixed number of tokio tasks that claim due
//! envelopes from any [`JobSource`] and hand them to the [`JobRunner`].
//! Workers share nothing but the queue; every piece of job state lives
//! behind the storage ports.
//!
//! Tests use [`LocalQueue::drain`], which runs everything queued, scheduled
//! retries included, without waiting for any delay.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use core_kernel::{DomainPort, PortError};

use crate::error::SubmissionError;
use crate::job::JobEnvelope;
use crate::ports::{JobQueuePort, JobSource};
use crate::runner::{JobOutcome, JobRunner};

#[derive(Debug)]
struct Scheduled {
    run_at: Instant,
    envelope: JobEnvelope,
}

#[derive(Debug, Default)]
pub struct LocalQueue {
    entries: Mutex<Vec<Scheduled>>,
    notify: Notify,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Removes the earliest envelope that is due now
    pub async fn pop_due(&self) -> Option<JobEnvelope> {
        self.pop_where(|run_at| run_at <= Instant::now()).await
    }

    /// Removes the earliest envelope, due or not
    pub async fn pop_next(&self) -> Option<JobEnvelope> {
        self.pop_where(|_| true).await
    }

    async fn pop_where(&self, due: impl Fn(Instant) -> bool) -> Option<JobEnvelope> {
        let mut entries = self.entries.lock().await;
        let index = entries
            .iter()
            .enumerate()
            .filter(|(_, s)| due(s.run_at))
            .min_by_key(|(_, s)| s.run_at)
            .map(|(i, _)| i)?;
        Some(entries.remove(index).envelope)
    }

    async fn push(&self, envelope: JobEnvelope, run_at: Instant) {
        let mut entries = self.entries.lock().await;
        entries.retain(|s| s.envelope.job_id != envelope.job_id);
        entries.push(Scheduled { run_at, envelope });
        drop(entries);
        self.notify.notify_one();
    }

    pub async fn contains(&self, envelope: &JobEnvelope) -> bool {
        self.entries
            .lock()
            .await
            .iter()
            .any(|s| s.envelope.job_id == envelope.job_id)
    }

    /// Runs queued jobs until the queue is empty, ignoring scheduled delays
    ///
    /// Jobs enqueued while draining (fan-out members, retries) are run too.
    /// Returns every delivery in the order it ran.
    pub async fn drain(
        &self,
        runner: &JobRunner,
    ) -> Result<Vec<(JobEnvelope, JobOutcome)>, SubmissionError> {
        let mut ran = Vec::new();
        while let Some(envelope) = self.pop_next().await {
            let outcome = runner.perform(&envelope).await?;
            ran.push((envelope, outcome));
        }
        Ok(ran)
    }
}

impl DomainPort for LocalQueue {}

#[async_trait]
impl JobQueuePort for LocalQueue {
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<(), PortError> {
        if self.contains(&envelope).await {
            debug!(job_id = %envelope.job_id, "Job already queued");
            return Ok(());
        }
        debug!(job_id = %envelope.job_id, job_class = %envelope.kind(), "Job enqueued");
        self.push(envelope, Instant::now()).await;
        Ok(())
    }

    async fn schedule(&self, envelope: JobEnvelope, delay: Duration) -> Result<(), PortError> {
        self.push(envelope, Instant::now() + delay).await;
        Ok(())
    }
}

/// A popped envelope is already invisible to other workers, so `ack` has
/// nothing left to remove.
#[async_trait]
impl JobSource for LocalQueue {
    async fn claim(&self) -> Result<Option<JobEnvelope>, PortError> {
        Ok(self.pop_due().await)
    }

    async fn ack(&self, _envelope: &JobEnvelope) -> Result<(), PortError> {
        Ok(())
    }

    async fn release(&self, envelope: JobEnvelope, delay: Duration) -> Result<(), PortError> {
        self.schedule(envelope, delay).await
    }

    async fn wait(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}

/// Worker pool settings
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub concurrency: usize,
    /// Longest a worker sleeps before looking for due retries again
    pub poll_interval: Duration,
    /// Delay before redelivering a job whose storage writes failed
    pub redelivery_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(500),
            redelivery_delay: Duration::from_secs(15),
        }
    }
}

/// A fixed set of workers pulling from a [`JobSource`]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    pub fn spawn(queue: Arc<dyn JobSource>, runner: Arc<JobRunner>, config: WorkerConfig) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let concurrency = config.concurrency.max(1);

        let handles = (0..concurrency)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    Arc::clone(&queue),
                    Arc::clone(&runner),
                    config,
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        info!(concurrency, "Worker pool started");
        Self { handles, shutdown }
    }

    /// Stops taking new jobs and waits for running ones to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task failed");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn worker_loop(
    worker: usize,
    queue: Arc<dyn JobSource>,
    runner: Arc<JobRunner>,
    config: WorkerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker, "Worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        let claimed = match queue.claim().await {
            Ok(claimed) => claimed,
            Err(e) => {
                error!(worker, error = %e, "Could not claim a job");
                None
            }
        };
        let Some(envelope) = claimed else {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = queue.wait(config.poll_interval) => {}
            }
            continue;
        };

        let job_id = envelope.job_id;
        match runner.perform(&envelope).await {
            Ok(outcome) => {
                debug!(worker, %job_id, ?outcome, "Job delivery finished");
                acknowledge(worker, queue.as_ref(), &envelope).await;
            }
            Err(e) if e.is_redeliverable() => {
                warn!(worker, %job_id, error = %e, "Job delivery failed, redelivering");
                if let Err(e) = queue.release(envelope, config.redelivery_delay).await {
                    error!(worker, %job_id, error = %e, "Could not redeliver job");
                }
            }
            Err(e) => {
                error!(worker, %job_id, error = %e, "Job dropped");
                acknowledge(worker, queue.as_ref(), &envelope).await;
            }
        }
    }
    debug!(worker, "Worker stopped");
}

async fn acknowledge(worker: usize, queue: &dyn JobSource, envelope: &JobEnvelope) {
    if let Err(e) = queue.ack(envelope).await {
        // The claim lapses after the visibility timeout and the job runs again
        warn!(worker, job_id = %envelope.job_id, error = %e, "Could not acknowledge job");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::AuthContext;
    use core_kernel::SubmissionId;

    #[tokio::test]
    async fn test_enqueue_skips_a_job_already_waiting() {
        let queue = LocalQueue::new();
        let envelope = JobEnvelope::primary(SubmissionId::new(), AuthContext::default());

        queue.enqueue(envelope.clone()).await.unwrap();
        queue.enqueue(envelope.clone()).await.unwrap();

        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_schedule_replaces_the_waiting_attempt() {
        let queue = LocalQueue::new();
        let envelope = JobEnvelope::primary(SubmissionId::new(), AuthContext::default());

        queue.enqueue(envelope.clone()).await.unwrap();
        queue
            .schedule(envelope.next_attempt(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(queue.len().await, 1);
        assert!(queue.claim().await.unwrap().is_none());
        assert_eq!(queue.pop_next().await.unwrap().attempt, 1);
    }

    #[tokio::test]
    async fn test_released_job_is_claimed_again() {
        let queue = LocalQueue::new();
        let envelope = JobEnvelope::primary(SubmissionId::new(), AuthContext::default());
        queue.enqueue(envelope.clone()).await.unwrap();

        let claimed = queue.claim().await.unwrap().unwrap();
        assert!(queue.claim().await.unwrap().is_none());
        queue.release(claimed, Duration::ZERO).await.unwrap();

        assert_eq!(queue.claim().await.unwrap(), Some(envelope));
    }
}

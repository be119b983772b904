//! PostgreSQL Job Queue Adapter
//!
//! A durable [`JobSource`] on the `job_queue` table. Queued jobs and
//! scheduled retries survive a restart. A job whose worker dies mid-delivery
//! becomes claimable again once its visibility timeout lapses.
//!
//! Workers in this process are woken through a local `Notify` when a job is
//! enqueued; jobs written by other processes are picked up on the next poll.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::Notify;
use tracing::{debug, instrument, warn};

use core_kernel::{DomainPort, PortError};
use domain_submission::{JobEnvelope, JobQueuePort, JobSource};

use crate::repositories::{JobQueueRepository, QueuedJob};

/// How long a claim hides a job from other workers unless configured
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct PostgresJobQueue {
    repository: JobQueueRepository,
    visibility_timeout: Duration,
    notify: Arc<Notify>,
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repository: JobQueueRepository::new(pool),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Longest a claimed job stays hidden before another worker may take it
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Rows held by the queue, claimed ones included
    pub async fn len(&self) -> Result<usize, PortError> {
        Ok(self.repository.count().await? as usize)
    }
}

fn attempt_column(envelope: &JobEnvelope) -> Result<i32, PortError> {
    i32::try_from(envelope.attempt)
        .map_err(|_| PortError::validation(format!("attempt {} out of range", envelope.attempt)))
}

fn encode(envelope: &JobEnvelope) -> Result<serde_json::Value, PortError> {
    serde_json::to_value(envelope)
        .map_err(|e| PortError::internal_from("Failed to encode job envelope", e))
}

fn decode(row: QueuedJob) -> Result<JobEnvelope, PortError> {
    serde_json::from_value(row.envelope)
        .map_err(|e| PortError::internal_from(format!("Queued job {} is invalid", row.job_id), e))
}

impl DomainPort for PostgresJobQueue {}

#[async_trait]
impl JobQueuePort for PostgresJobQueue {
    #[instrument(skip(self, envelope), fields(job_id = %envelope.job_id, job_class = %envelope.kind()))]
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<(), PortError> {
        let inserted = self
            .repository
            .insert(
                envelope.job_id.as_uuid(),
                attempt_column(&envelope)?,
                &encode(&envelope)?,
            )
            .await?;
        if inserted {
            debug!("Job enqueued");
            self.notify.notify_one();
        } else {
            debug!("Job already queued");
        }
        Ok(())
    }

    #[instrument(skip(self, envelope), fields(job_id = %envelope.job_id, attempt = envelope.attempt))]
    async fn schedule(&self, envelope: JobEnvelope, delay: Duration) -> Result<(), PortError> {
        self.repository
            .upsert_scheduled(
                envelope.job_id.as_uuid(),
                attempt_column(&envelope)?,
                &encode(&envelope)?,
                delay.as_secs_f64(),
            )
            .await?;
        if delay.is_zero() {
            self.notify.notify_one();
        }
        Ok(())
    }
}

#[async_trait]
impl JobSource for PostgresJobQueue {
    async fn claim(&self) -> Result<Option<JobEnvelope>, PortError> {
        self.repository
            .claim_next(self.visibility_timeout.as_secs_f64())
            .await?
            .map(decode)
            .transpose()
    }

    async fn ack(&self, envelope: &JobEnvelope) -> Result<(), PortError> {
        let deleted = self
            .repository
            .delete(envelope.job_id.as_uuid(), attempt_column(envelope)?)
            .await?;
        if !deleted {
            debug!(job_id = %envelope.job_id, "Queue row already replaced by a later attempt");
        }
        Ok(())
    }

    async fn release(&self, envelope: JobEnvelope, delay: Duration) -> Result<(), PortError> {
        let released = self
            .repository
            .release(
                envelope.job_id.as_uuid(),
                attempt_column(&envelope)?,
                delay.as_secs_f64(),
            )
            .await?;
        if !released {
            warn!(
                job_id = %envelope.job_id,
                attempt = envelope.attempt,
                "Released job is no longer queued at this attempt"
            );
        }
        Ok(())
    }

    async fn wait(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::SubmissionId;
    use domain_submission::AuthContext;

    #[test]
    fn test_envelope_survives_the_json_column() {
        let envelope = JobEnvelope::primary(
            SubmissionId::new(),
            AuthContext::from_iter([("x-user-token", "t")]),
        )
        .next_attempt();
        let row = QueuedJob {
            job_id: envelope.job_id.as_uuid(),
            attempt: attempt_column(&envelope).unwrap(),
            envelope: encode(&envelope).unwrap(),
        };

        assert_eq!(row.attempt, 1);
        assert_eq!(decode(row).unwrap(), envelope);
    }

    #[test]
    fn test_corrupt_row_is_an_internal_error() {
        let row = QueuedJob {
            job_id: uuid::Uuid::new_v4(),
            attempt: 0,
            envelope: serde_json::json!({ "job_id": "not-a-uuid" }),
        };
        assert!(matches!(decode(row), Err(PortError::Internal { .. })));
    }
}

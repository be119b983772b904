//! Job queue repository implementation
//!
//! One row per job id holds the next attempt to deliver. Claiming a row
//! stamps `locked_until`; other workers skip locked and stamped rows until
//! the stamp lapses. Acknowledgement and release match on job id and
//! attempt, so they never touch a newer attempt scheduled in between.

use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DatabaseError;

/// A claimed row
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub attempt: i32,
    pub envelope: JsonValue,
}

/// Repository for the durable job queue
#[derive(Debug, Clone)]
pub struct JobQueueRepository {
    pool: PgPool,
}

impl JobQueueRepository {
    /// Creates a new JobQueueRepository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Adds a job due now; does nothing when the job id is already queued
    ///
    /// Returns whether a row was inserted.
    pub async fn insert(
        &self,
        job_id: Uuid,
        attempt: i32,
        envelope: &JsonValue,
    ) -> Result<bool, DatabaseError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO job_queue (job_id, attempt, envelope)
            VALUES ($1, $2, $3)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(job_id)
        .bind(attempt)
        .bind(envelope)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(inserted == 1)
    }

    /// Stores `attempt` as the job's next delivery, due after `delay_secs`
    ///
    /// Replaces any row held for the job id and clears its claim.
    pub async fn upsert_scheduled(
        &self,
        job_id: Uuid,
        attempt: i32,
        envelope: &JsonValue,
        delay_secs: f64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO job_queue (job_id, attempt, envelope, run_at)
            VALUES ($1, $2, $3, NOW() + make_interval(secs => $4))
            ON CONFLICT (job_id) DO UPDATE
            SET attempt = EXCLUDED.attempt,
                envelope = EXCLUDED.envelope,
                run_at = EXCLUDED.run_at,
                locked_until = NULL
            "#,
        )
        .bind(job_id)
        .bind(attempt)
        .bind(envelope)
        .bind(delay_secs)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Claims the earliest due row that no live claim holds
    pub async fn claim_next(
        &self,
        visibility_timeout_secs: f64,
    ) -> Result<Option<QueuedJob>, DatabaseError> {
        let claimed = sqlx::query_as::<_, QueuedJob>(
            r#"
            UPDATE job_queue
            SET locked_until = NOW() + make_interval(secs => $1)
            WHERE job_id = (
                SELECT job_id FROM job_queue
                WHERE run_at <= NOW()
                  AND (locked_until IS NULL OR locked_until <= NOW())
                ORDER BY run_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING job_id, attempt, envelope
            "#,
        )
        .bind(visibility_timeout_secs)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed)
    }

    /// Deletes the row of a delivered attempt
    pub async fn delete(&self, job_id: Uuid, attempt: i32) -> Result<bool, DatabaseError> {
        let deleted = sqlx::query("DELETE FROM job_queue WHERE job_id = $1 AND attempt = $2")
            .bind(job_id)
            .bind(attempt)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted == 1)
    }

    /// Clears the claim of an attempt and makes it due after `delay_secs`
    pub async fn release(
        &self,
        job_id: Uuid,
        attempt: i32,
        delay_secs: f64,
    ) -> Result<bool, DatabaseError> {
        let released = sqlx::query(
            r#"
            UPDATE job_queue
            SET locked_until = NULL,
                run_at = NOW() + make_interval(secs => $3)
            WHERE job_id = $1 AND attempt = $2
            "#,
        )
        .bind(job_id)
        .bind(attempt)
        .bind(delay_secs)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(released == 1)
    }

    /// Rows currently held, claimed or not
    pub async fn count(&self) -> Result<i64, DatabaseError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM job_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

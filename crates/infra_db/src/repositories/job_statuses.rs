//! Job status repository implementation
//!
//! Status rows are keyed by job id. Every write is an upsert, so concurrent
//! or repeated deliveries of the same job touch a single row.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DatabaseError;

/// Repository for job status rows
#[derive(Debug, Clone)]
pub struct JobStatusRepository {
    pool: PgPool,
}

impl JobStatusRepository {
    /// Creates a new JobStatusRepository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a status row, or updates status, error and timestamp in place
    ///
    /// `submission_id` and `job_class` of an existing row are left unchanged.
    pub async fn upsert(&self, status: &NewJobStatus) -> Result<JobStatusRow, DatabaseError> {
        let row = sqlx::query_as::<_, JobStatusRow>(
            r#"
            INSERT INTO job_statuses (job_id, submission_id, job_class, status, error_message, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (job_id) DO UPDATE
            SET status = EXCLUDED.status,
                error_message = EXCLUDED.error_message,
                updated_at = EXCLUDED.updated_at
            RETURNING job_id, submission_id, job_class, status, error_message, updated_at
            "#,
        )
        .bind(status.job_id)
        .bind(status.submission_id)
        .bind(&status.job_class)
        .bind(&status.status)
        .bind(&status.error_message)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// Retrieves the status row of a job, if one was ever written
    pub async fn find_by_job_id(&self, job_id: Uuid) -> Result<Option<JobStatusRow>, DatabaseError> {
        let row = sqlx::query_as::<_, JobStatusRow>(
            r#"
            SELECT job_id, submission_id, job_class, status, error_message, updated_at
            FROM job_statuses
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Retrieves every status row of a submission, oldest update first
    pub async fn find_by_submission(
        &self,
        submission_id: Uuid,
    ) -> Result<Vec<JobStatusRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, JobStatusRow>(
            r#"
            SELECT job_id, submission_id, job_class, status, error_message, updated_at
            FROM job_statuses
            WHERE submission_id = $1
            ORDER BY updated_at ASC
            "#,
        )
        .bind(submission_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// Database row for a job status
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct JobStatusRow {
    pub job_id: Uuid,
    pub submission_id: Uuid,
    pub job_class: String,
    pub status: String,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Data for one status write
#[derive(Debug, Clone)]
pub struct NewJobStatus {
    pub job_id: Uuid,
    pub submission_id: Uuid,
    pub job_class: String,
    pub status: String,
    pub error_message: Option<String>,
}

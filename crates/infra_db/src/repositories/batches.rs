//! Batch repository implementation
//!
//! A batch is a registered set of member jobs, each stored with its task,
//! plus a `completed_at` stamp. Members are stamped `terminal_at` as they finish; the batch is
//! completed by the single transaction that finds no unstamped member left.
//!
//! Every write that can complete a batch first locks the batch row, so two
//! members finishing at the same time are serialized and the completion
//! check of the second one sees the stamp of the first.

use serde_json::Value as JsonValue;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::DatabaseError;

/// Repository for ancillary batches and their members
#[derive(Debug, Clone)]
pub struct BatchRepository {
    pool: PgPool,
}

impl BatchRepository {
    /// Creates a new BatchRepository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Registers a batch and its members
    ///
    /// Returns `false` without writing anything when the submission already
    /// has a batch.
    pub async fn register(
        &self,
        batch_id: Uuid,
        submission_id: Uuid,
        members: &[BatchMemberRow],
    ) -> Result<bool, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO submission_batches (batch_id, submission_id, expected_members)
            VALUES ($1, $2, $3)
            ON CONFLICT (submission_id) DO NOTHING
            "#,
        )
        .bind(batch_id)
        .bind(submission_id)
        .bind(members.len() as i32)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let job_ids: Vec<Uuid> = members.iter().map(|m| m.job_id).collect();
        let tasks: Vec<JsonValue> = members.iter().map(|m| m.task.clone()).collect();
        sqlx::query(
            r#"
            INSERT INTO batch_members (batch_id, job_id, task, position)
            SELECT $1, m.job_id, m.task, m.position
            FROM UNNEST($2::uuid[], $3::jsonb[]) WITH ORDINALITY AS m(job_id, task, position)
            "#,
        )
        .bind(batch_id)
        .bind(&job_ids)
        .bind(&tasks)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Loads the batch of a submission with its members in registration order
    pub async fn find_by_submission(
        &self,
        submission_id: Uuid,
    ) -> Result<Option<(Uuid, Vec<BatchMemberRow>)>, DatabaseError> {
        let batch_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT batch_id FROM submission_batches WHERE submission_id = $1",
        )
        .bind(submission_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(batch_id) = batch_id else {
            return Ok(None);
        };

        let members = sqlx::query_as::<_, BatchMemberRow>(
            r#"
            SELECT job_id, task
            FROM batch_members
            WHERE batch_id = $1
            ORDER BY position
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some((batch_id, members)))
    }

    /// Stamps a member terminal and completes the batch if it was the last one
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if the job is not a member of the batch
    pub async fn record_terminal(
        &self,
        batch_id: Uuid,
        job_id: Uuid,
    ) -> Result<BatchProgressRow, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        lock_batch(&mut *tx, batch_id).await?;

        let stamped = sqlx::query(
            r#"
            UPDATE batch_members
            SET terminal_at = COALESCE(terminal_at, NOW())
            WHERE batch_id = $1 AND job_id = $2
            "#,
        )
        .bind(batch_id)
        .bind(job_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if stamped == 0 {
            return Err(DatabaseError::not_found("BatchMember", job_id));
        }

        let progress = complete_if_done(&mut *tx, batch_id).await?;
        tx.commit().await?;
        Ok(progress)
    }

    /// Completes the batch if every member is terminal
    pub async fn try_complete(&self, batch_id: Uuid) -> Result<BatchProgressRow, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        lock_batch(&mut *tx, batch_id).await?;
        let progress = complete_if_done(&mut *tx, batch_id).await?;
        tx.commit().await?;
        Ok(progress)
    }
}

async fn lock_batch(conn: &mut PgConnection, batch_id: Uuid) -> Result<(), DatabaseError> {
    sqlx::query("SELECT batch_id FROM submission_batches WHERE batch_id = $1 FOR UPDATE")
        .bind(batch_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DatabaseError::not_found("Batch", batch_id))?;
    Ok(())
}

async fn complete_if_done(
    conn: &mut PgConnection,
    batch_id: Uuid,
) -> Result<BatchProgressRow, DatabaseError> {
    let completed = sqlx::query(
        r#"
        UPDATE submission_batches b
        SET completed_at = NOW()
        WHERE b.batch_id = $1
          AND b.completed_at IS NULL
          AND NOT EXISTS (
              SELECT 1 FROM batch_members m
              WHERE m.batch_id = b.batch_id AND m.terminal_at IS NULL
          )
        "#,
    )
    .bind(batch_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    let counts = sqlx::query_as::<_, BatchCountsRow>(
        r#"
        SELECT
            b.submission_id,
            b.expected_members,
            (SELECT COUNT(*) FROM batch_members m
             WHERE m.batch_id = b.batch_id AND m.terminal_at IS NOT NULL) AS terminal_members
        FROM submission_batches b
        WHERE b.batch_id = $1
        "#,
    )
    .bind(batch_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(BatchProgressRow {
        submission_id: counts.submission_id,
        terminal_members: counts.terminal_members,
        expected_members: counts.expected_members,
        just_completed: completed == 1,
    })
}

/// One stored batch member
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct BatchMemberRow {
    pub job_id: Uuid,
    pub task: JsonValue,
}

#[derive(Debug, sqlx::FromRow)]
struct BatchCountsRow {
    submission_id: Uuid,
    expected_members: i32,
    terminal_members: i64,
}

/// Join state of a batch as read inside the completing transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgressRow {
    pub submission_id: Uuid,
    pub terminal_members: i64,
    pub expected_members: i32,
    pub just_completed: bool,
}

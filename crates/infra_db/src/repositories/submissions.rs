//! Submissions repository implementation
//!
//! A submission row is written once on creation and then changed by two
//! single-field writes: the backend claim id and the `complete` flag.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DatabaseError;

const SUBMISSION_COLUMNS: &str = "id, user_id, saved_claim_id, payload, auth_context, \
     backend_claim_id, complete, created_at, updated_at";

/// Repository for submission rows
#[derive(Debug, Clone)]
pub struct SubmissionRepository {
    pool: PgPool,
}

impl SubmissionRepository {
    /// Creates a new SubmissionRepository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a new submission
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::DuplicateEntry` if the id is already taken
    pub async fn insert(&self, row: &SubmissionRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO submissions (
                id, user_id, saved_claim_id, payload, auth_context,
                backend_claim_id, complete, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(row.id)
        .bind(row.user_id)
        .bind(row.saved_claim_id)
        .bind(&row.payload)
        .bind(&row.auth_context)
        .bind(row.backend_claim_id)
        .bind(row.complete)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Retrieves a submission by its identifier
    pub async fn get_by_id(&self, id: Uuid) -> Result<SubmissionRow, DatabaseError> {
        sqlx::query_as::<_, SubmissionRow>(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::not_found("Submission", id))
    }

    /// Sets the backend claim id unless a different one is already stored
    ///
    /// # Errors
    ///
    /// - `DatabaseError::NotFound` if the submission does not exist
    /// - `DatabaseError::DuplicateEntry` if a different claim id is stored
    pub async fn set_backend_claim_id(&self, id: Uuid, claim_id: i64) -> Result<(), DatabaseError> {
        let updated = sqlx::query(
            r#"
            UPDATE submissions
            SET backend_claim_id = $2, updated_at = NOW()
            WHERE id = $1 AND (backend_claim_id IS NULL OR backend_claim_id = $2)
            "#,
        )
        .bind(id)
        .bind(claim_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 1 {
            return Ok(());
        }

        let existing = self.get_by_id(id).await?;
        Err(DatabaseError::DuplicateEntry(format!(
            "submission {} already has backend claim id {}, refusing {}",
            id,
            existing.backend_claim_id.unwrap_or_default(),
            claim_id
        )))
    }

    /// Flips `complete` to true; returns whether this call made the change
    pub async fn mark_complete(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let flipped = sqlx::query(
            r#"
            UPDATE submissions
            SET complete = TRUE, updated_at = NOW()
            WHERE id = $1 AND complete = FALSE
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if flipped == 0 {
            // Distinguish "already complete" from "no such submission"
            self.get_by_id(id).await?;
        }
        Ok(flipped == 1)
    }
}

/// Database row for a submission
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SubmissionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub saved_claim_id: Uuid,
    pub payload: Value,
    pub auth_context: Value,
    pub backend_claim_id: Option<i64>,
    pub complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

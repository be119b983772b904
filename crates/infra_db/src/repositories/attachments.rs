//! Attachment repository implementation

use sqlx::PgPool;

use crate::error::DatabaseError;

/// Repository for uploaded supporting-evidence files
#[derive(Debug, Clone)]
pub struct AttachmentRepository {
    pool: PgPool,
}

impl AttachmentRepository {
    /// Creates a new AttachmentRepository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Stores a file, overwriting the content of an existing confirmation code
    pub async fn upsert(&self, confirmation_code: &str, content: &[u8]) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO attachments (confirmation_code, content)
            VALUES ($1, $2)
            ON CONFLICT (confirmation_code) DO UPDATE
            SET content = EXCLUDED.content, created_at = NOW()
            "#,
        )
        .bind(confirmation_code)
        .bind(content)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_content(&self, confirmation_code: &str) -> Result<Option<Vec<u8>>, DatabaseError> {
        let content = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT content FROM attachments WHERE confirmation_code = $1",
        )
        .bind(confirmation_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(content)
    }
}

//! Attachment handlers
//!
//! Files are stored before the submission that references them; upload jobs
//! fetch them later by confirmation code.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::dto::submissions::AttachmentStoredResponse;
use crate::{error::ApiError, AppState};

/// Stores the request body under a confirmation code
pub async fn put_attachment(
    State(state): State<AppState>,
    Path(confirmation_code): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<AttachmentStoredResponse>), ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("attachment body is empty".to_string()));
    }

    let size = body.len();
    state
        .attachments
        .store(&confirmation_code, body.to_vec())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AttachmentStoredResponse {
            confirmation_code,
            size,
        }),
    ))
}

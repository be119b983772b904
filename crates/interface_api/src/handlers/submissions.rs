//! Submission handlers

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use uuid::Uuid;

use core_kernel::{JobId, SavedClaimId, SubmissionId, UserId};
use domain_submission::{AuthContext, StatusDocument};

use crate::dto::submissions::*;
use crate::{error::ApiError, AppState};

/// Request headers with this prefix are forwarded to the claims backend
pub const AUTH_HEADER_PREFIX: &str = "x-user-";

/// Creates a submission and enqueues its primary job
pub async fn create_submission(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateSubmissionRequest>,
) -> Result<(StatusCode, Json<SubmissionAcceptedResponse>), ApiError> {
    let auth_context = auth_context_from(&headers)?;

    let receipt = state
        .service
        .create_submission(
            UserId::from(request.user_id),
            SavedClaimId::from(request.saved_claim_id),
            request.payload,
            auth_context,
        )
        .await?;

    let job_id = receipt.job_id.as_uuid();
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmissionAcceptedResponse {
            submission_id: receipt.submission_id.as_uuid(),
            job_id,
            status_url: format!("/api/v1/jobs/{job_id}/status"),
        }),
    ))
}

/// Gets the status document of a job
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusDocument>, ApiError> {
    let document = state.status.get_status(JobId::from(id)).await?;
    Ok(Json(document))
}

/// Lists every tracked job of a submission
pub async fn list_submission_jobs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubmissionJobsResponse>, ApiError> {
    let jobs = state
        .status
        .list_for_submission(SubmissionId::from(id))
        .await?;

    Ok(Json(SubmissionJobsResponse {
        submission_id: id,
        complete: jobs.iter().any(|job| job.complete),
        jobs,
    }))
}

/// Collects the `x-user-*` headers into the opaque auth context
fn auth_context_from(headers: &HeaderMap) -> Result<AuthContext, ApiError> {
    let mut pairs = Vec::new();
    for (name, value) in headers {
        if !name.as_str().starts_with(AUTH_HEADER_PREFIX) {
            continue;
        }
        let value = value
            .to_str()
            .map_err(|_| ApiError::BadRequest(format!("header {name} is not valid text")))?;
        pairs.push((name.as_str().to_string(), value.to_string()));
    }

    if pairs.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "request carries no {AUTH_HEADER_PREFIX}* auth headers"
        )));
    }
    Ok(AuthContext::from_iter(pairs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_only_prefixed_headers_are_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-token", HeaderValue::from_static("abc"));
        headers.insert("authorization", HeaderValue::from_static("Bearer xyz"));

        let context = auth_context_from(&headers).unwrap();
        let forwarded: Vec<_> = context.headers().collect();
        assert_eq!(forwarded, vec![("x-user-token", "abc")]);
    }

    #[test]
    fn test_missing_auth_headers_are_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        assert!(matches!(
            auth_context_from(&headers),
            Err(ApiError::BadRequest(_))
        ));
    }
}

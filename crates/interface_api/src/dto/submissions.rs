//! Submission DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use domain_submission::{ClaimPayload, StatusDocument};

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSubmissionRequest {
    pub user_id: Uuid,
    pub saved_claim_id: Uuid,
    pub payload: ClaimPayload,
}

/// Returned with `202 Accepted`; the outcome is polled at `status_url`
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmissionAcceptedResponse {
    pub submission_id: Uuid,
    pub job_id: Uuid,
    pub status_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmissionJobsResponse {
    pub submission_id: Uuid,
    pub complete: bool,
    pub jobs: Vec<StatusDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AttachmentStoredResponse {
    pub confirmation_code: String,
    pub size: usize,
}

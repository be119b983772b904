//! HTTP API tests
//!
//! The router runs against the in-memory pipeline from `test_utils`; queued
//! jobs are executed with `TestPipeline::drain` between requests.

use axum::body::Bytes;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use uuid::Uuid;

use domain_submission::{ClaimPayload, JobKind, JobState, StatusDocument};
use interface_api::dto::submissions::{
    AttachmentStoredResponse, CreateSubmissionRequest, SubmissionAcceptedResponse,
    SubmissionJobsResponse,
};
use interface_api::{create_router, AppState};
use test_utils::{
    PayloadFixtures, ReplyFixtures, ScriptedBackend, TestPipeline, TestPipelineBuilder, CLAIM_ID,
};

fn server(pipeline: &TestPipeline) -> TestServer {
    let state = AppState::new(
        pipeline.service.clone(),
        pipeline.status.clone(),
        pipeline.attachments.clone(),
    );
    TestServer::new(create_router(state)).unwrap()
}

fn request(payload: ClaimPayload) -> CreateSubmissionRequest {
    CreateSubmissionRequest {
        user_id: Uuid::new_v4(),
        saved_claim_id: Uuid::new_v4(),
        payload,
    }
}

async fn submit(server: &TestServer, payload: ClaimPayload) -> SubmissionAcceptedResponse {
    let response = server
        .post("/api/v1/submissions")
        .add_header(
            HeaderName::from_static("x-user-token"),
            HeaderValue::from_static("token-abc123"),
        )
        .json(&request(payload))
        .await;
    response.assert_status(StatusCode::ACCEPTED);
    response.json::<SubmissionAcceptedResponse>()
}

#[tokio::test]
async fn test_health_endpoints() {
    let pipeline = TestPipelineBuilder::new().build();
    let server = server(&pipeline);

    let health = server.get("/health").await;
    health.assert_status_ok();
    assert_eq!(health.json::<Value>()["status"], "healthy");

    let ready = server.get("/health/ready").await;
    ready.assert_status_ok();
    assert_eq!(ready.json::<Value>()["status"], "ready");
}

#[tokio::test]
async fn test_metrics_route_renders_installed_recorder() {
    let pipeline = TestPipelineBuilder::new().build();
    server(&pipeline)
        .get("/metrics")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::with_local_recorder(&recorder, || {
        domain_submission::telemetry::record_try(JobKind::Primary);
    });
    let state = AppState::new(
        pipeline.service.clone(),
        pipeline.status.clone(),
        pipeline.attachments.clone(),
    )
    .with_metrics(handle);
    let server = TestServer::new(create_router(state)).unwrap();

    let response = server.get("/metrics").await;
    response.assert_status_ok();
    assert!(response
        .text()
        .contains(r#"submission_job_tries_total{job_class="submit_claim"} 1"#));
}

#[tokio::test]
async fn test_submission_is_accepted_and_polled_to_success() {
    let pipeline = TestPipelineBuilder::new().build();
    let server = server(&pipeline);

    let accepted = submit(&server, PayloadFixtures::core_only()).await;
    assert_eq!(
        accepted.status_url,
        format!("/api/v1/jobs/{}/status", accepted.job_id)
    );

    // Queued jobs have no status row until their first attempt
    server
        .get(&accepted.status_url)
        .await
        .assert_status(StatusCode::NOT_FOUND);

    pipeline.drain().await.unwrap();

    let response = server.get(&accepted.status_url).await;
    response.assert_status_ok();
    let document = response.json::<StatusDocument>();
    assert_eq!(document.job_id.as_uuid(), accepted.job_id);
    assert_eq!(document.submission_id.as_uuid(), accepted.submission_id);
    assert_eq!(document.status, JobState::Success);
    assert_eq!(document.backend_claim_id.map(|id| id.value()), Some(CLAIM_ID));
    assert!(document.complete);
}

#[tokio::test]
async fn test_submission_without_auth_headers_is_rejected() {
    let pipeline = TestPipelineBuilder::new().build();
    let server = server(&pipeline);

    let response = server
        .post("/api/v1/submissions")
        .json(&request(PayloadFixtures::core_only()))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "bad_request");
    assert!(pipeline.queue.is_empty().await);
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let pipeline = TestPipelineBuilder::new().build();
    let server = server(&pipeline);

    let response = server
        .post("/api/v1/submissions")
        .add_header(
            HeaderName::from_static("x-user-token"),
            HeaderValue::from_static("token-abc123"),
        )
        .json(&json!({ "user_id": "not-a-uuid" }))
        .await;

    assert!(response.status_code().is_client_error());
    assert!(pipeline.queue.is_empty().await);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let pipeline = TestPipelineBuilder::new().build();
    let server = server(&pipeline);

    let response = server
        .get(&format!("/api/v1/jobs/{}/status", Uuid::new_v4()))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["error"], "not_found");
}

#[tokio::test]
async fn test_rejected_claim_reports_error() {
    let backend = ScriptedBackend::new().script_claims([ReplyFixtures::duplicate_claim()]);
    let pipeline = TestPipelineBuilder::new().backend(backend).build();
    let server = server(&pipeline);

    let accepted = submit(&server, PayloadFixtures::full(1)).await;
    pipeline.drain().await.unwrap();

    let document = server
        .get(&accepted.status_url)
        .await
        .json::<StatusDocument>();
    assert_eq!(document.status, JobState::NonRetryableError);
    assert!(document
        .error
        .as_deref()
        .is_some_and(|e| e.starts_with("duplicate_claim")));
    assert_eq!(document.backend_claim_id, None);
    assert!(!document.complete);
}

#[tokio::test]
async fn test_full_submission_with_uploaded_attachment() {
    let pipeline = TestPipelineBuilder::new().build();
    let server = server(&pipeline);
    let upload = PayloadFixtures::upload();

    let stored = server
        .put(&format!("/api/v1/attachments/{}", upload.confirmation_code))
        .bytes(Bytes::from_static(b"%PDF-1.4 evidence"))
        .await;
    stored.assert_status(StatusCode::CREATED);
    assert_eq!(stored.json::<AttachmentStoredResponse>().size, 17);

    let payload = PayloadFixtures::core_only()
        .with_upload(upload)
        .with_ancillary_form_a(PayloadFixtures::form_a())
        .with_ancillary_form_b(PayloadFixtures::form_b());
    let accepted = submit(&server, payload).await;
    pipeline.drain().await.unwrap();

    let response = server
        .get(&format!("/api/v1/submissions/{}/jobs", accepted.submission_id))
        .await;
    response.assert_status_ok();
    let listing = response.json::<SubmissionJobsResponse>();

    assert_eq!(listing.submission_id, accepted.submission_id);
    assert!(listing.complete);
    assert_eq!(listing.jobs.len(), 4);
    assert!(listing.jobs.iter().all(|job| job.status == JobState::Success));
}

#[tokio::test]
async fn test_missing_attachment_fails_upload_only() {
    let pipeline = TestPipelineBuilder::new().build();
    let server = server(&pipeline);

    let payload = PayloadFixtures::core_only().with_upload(PayloadFixtures::upload());
    let accepted = submit(&server, payload).await;
    pipeline.drain().await.unwrap();

    let listing = server
        .get(&format!("/api/v1/submissions/{}/jobs", accepted.submission_id))
        .await
        .json::<SubmissionJobsResponse>();

    assert_eq!(listing.jobs.len(), 2);
    let primary = listing
        .jobs
        .iter()
        .find(|job| job.job_id.as_uuid() == accepted.job_id)
        .unwrap();
    assert_eq!(primary.status, JobState::Success);
    let upload = listing
        .jobs
        .iter()
        .find(|job| job.job_id.as_uuid() != accepted.job_id)
        .unwrap();
    assert_eq!(upload.status, JobState::NonRetryableError);
    // A failed ancillary job still completes the submission
    assert!(listing.complete);
}

#[tokio::test]
async fn test_unknown_submission_listing_is_not_found() {
    let pipeline = TestPipelineBuilder::new().build();
    let server = server(&pipeline);

    server
        .get(&format!("/api/v1/submissions/{}/jobs", Uuid::new_v4()))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_empty_attachment_is_rejected() {
    let pipeline = TestPipelineBuilder::new().build();
    let server = server(&pipeline);

    server
        .put("/api/v1/attachments/guid-1")
        .bytes(Bytes::new())
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

//! HTTP API Layer
//!
//! This crate exposes the claim submission pipeline over HTTP using Axum and
//! hosts the queue workers in the same process.
//!
//! # Architecture
//!
//! - **Handlers**: thin request handlers over `SubmissionService` and `StatusQuery`
//! - **Middleware**: request logging and tracing
//! - **DTOs**: request/response bodies
//! - **Error Handling**: consistent error responses
//!
//! # Routes
//!
//! | method | path | |
//! |---|---|---|
//! | `POST` | `/api/v1/submissions` | create a submission, `202` with the primary job id |
//! | `GET` | `/api/v1/jobs/:id/status` | status document of one job |
//! | `GET` | `/api/v1/submissions/:id/jobs` | every tracked job of a submission |
//! | `PUT` | `/api/v1/attachments/:code` | store a supporting-evidence file |
//! | `GET` | `/metrics` | job try and outcome counters in Prometheus text format |
//!
//! # Example
//!
//! ```rust,ignore
//! use interface_api::{create_router, AppState};
//!
//! let app = create_router(AppState::new(service, status, attachments).with_pool(pool));
//! axum::serve(listener, app).await?;
//! ```

pub mod config;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use domain_submission::{AttachmentPort, StatusQuery, SubmissionService};

use crate::handlers::{attachments, health, metrics, submissions};
use crate::middleware::request_log_middleware;

/// Largest accepted attachment body
pub const MAX_ATTACHMENT_BYTES: usize = 25 * 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: SubmissionService,
    pub status: StatusQuery,
    pub attachments: Arc<dyn AttachmentPort>,
    /// Checked by `/health/ready`; `None` when running on in-memory stores
    pub pool: Option<PgPool>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        service: SubmissionService,
        status: StatusQuery,
        attachments: Arc<dyn AttachmentPort>,
    ) -> Self {
        Self {
            service,
            status,
            attachments,
            pool: None,
            metrics: None,
        }
    }

    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Creates the main API router
pub fn create_router(state: AppState) -> Router {
    // Public routes
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check))
        .route("/metrics", get(metrics::render_metrics));

    let submission_routes = Router::new()
        .route("/", post(submissions::create_submission))
        .route("/:id/jobs", get(submissions::list_submission_jobs));

    let job_routes = Router::new().route("/:id/status", get(submissions::get_job_status));

    let attachment_routes = Router::new()
        .route("/:code", put(attachments::put_attachment))
        .layer(DefaultBodyLimit::max(MAX_ATTACHMENT_BYTES));

    let api_routes = Router::new()
        .nest("/submissions", submission_routes)
        .nest("/jobs", job_routes)
        .nest("/attachments", attachment_routes)
        .layer(axum_middleware::from_fn(request_log_middleware));

    // Combine all routes
    Router::new()
        .merge(public_routes)
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

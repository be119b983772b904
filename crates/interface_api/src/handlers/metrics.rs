//! Prometheus exposition of the pipeline counters

use axum::{extract::State, http::StatusCode};

use crate::AppState;

/// Renders the installed recorder; `404` when none is installed
pub async fn render_metrics(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(StatusCode::NOT_FOUND)
}

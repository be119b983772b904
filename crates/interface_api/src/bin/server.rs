//! Claim Submission Pipeline - API Server Binary
//!
//! Starts the HTTP API and the queue workers of the submission pipeline in
//! one process.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! cargo run --bin submission-api
//!
//! # Run with environment variables
//! SUBMISSION_PORT=8080 SUBMISSION_DATABASE_URL=postgres://... cargo run --bin submission-api
//! ```
//!
//! # Environment Variables
//!
//! * `SUBMISSION_HOST` - Server host (default: 0.0.0.0)
//! * `SUBMISSION_PORT` - Server port (default: 8080)
//! * `SUBMISSION_DATABASE_URL` - PostgreSQL connection string
//! * `SUBMISSION_LOG_LEVEL` - Log level: trace, debug, info, warn, error (default: info)
//! * `SUBMISSION_WORKER_CONCURRENCY` - Queue workers (default: 4)
//! * `SUBMISSION_POLL_INTERVAL_MS` - Idle worker wake-up interval (default: 500)
//! * `SUBMISSION_QUEUE_VISIBILITY_TIMEOUT_SECS` - How long a claimed job stays hidden
//!   before another worker may take it over (default: 300)
//! * `SUBMISSION_PRIMARY_MAX_RETRIES` - Retries of the claim submission job (default: 25)
//! * `SUBMISSION_ANCILLARY_MAX_RETRIES` - Retries of upload and sub-form jobs (default: 10)
//! * `SUBMISSION_RETRY_BASE_DELAY_SECS` / `SUBMISSION_RETRY_MAX_DELAY_SECS` - Backoff curve
//! * `SUBMISSION_CLAIMS_API_URL` - Claims backend base URL
//! * `SUBMISSION_CLAIMS_API_TIMEOUT_MS` - Claims backend request timeout (default: 30000)
//!
//! Job counters are served at `/metrics`.
//!
//! Additional backend error keys are read from the `known_errors` list of an
//! optional `config/submission.toml`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use domain_submission::adapters::HttpClaimsBackend;
use domain_submission::{
    ErrorClassifier, JobRunner, PipelinePorts, StatusQuery, SubmissionService, WorkerPool,
};
use infra_db::{
    create_pool, run_migrations, PostgresAttachmentAdapter, PostgresBatchAdapter,
    PostgresJobQueue, PostgresJobStatusAdapter, PostgresSubmissionAdapter,
};
use interface_api::{config::ServiceConfig, create_router, AppState};

/// Main entry point for the API server.
///
/// Initializes logging, loads configuration, establishes the database
/// connection, starts the queue workers and serves HTTP until shutdown.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (useful for local development)
    dotenvy::dotenv().ok();

    let config = ServiceConfig::load().context("Failed to load configuration")?;

    init_tracing(&config.log_level);

    tracing::info!(
        host = %config.host,
        port = %config.port,
        workers = config.worker_concurrency,
        "Starting claim submission API server"
    );

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install metrics recorder")?;

    let pool = create_pool(config.database())
        .await
        .context("Failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let submissions = Arc::new(PostgresSubmissionAdapter::new(pool.clone()));
    let statuses = Arc::new(PostgresJobStatusAdapter::new(pool.clone()));
    let attachments = Arc::new(PostgresAttachmentAdapter::new(pool.clone()));
    let backend = Arc::new(
        HttpClaimsBackend::new(&config.claims_api()).context("Failed to build claims API client")?,
    );
    let queue = Arc::new(
        PostgresJobQueue::new(pool.clone())
            .with_visibility_timeout(config.queue_visibility_timeout()),
    );

    let table = config.known_error_table();
    tracing::info!(known_errors = table.len(), "Known backend error table loaded");

    let ports = PipelinePorts {
        submissions: submissions.clone(),
        statuses: statuses.clone(),
        batches: Arc::new(PostgresBatchAdapter::new(pool.clone())),
        backend,
        attachments: attachments.clone(),
        queue: queue.clone(),
    };
    let runner = Arc::new(JobRunner::new(
        ports,
        ErrorClassifier::new(Arc::new(table)),
        config.retry_policies(),
    ));
    let workers = WorkerPool::spawn(queue.clone(), runner, config.worker_config());

    let state = AppState::new(
        SubmissionService::new(submissions.clone(), queue),
        StatusQuery::new(statuses, submissions),
        attachments,
    )
    .with_pool(pool.clone())
    .with_metrics(metrics);
    let app = create_router(state);

    let addr: SocketAddr = config
        .server_addr()
        .parse()
        .context("Invalid server address")?;

    tracing::info!(%addr, "Server listening");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    workers.shutdown().await;
    pool.close().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber for structured logging.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// In-flight requests complete before the server stops; queue workers finish
/// their current job afterwards.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

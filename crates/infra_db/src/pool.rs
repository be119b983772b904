//! Connection pool and schema migrations
//!
//! The pool is shared by the HTTP handlers and every queue worker. Each
//! worker holds at most one connection at a time (a batch join keeps its
//! transaction open for the row lock), so the pool is sized from the worker
//! count plus headroom for requests.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::error::DatabaseError;

/// Connections kept free for HTTP requests on top of one per worker
pub const REQUEST_HEADROOM: u32 = 4;

/// Pool settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// How long a caller waits for a free connection before failing
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    /// Sizes the pool for `workers` queue workers, never below the default
    pub fn for_workers(mut self, workers: usize) -> Self {
        let needed = u32::try_from(workers)
            .unwrap_or(u32::MAX)
            .saturating_add(REQUEST_HEADROOM);
        self.max_connections = self.max_connections.max(needed);
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Connects the pool
///
/// # Errors
///
/// Returns `DatabaseError::ConnectionFailed` if no connection can be opened
pub async fn create_pool(config: DatabaseConfig) -> Result<PgPool, DatabaseError> {
    info!(
        max_connections = config.max_connections,
        acquire_timeout_secs = config.acquire_timeout.as_secs(),
        "Creating database pool"
    );

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.url)
        .await
        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))
}

/// Applies the embedded migrations; a no-op on an up-to-date schema
pub async fn run_migrations(pool: &PgPool) -> Result<(), DatabaseError> {
    info!("Running database migrations");
    sqlx::migrate!("../../migrations").run(pool).await?;
    info!("Database migrations complete");
    Ok(())
}

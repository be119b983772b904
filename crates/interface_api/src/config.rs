//! Service configuration
//!
//! Values come from an optional `config/submission` file (any format the
//! `config` crate understands) overlaid with `SUBMISSION_*` environment
//! variables. Every field has a default, so an empty environment starts a
//! local development instance.

use std::time::Duration;

use serde::Deserialize;

use domain_submission::adapters::ClaimsApiConfig;
use domain_submission::{KnownError, KnownErrorTable, RetryPolicies, RetryPolicy, WorkerConfig};
use infra_db::{DatabaseConfig, DEFAULT_VISIBILITY_TIMEOUT};

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database URL
    pub database_url: String,
    /// Log level
    pub log_level: String,
    /// Number of queue workers
    pub worker_concurrency: usize,
    /// Longest idle wait of a worker before checking for due retries
    pub poll_interval_ms: u64,
    /// How long a claimed queue row stays hidden from other workers
    pub queue_visibility_timeout_secs: u64,
    pub primary_max_retries: u32,
    pub ancillary_max_retries: u32,
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
    /// Base URL of the claims backend
    pub claims_api_url: String,
    pub claims_api_timeout_ms: u64,
    /// Backend error keys added to the standard table at startup
    pub known_errors: Vec<KnownError>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let policies = RetryPolicies::default();
        let claims_api = ClaimsApiConfig::default();
        let worker = WorkerConfig::default();

        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: "postgres://localhost/submissions".to_string(),
            log_level: "info".to_string(),
            worker_concurrency: worker.concurrency,
            poll_interval_ms: worker.poll_interval.as_millis() as u64,
            queue_visibility_timeout_secs: DEFAULT_VISIBILITY_TIMEOUT.as_secs(),
            primary_max_retries: policies.primary.max_retries,
            ancillary_max_retries: policies.ancillary.max_retries,
            retry_base_delay_secs: policies.primary.base_delay.as_secs(),
            retry_max_delay_secs: policies.primary.max_delay.as_secs(),
            claims_api_url: claims_api.base_url,
            claims_api_timeout_ms: claims_api.timeout_ms,
            known_errors: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// Loads configuration from `config/submission.*` and the environment
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("config/submission").required(false))
            .add_source(config::Environment::with_prefix("SUBMISSION").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Returns the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_policies(&self) -> RetryPolicies {
        let base = Duration::from_secs(self.retry_base_delay_secs);
        let max = Duration::from_secs(self.retry_max_delay_secs.max(self.retry_base_delay_secs));
        RetryPolicies {
            primary: RetryPolicy::new(self.primary_max_retries, base, max),
            ancillary: RetryPolicy::new(self.ancillary_max_retries, base, max),
        }
    }

    /// Storage failures are redelivered after the retry base delay
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            concurrency: self.worker_concurrency.max(1),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            redelivery_delay: Duration::from_secs(self.retry_base_delay_secs),
        }
    }

    /// At least twice the backend request timeout
    pub fn queue_visibility_timeout(&self) -> Duration {
        let floor = Duration::from_millis(self.claims_api_timeout_ms) * 2;
        Duration::from_secs(self.queue_visibility_timeout_secs).max(floor)
    }

    /// One connection per worker plus request headroom
    pub fn database(&self) -> DatabaseConfig {
        DatabaseConfig::new(self.database_url.clone()).for_workers(self.worker_config().concurrency)
    }

    pub fn claims_api(&self) -> ClaimsApiConfig {
        ClaimsApiConfig {
            base_url: self.claims_api_url.clone(),
            timeout_ms: self.claims_api_timeout_ms,
        }
    }

    /// The standard table extended with the configured entries
    pub fn known_error_table(&self) -> KnownErrorTable {
        KnownErrorTable::standard().extended(self.known_errors.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_submission::JobKind;

    #[test]
    fn test_defaults_match_pipeline_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.retry_policies(), RetryPolicies::default());
        assert_eq!(config.server_addr(), "0.0.0.0:8080");
        assert_eq!(config.worker_config().concurrency, 4);
        assert_eq!(config.worker_config().redelivery_delay, Duration::from_secs(15));
    }

    #[test]
    fn test_ceilings_are_per_job_family() {
        let config = ServiceConfig {
            primary_max_retries: 5,
            ancillary_max_retries: 1,
            ..Default::default()
        };
        let policies = config.retry_policies();
        assert_eq!(policies.for_kind(JobKind::Primary).max_retries, 5);
        assert_eq!(policies.for_kind(JobKind::Upload).max_retries, 1);
    }

    #[test]
    fn test_configured_errors_extend_standard_table() {
        let config = ServiceConfig {
            known_errors: vec![KnownError::transient("claim.submit.queueFull", "queue_full")],
            ..Default::default()
        };
        let table = config.known_error_table();
        assert_eq!(table.len(), KnownErrorTable::standard().len() + 1);
        assert_eq!(
            table.lookup("claim.submit.queueFull").map(|e| e.code.as_str()),
            Some("queue_full")
        );
        assert!(table.lookup("claim.submit.duplicateClaim").is_some());
    }

    #[test]
    fn test_visibility_timeout_outlasts_a_backend_request() {
        let config = ServiceConfig::default();
        assert_eq!(config.queue_visibility_timeout(), DEFAULT_VISIBILITY_TIMEOUT);

        let config = ServiceConfig {
            queue_visibility_timeout_secs: 5,
            claims_api_timeout_ms: 30_000,
            ..Default::default()
        };
        assert_eq!(config.queue_visibility_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_pool_is_sized_for_workers() {
        let config = ServiceConfig {
            worker_concurrency: 32,
            ..Default::default()
        };
        assert_eq!(
            config.database().max_connections,
            32 + infra_db::pool::REQUEST_HEADROOM
        );
    }

    #[test]
    fn test_zero_workers_is_raised_to_one() {
        let config = ServiceConfig {
            worker_concurrency: 0,
            ..Default::default()
        };
        assert_eq!(config.worker_config().concurrency, 1);
    }
}

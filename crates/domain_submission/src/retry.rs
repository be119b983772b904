//! Retry ceilings and exponential backoff

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::job::JobKind;

/// Retries allowed after the first attempt when the runtime default applies
pub const DEFAULT_MAX_RETRIES: u32 = 25;
/// Retries allowed after the first attempt for ancillary jobs
pub const ANCILLARY_MAX_RETRIES: u32 = 10;

/// Retry ceiling and backoff curve for one class of job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` means a single attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Whether a job whose attempt `attempt` (zero-based) failed may run again
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Delay before retry number `retry` (one-based): `base * 2^(retry-1)`, capped
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RETRIES,
            Duration::from_secs(15),
            Duration::from_secs(6 * 60 * 60),
        )
    }
}

/// Retry policies for the primary job and for ancillary jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicies {
    pub primary: RetryPolicy,
    pub ancillary: RetryPolicy,
}

impl RetryPolicies {
    pub fn for_kind(&self, kind: JobKind) -> &RetryPolicy {
        if kind.is_ancillary() {
            &self.ancillary
        } else {
            &self.primary
        }
    }
}

impl Default for RetryPolicies {
    fn default() -> Self {
        let primary = RetryPolicy::default();
        Self {
            primary,
            ancillary: RetryPolicy {
                max_retries: ANCILLARY_MAX_RETRIES,
                ..primary
            },
        }
    }
}

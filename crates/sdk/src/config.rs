//! Client settings: where the gateway lives and when a failed request is worth repeating.

use std::time::Duration;
use url::Url;

/// Default request timeout. Kept above the gateway's 30s call deadline so a slow tool
/// surfaces as a 504 from the gateway rather than a client-side timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub timeout: Duration,
    pub retry_config: RetryConfig,
}

impl ClientConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: DEFAULT_TIMEOUT,
            retry_config: RetryConfig::default(),
        }
    }
}

/// Why a request attempt did not produce a successful response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptFailure {
    /// The gateway answered with a non-2xx status.
    Status(u16),
    /// No connection could be established.
    Connect,
}

/// Retries for requests the gateway never received or turned away.
///
/// Only rate limiting (429), overload (503) and connection failures qualify. A 502 or 504
/// means the call reached the provider, and repeating it could run the tool twice.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Delay before the first retry; doubles with every further one.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// How long to wait before repeating a request that failed on attempt `attempt`
    /// (0-based), or `None` when it should not be repeated.
    pub fn retry_delay(&self, attempt: u32, failure: AttemptFailure) -> Option<Duration> {
        let retryable = matches!(failure, AttemptFailure::Connect | AttemptFailure::Status(429 | 503));
        if !retryable || attempt >= self.max_retries {
            return None;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        Some(self.initial_backoff.saturating_mul(factor).min(self.max_backoff))
    }
}

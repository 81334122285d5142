// Provider and gateway configuration

use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use toolgate_mcp::Framing;

/// How to launch one tool provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider name; becomes the first half of every qualified tool name.
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides applied on top of the gateway's own environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub framing: Framing,
    /// Per-provider override of the invocation deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_timeout_secs: Option<u64>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            framing: Framing::default(),
            call_timeout_secs: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.name.trim().is_empty() {
            return Err(GatewayError::Config("provider name must not be empty".to_string()));
        }
        if self.name.contains('/') {
            return Err(GatewayError::Config(format!(
                "provider name '{}' must not contain '/'",
                self.name
            )));
        }
        if self.command.trim().is_empty() {
            return Err(GatewayError::Config(format!(
                "provider '{}' has an empty command",
                self.name
            )));
        }
        Ok(())
    }
}

/// Bounded restarts with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 5000,
        }
    }
}

impl RestartPolicy {
    /// Delay before restart number `attempt` (1-based): the initial backoff doubled per
    /// previous attempt, capped at `max_backoff_ms`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let backoff = self.initial_backoff_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(backoff.min(self.max_backoff_ms))
    }
}

/// Deadlines used by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub call_timeout_secs: u64,
    pub init_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
            init_timeout_secs: 30,
            shutdown_grace_secs: 5,
        }
    }
}

impl TimeoutConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Everything the gateway needs to start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub restart: RestartPolicy,
    #[serde(default, rename = "gateway")]
    pub timeouts: TimeoutConfig,
}

impl GatewayConfig {
    pub fn new(providers: Vec<ProviderConfig>) -> Self {
        Self {
            providers,
            ..Default::default()
        }
    }

    /// Check every provider and reject duplicate names.
    pub fn validate(&self) -> GatewayResult<()> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !seen.insert(provider.name.as_str()) {
                return Err(GatewayError::Config(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff_for_attempt(4), Duration::from_millis(4000));
        assert_eq!(policy.backoff_for_attempt(5), Duration::from_millis(5000));
        assert_eq!(policy.backoff_for_attempt(200), Duration::from_millis(5000));
    }

    #[test]
    fn test_provider_name_rules() {
        assert!(ProviderConfig::new("fs", "npx").validate().is_ok());
        assert!(ProviderConfig::new("", "npx").validate().is_err());
        assert!(ProviderConfig::new("a/b", "npx").validate().is_err());
        assert!(ProviderConfig::new("fs", " ").validate().is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let config = GatewayConfig::new(vec![
            ProviderConfig::new("fs", "a"),
            ProviderConfig::new("web", "b"),
            ProviderConfig::new("fs", "c"),
        ]);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, GatewayError::Config(ref msg) if msg.contains("duplicate provider name 'fs'")));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: GatewayConfig = serde_json::from_value(serde_json::json!({
            "providers": [{"name": "fs", "command": "npx", "framing": "content-length"}],
            "gateway": {"call_timeout_secs": 10}
        }))
        .unwrap();

        assert_eq!(config.providers[0].framing, Framing::ContentLength);
        assert!(config.providers[0].args.is_empty());
        assert_eq!(config.timeouts.call_timeout(), Duration::from_secs(10));
        assert_eq!(config.timeouts.init_timeout_secs, 30);
        assert_eq!(config.restart, RestartPolicy::default());
    }
}

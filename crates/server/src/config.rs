use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use toolgate_core::{Gateway, GatewayConfig, ProviderConfig, RestartPolicy, TimeoutConfig};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8808;

/// Contents of `toolgate.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ListenConfig,

    #[serde(default)]
    pub gateway: TimeoutConfig,

    #[serde(default)]
    pub restart: RestartPolicy,

    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// Where the HTTP API listens. Command-line flags take precedence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListenConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Legacy JSON layout: `{"mcp": {"servers": {"<name>": {...}}}}`.
#[derive(Debug, Deserialize)]
struct LegacyConfig {
    mcp: LegacyMcp,
}

#[derive(Debug, Deserialize)]
struct LegacyMcp {
    #[serde(default)]
    servers: BTreeMap<String, LegacyServer>,
}

#[derive(Debug, Deserialize)]
struct LegacyServer {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

impl ServerConfig {
    /// Load from `config_path`; a missing file yields an empty configuration.
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            tracing::info!(
                "Configuration file {} not found, starting without providers",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read configuration file {}", config_path.display()))?;

        let config = if config_path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json(&content)
        } else {
            toml::from_str(&content).context("Failed to parse configuration file")
        }?;

        config
            .gateway_config()
            .validate()
            .context("Invalid configuration")?;
        tracing::info!(
            "Loaded {} providers from {}",
            config.providers.len(),
            config_path.display()
        );
        Ok(config)
    }

    /// Parse either the native layout or the legacy `mcp.servers` layout.
    pub fn from_json(content: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(content).context("Failed to parse configuration file")?;

        if value.get("mcp").is_none() {
            return serde_json::from_value(value).context("Failed to parse configuration file");
        }

        let legacy: LegacyConfig =
            serde_json::from_value(value).context("Failed to parse legacy mcp.servers configuration")?;
        let providers = legacy
            .mcp
            .servers
            .into_iter()
            .map(|(name, server)| ProviderConfig {
                args: server.args,
                env: server.env,
                ..ProviderConfig::new(name, server.command)
            })
            .collect();

        Ok(Self {
            providers,
            ..Default::default()
        })
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            providers: self.providers.clone(),
            restart: self.restart,
            timeouts: self.gateway,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

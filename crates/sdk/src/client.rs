//! Main client for the toolgate SDK.

use crate::config::{ClientConfig, RetryConfig, DEFAULT_TIMEOUT};
use crate::error::{GatewayClientError, GatewayClientResult};
use crate::transport::HttpTransport;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use toolgate_core::registry::split_qualified;
use toolgate_core::{HealthReport, ToolInfo};
use url::Url;

#[derive(Debug, Deserialize)]
struct ToolList {
    tools: Vec<ToolInfo>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// Client for a running toolgate gateway.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    config: Arc<ClientConfig>,
    http: HttpTransport,
}

impl GatewayClient {
    /// Create a new client builder.
    pub fn builder() -> GatewayClientBuilder {
        GatewayClientBuilder::new()
    }

    /// Create a client from configuration.
    pub fn from_config(config: ClientConfig) -> GatewayClientResult<Self> {
        let config = Arc::new(config);
        let http = HttpTransport::new(Arc::clone(&config))?;
        Ok(Self { config, http })
    }

    pub fn base_url(&self) -> &Url {
        &self.config.base_url
    }

    /// Every tool the gateway currently publishes.
    pub async fn list_tools(&self) -> GatewayClientResult<Vec<ToolInfo>> {
        let list: ToolList = self.http.get("/tools").await?;
        Ok(list.tools)
    }

    /// Invoke a tool by its qualified `<provider>/<tool>` name.
    pub async fn invoke(&self, name: &str, arguments: Value) -> GatewayClientResult<Value> {
        let (provider, tool) = split_qualified(name)
            .ok_or_else(|| GatewayClientError::InvalidToolName(name.to_string()))?;

        let url = self
            .http
            .build_url_from_segments(&["tools", provider, tool, "invoke"])?;
        self.http.post_url(url, &arguments).await
    }

    /// Gateway and provider health.
    pub async fn health(&self) -> GatewayClientResult<HealthReport> {
        self.http.get("/health").await
    }

    /// Send a `{"method", "params"}` message to the `/message` endpoint.
    pub async fn call(&self, method: &str, params: Option<Value>) -> GatewayClientResult<Value> {
        self.http.post("/message", &Message { method, params }).await
    }
}

/// Builder for creating a GatewayClient.
pub struct GatewayClientBuilder {
    base_url: Option<String>,
    timeout: Duration,
    retry_config: RetryConfig,
}

impl GatewayClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            retry_config: RetryConfig::default(),
        }
    }

    /// Set the base URL of the gateway.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry configuration.
    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Build the client.
    pub fn build(self) -> GatewayClientResult<GatewayClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| GatewayClientError::Config("base_url is required".to_string()))?;

        GatewayClient::from_config(ClientConfig {
            base_url: Url::parse(&base_url)?,
            timeout: self.timeout,
            retry_config: self.retry_config,
        })
    }
}

impl Default for GatewayClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

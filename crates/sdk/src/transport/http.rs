//! HTTP transport layer for the toolgate SDK.

use crate::config::{AttemptFailure, ClientConfig};
use crate::error::{GatewayClientError, GatewayClientResult};
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// HTTP transport for making API requests.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: Arc<ClientConfig>,
}

impl HttpTransport {
    /// Create a new HTTP transport with the given configuration.
    pub fn new(config: Arc<ClientConfig>) -> GatewayClientResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    /// Build a URL for the given path.
    pub(crate) fn build_url(&self, path: &str) -> GatewayClientResult<Url> {
        Ok(self.config.base_url.join(path)?)
    }

    /// Build a URL from raw path segments, percent-encoding each one.
    pub(crate) fn build_url_from_segments(&self, segments: &[&str]) -> GatewayClientResult<Url> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayClientError::Config(format!("base URL {} cannot take a path", self.config.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Execute a request with retries.
    async fn execute_with_retry(&self, request_builder: RequestBuilder) -> GatewayClientResult<Response> {
        let retry_config = &self.config.retry_config;
        let mut attempts = 0;

        loop {
            let request = request_builder
                .try_clone()
                .ok_or_else(|| GatewayClientError::Config("Request cannot be cloned".to_string()))?;

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();

                    if response.status().is_success() {
                        return Ok(response);
                    }

                    if let Some(backoff) = retry_config.retry_delay(attempts, AttemptFailure::Status(status)) {
                        warn!(
                            status = status,
                            attempt = attempts + 1,
                            backoff_ms = backoff.as_millis() as u64,
                            "Request rejected, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        attempts += 1;
                        continue;
                    }

                    let body = response.text().await.unwrap_or_default();
                    return Err(GatewayClientError::from_response(status, &body));
                }
                Err(e) => {
                    let delay = if e.is_connect() {
                        retry_config.retry_delay(attempts, AttemptFailure::Connect)
                    } else {
                        None
                    };
                    if let Some(backoff) = delay {
                        warn!(
                            attempt = attempts + 1,
                            backoff_ms = backoff.as_millis() as u64,
                            "Connection failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        attempts += 1;
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }

    /// Execute a GET request.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> GatewayClientResult<T> {
        let url = self.build_url(path)?;
        debug!(url = %url, "GET request");

        let response = self.execute_with_retry(self.client.get(url)).await?;
        Ok(response.json().await?)
    }

    /// Execute a POST request.
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> GatewayClientResult<T> {
        let url = self.build_url(path)?;
        self.post_url(url, body).await
    }

    /// Execute a POST request against an already built URL.
    pub async fn post_url<T: DeserializeOwned, B: Serialize>(&self, url: Url, body: &B) -> GatewayClientResult<T> {
        debug!(url = %url, "POST request");

        let response = self
            .execute_with_retry(self.client.post(url).json(body))
            .await?;
        Ok(response.json().await?)
    }
}

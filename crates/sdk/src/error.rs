//! Error types for the toolgate SDK.

use serde::{Deserialize, Serialize};

/// Result type for SDK operations.
pub type GatewayClientResult<T> = Result<T, GatewayClientError>;

/// Error types that can occur when talking to a gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with an error body.
    #[error("API error (status {status}, {kind}): {message}")]
    Api {
        status: u16,
        /// Error kind, e.g. `tool_not_found` or `timeout`.
        kind: String,
        message: String,
        details: Option<serde_json::Value>,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Tool names are `<provider>/<tool>`.
    #[error("Invalid tool name '{0}'")]
    InvalidToolName(String),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl GatewayClientError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status == 429 || *status == 503,
            _ => false,
        }
    }

    /// Error kind reported by the gateway, if this is an API error.
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::Api { kind, .. } => Some(kind.as_str()),
            _ => None,
        }
    }

    /// Create an API error from a status code and response body.
    pub fn from_response(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorResponse>(body) {
            Ok(error_response) => Self::Api {
                status,
                kind: error_response.error,
                message: error_response.message,
                details: error_response.details,
            },
            Err(_) => Self::Api {
                status,
                kind: "unknown".to_string(),
                message: body.to_string(),
                details: None,
            },
        }
    }
}

/// Error body returned by the gateway.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

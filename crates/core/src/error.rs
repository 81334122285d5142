// Gateway error taxonomy

use serde::{Deserialize, Serialize};
use std::fmt;
use toolgate_mcp::protocol::JsonRpcError;
use toolgate_mcp::SessionError;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Machine-readable error kind, as reported in HTTP error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ProviderStartupFailure,
    ProviderDisconnected,
    ToolNotFound,
    InvalidArguments,
    ToolInvocationError,
    Timeout,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProviderStartupFailure => "provider_startup_failure",
            Self::ProviderDisconnected => "provider_disconnected",
            Self::ToolNotFound => "tool_not_found",
            Self::InvalidArguments => "invalid_arguments",
            Self::ToolInvocationError => "tool_invocation_error",
            Self::Timeout => "timeout",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("provider '{provider}' failed to start: {reason}")]
    ProviderStartupFailure { provider: String, reason: String },

    #[error("provider '{provider}' is disconnected")]
    ProviderDisconnected { provider: String },

    #[error("tool '{name}' not found")]
    ToolNotFound { name: String },

    #[error("invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments {
        tool: String,
        reason: String,
        violations: Vec<String>,
    },

    /// The provider answered with a JSON-RPC error, carried verbatim.
    #[error("tool '{tool}' failed: {error}")]
    ToolInvocationError { tool: String, error: JsonRpcError },

    #[error("tool '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    #[error("configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProviderStartupFailure { .. } => ErrorKind::ProviderStartupFailure,
            Self::ProviderDisconnected { .. } => ErrorKind::ProviderDisconnected,
            Self::ToolNotFound { .. } => ErrorKind::ToolNotFound,
            Self::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            Self::ToolInvocationError { .. } => ErrorKind::ToolInvocationError,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Structured extra detail for API error bodies.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InvalidArguments { violations, .. } if !violations.is_empty() => {
                Some(serde_json::json!({ "violations": violations }))
            }
            Self::ToolInvocationError { error, .. } => serde_json::to_value(error).ok(),
            _ => None,
        }
    }

    /// Map a session failure during a call to `tool` into the gateway taxonomy.
    pub fn from_session(tool: &str, err: SessionError) -> Self {
        match err {
            SessionError::Disconnected { provider } | SessionError::NotReady { provider } => {
                Self::ProviderDisconnected { provider }
            }
            SessionError::Timeout { timeout, .. } => Self::Timeout {
                tool: tool.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            },
            SessionError::Rpc { error, .. } => Self::ToolInvocationError {
                tool: tool.to_string(),
                error,
            },
            SessionError::Protocol { reason, .. } => Self::ToolInvocationError {
                tool: tool.to_string(),
                error: JsonRpcError::internal_error(reason),
            },
            SessionError::AlreadyInitialized { provider } => Self::ProviderStartupFailure {
                provider,
                reason: "session was already initialized".to_string(),
            },
        }
    }
}

//! Error types for provider transports and sessions.

use crate::codec::CodecError;
use crate::protocol::JsonRpcError;
use std::time::Duration;

/// Failures raised by a [`crate::transport::TransportChannel`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The provider closed its end of the pipe (usually because the process exited).
    #[error("provider '{provider}' disconnected")]
    Disconnected { provider: String },

    #[error("transport error for provider '{provider}': {source}")]
    Codec {
        provider: String,
        #[source]
        source: CodecError,
    },
}

/// Failures raised by a [`crate::session::ProviderSession`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("provider '{provider}' disconnected")]
    Disconnected { provider: String },

    #[error("request '{method}' to provider '{provider}' timed out after {}ms", .timeout.as_millis())]
    Timeout {
        provider: String,
        method: String,
        timeout: Duration,
    },

    /// The provider answered with a JSON-RPC error; passed through verbatim.
    #[error("provider '{provider}' returned error {error}")]
    Rpc { provider: String, error: JsonRpcError },

    #[error("protocol violation from provider '{provider}': {reason}")]
    Protocol { provider: String, reason: String },

    #[error("session for provider '{provider}' is not ready")]
    NotReady { provider: String },

    #[error("session for provider '{provider}' was already initialized")]
    AlreadyInitialized { provider: String },
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Disconnected { provider } => Self::Disconnected { provider },
            // A failed write means the pipe is gone.
            TransportError::Codec {
                provider,
                source: CodecError::Io(_),
            } => Self::Disconnected { provider },
            TransportError::Codec { provider, source } => Self::Protocol {
                provider,
                reason: source.to_string(),
            },
        }
    }
}

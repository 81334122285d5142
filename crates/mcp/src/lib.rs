//! MCP wire layer for toolgate.
//!
//! Framing, JSON-RPC message types, the per-provider transport and session used by the
//! gateway, and a small stdio server for writing tool providers.

pub mod codec;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod tools;
pub mod transport;

pub use codec::{Framing, McpCodec};
pub use error::{SessionError, TransportError};
pub use server::McpServer;
pub use session::{ProviderSession, SessionId, SessionState};
pub use transport::TransportChannel;

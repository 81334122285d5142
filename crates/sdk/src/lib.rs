//! # toolgate SDK
//!
//! Rust client for the toolgate HTTP API.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use toolgate_sdk::{GatewayClient, GatewayClientResult};
//!
//! #[tokio::main]
//! async fn main() -> GatewayClientResult<()> {
//!     let client = GatewayClient::builder()
//!         .base_url("http://127.0.0.1:8808")
//!         .build()?;
//!
//!     for tool in client.list_tools().await? {
//!         println!("{}: {}", tool.name, tool.description);
//!     }
//!
//!     let result = client
//!         .invoke("filesystem/read_file", serde_json::json!({"path": "/tmp/notes.txt"}))
//!         .await?;
//!     println!("{}", result);
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod transport;

pub use client::{GatewayClient, GatewayClientBuilder};
pub use config::{AttemptFailure, ClientConfig, RetryConfig};
pub use error::{GatewayClientError, GatewayClientResult};

// Re-export response types
pub use toolgate_core::{HealthReport, HealthStatus, ProviderState, ProviderStatus, ToolInfo};

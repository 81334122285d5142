// Core of the toolgate gateway: provider supervision, tool registry, and dispatch

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod schema;
pub mod supervisor;

pub use config::{GatewayConfig, ProviderConfig, RestartPolicy, TimeoutConfig};
pub use dispatcher::{Dispatcher, InvocationRequest, InvocationResult};
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use gateway::{Gateway, HealthReport, HealthStatus};
pub use registry::{ToolDescriptor, ToolInfo, ToolRegistry};
pub use schema::{Schema, SchemaViolation};
pub use supervisor::{ProviderState, ProviderStatus, Supervisor};

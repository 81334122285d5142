// Gateway: the process-wide registry, supervisor, and dispatcher

use crate::config::GatewayConfig;
use crate::dispatcher::{Dispatcher, InvocationResult};
use crate::error::GatewayResult;
use crate::registry::{ToolInfo, ToolRegistry};
use crate::supervisor::{ProviderState, ProviderStatus, Supervisor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub providers: Vec<ProviderStatus>,
}

/// A running gateway. Construct with [`Gateway::start`], tear down with [`Gateway::shutdown`].
pub struct Gateway {
    registry: Arc<ToolRegistry>,
    supervisor: Supervisor,
    dispatcher: Dispatcher,
}

impl Gateway {
    /// Validate `config` and launch every provider in the background.
    pub fn start(config: GatewayConfig) -> GatewayResult<Self> {
        config.validate()?;

        let registry = Arc::new(ToolRegistry::new());
        let supervisor = Supervisor::new(Arc::clone(&registry), config.restart, config.timeouts);
        let mut dispatcher = Dispatcher::new(Arc::clone(&registry), config.timeouts.call_timeout());

        for provider in config.providers {
            dispatcher = dispatcher.with_provider(provider.name.clone(), provider.call_timeout());
            supervisor.start(provider)?;
        }

        tracing::info!("Gateway started with {} providers", supervisor.provider_names().len());
        Ok(Self {
            registry,
            supervisor,
            dispatcher,
        })
    }

    /// Wait until no provider is starting, or `timeout` elapses. Returns the final statuses.
    pub async fn wait_until_settled(&self, timeout: Duration) -> Vec<ProviderStatus> {
        let deadline = Instant::now() + timeout;
        for name in self.supervisor.provider_names() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.supervisor
                .wait_for(
                    &name,
                    |s| matches!(s.state, ProviderState::Ready | ProviderState::Failed | ProviderState::Stopped),
                    remaining,
                )
                .await;
        }
        self.supervisor.statuses()
    }

    pub async fn dispatch(&self, qualified_name: &str, arguments: Value) -> InvocationResult {
        self.dispatcher.dispatch(qualified_name, arguments).await
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.registry.list().iter().map(|d| d.info()).collect()
    }

    pub fn health(&self) -> HealthReport {
        let mut providers = self.supervisor.statuses();
        for status in &mut providers {
            if status.state == ProviderState::Ready {
                status.tool_count = self.registry.provider_tool_count(&status.name);
            }
        }
        let status = if providers.iter().all(|p| p.state == ProviderState::Ready) {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        };
        HealthReport { status, providers }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub async fn shutdown(&self) {
        tracing::info!("Gateway shutting down");
        self.supervisor.shutdown().await;
    }
}

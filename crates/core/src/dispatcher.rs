// Dispatcher: routes an invocation to the owning session

use crate::error::{GatewayError, GatewayResult};
use crate::registry::{split_qualified, ToolRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A request to run one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Qualified `<provider>/<tool>` name.
    pub tool: String,
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

fn empty_arguments() -> Value {
    Value::Object(Default::default())
}

impl InvocationRequest {
    pub fn new(tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool: tool.into(),
            arguments,
        }
    }
}

pub type InvocationResult = GatewayResult<Value>;

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    default_timeout: Duration,
    provider_timeouts: HashMap<String, Duration>,
    known_providers: HashSet<String>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
            provider_timeouts: HashMap::new(),
            known_providers: HashSet::new(),
        }
    }

    /// Declare a configured provider, optionally with its own deadline.
    ///
    /// Calls to a declared provider that has no live session fail with
    /// `ProviderDisconnected` instead of `ToolNotFound`.
    pub fn with_provider(mut self, provider: impl Into<String>, timeout: Option<Duration>) -> Self {
        let provider = provider.into();
        if let Some(timeout) = timeout {
            self.provider_timeouts.insert(provider.clone(), timeout);
        }
        self.known_providers.insert(provider);
        self
    }

    pub fn timeout_for(&self, provider: &str) -> Duration {
        self.provider_timeouts
            .get(provider)
            .copied()
            .unwrap_or(self.default_timeout)
    }

    pub async fn dispatch_request(&self, request: InvocationRequest) -> InvocationResult {
        self.dispatch(&request.tool, request.arguments).await
    }

    /// Resolve, validate, and invoke `qualified_name`. Never retries.
    pub async fn dispatch(&self, qualified_name: &str, arguments: Value) -> InvocationResult {
        let started = Instant::now();
        let outcome = self.run(qualified_name, arguments).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(_) => tracing::info!(tool = %qualified_name, elapsed_ms, outcome = "ok", "dispatched tool call"),
            Err(e) => tracing::info!(
                tool = %qualified_name,
                elapsed_ms,
                outcome = %e.kind(),
                error = %e,
                "dispatched tool call"
            ),
        }
        outcome
    }

    async fn run(&self, qualified_name: &str, arguments: Value) -> InvocationResult {
        let descriptor = match self.registry.resolve(qualified_name) {
            Ok(descriptor) => descriptor,
            Err(not_found) => return Err(self.unresolved(qualified_name, not_found)),
        };

        if let Err(violations) = descriptor.schema.validate(&arguments) {
            let reason = violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(GatewayError::InvalidArguments {
                tool: qualified_name.to_string(),
                reason,
                violations: violations.iter().map(ToString::to_string).collect(),
            });
        }

        let timeout = self.timeout_for(&descriptor.provider);
        descriptor
            .session
            .invoke(&descriptor.tool_name, arguments, timeout)
            .await
            .map_err(|e| GatewayError::from_session(qualified_name, e))
    }

    fn unresolved(&self, qualified_name: &str, not_found: GatewayError) -> GatewayError {
        match split_qualified(qualified_name) {
            Some((provider, _))
                if self.known_providers.contains(provider) && !self.registry.has_provider(provider) =>
            {
                GatewayError::ProviderDisconnected {
                    provider: provider.to_string(),
                }
            }
            _ => not_found,
        }
    }
}

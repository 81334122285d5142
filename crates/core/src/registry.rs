// Tool registry: one namespace-qualified catalog over every ready provider session

use crate::error::{GatewayError, GatewayResult};
use crate::schema::Schema;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use toolgate_mcp::{ProviderSession, SessionId, SessionState};

/// Separator between provider and tool in a qualified name.
pub const NAMESPACE_SEPARATOR: char = '/';

/// Build the qualified `<provider>/<tool>` name.
pub fn qualify(provider: &str, tool: &str) -> String {
    format!("{}{}{}", provider, NAMESPACE_SEPARATOR, tool)
}

/// Split a qualified name at the first separator. Provider names never contain one.
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    name.split_once(NAMESPACE_SEPARATOR)
        .filter(|(provider, tool)| !provider.is_empty() && !tool.is_empty())
}

/// A tool as published by the gateway.
pub struct ToolDescriptor {
    pub qualified_name: String,
    pub provider: String,
    /// Name the provider knows the tool by.
    pub tool_name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub schema: Schema,
    pub session: Arc<ProviderSession>,
}

impl ToolDescriptor {
    pub fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.qualified_name.clone(),
            description: self.description.clone(),
            schema: self.input_schema.clone(),
        }
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("qualified_name", &self.qualified_name)
            .field("session", &self.session.id())
            .finish()
    }
}

/// Serializable view of a tool for discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub schema: serde_json::Value,
}

#[derive(Default)]
struct Snapshot {
    tools: BTreeMap<String, Arc<ToolDescriptor>>,
    providers: BTreeMap<String, Arc<ProviderSession>>,
}

/// Registry of tools from live sessions.
///
/// Readers clone an `Arc` of the current map and never wait on registration; writers build
/// a new map and swap it in, so a session's tools appear and disappear all at once.
#[derive(Default)]
pub struct ToolRegistry {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Publish every tool of a ready session, replacing whatever the same provider had before.
    pub fn register(&self, session: &Arc<ProviderSession>) -> GatewayResult<usize> {
        if session.state() != SessionState::Ready {
            return Err(GatewayError::ProviderStartupFailure {
                provider: session.provider().to_string(),
                reason: "session is not ready".to_string(),
            });
        }

        let provider = session.provider().to_string();
        let descriptors: Vec<Arc<ToolDescriptor>> = session
            .tools()
            .iter()
            .map(|tool| {
                Arc::new(ToolDescriptor {
                    qualified_name: qualify(&provider, &tool.name),
                    provider: provider.clone(),
                    tool_name: tool.name.clone(),
                    description: tool.description.clone(),
                    input_schema: tool.input_schema.clone(),
                    schema: Schema::compile(&tool.input_schema),
                    session: Arc::clone(session),
                })
            })
            .collect();
        let count = descriptors.len();

        let mut guard = self.snapshot.write();
        let mut next = Snapshot {
            tools: guard
                .tools
                .iter()
                .filter(|(_, d)| d.provider != provider)
                .map(|(name, d)| (name.clone(), Arc::clone(d)))
                .collect(),
            providers: guard.providers.clone(),
        };
        for descriptor in descriptors {
            next.tools.insert(descriptor.qualified_name.clone(), descriptor);
        }
        next.providers.insert(provider.clone(), Arc::clone(session));
        *guard = Arc::new(next);
        drop(guard);

        tracing::info!(provider = %provider, session = %session.id(), tools = count, "registered provider tools");
        Ok(count)
    }

    /// Remove every tool belonging to `session_id`. Returns how many were removed.
    ///
    /// A stale ID (the provider already re-registered under a new session) removes nothing.
    pub fn unregister(&self, session_id: &SessionId) -> usize {
        let mut guard = self.snapshot.write();
        let Some(provider) = guard
            .providers
            .iter()
            .find(|(_, session)| session.id() == *session_id)
            .map(|(name, _)| name.clone())
        else {
            return 0;
        };

        let before = guard.tools.len();
        let next = Snapshot {
            tools: guard
                .tools
                .iter()
                .filter(|(_, d)| d.session.id() != *session_id)
                .map(|(name, d)| (name.clone(), Arc::clone(d)))
                .collect(),
            providers: guard
                .providers
                .iter()
                .filter(|(name, _)| **name != provider)
                .map(|(name, session)| (name.clone(), Arc::clone(session)))
                .collect(),
        };
        let removed = before - next.tools.len();
        *guard = Arc::new(next);
        drop(guard);

        tracing::info!(provider = %provider, session = %session_id, tools = removed, "unregistered provider tools");
        removed
    }

    /// Look up a tool. Tools of a session that has already closed are treated as absent,
    /// even before the supervisor gets to unregister them.
    pub fn resolve(&self, qualified_name: &str) -> GatewayResult<Arc<ToolDescriptor>> {
        self.current()
            .tools
            .get(qualified_name)
            .filter(|d| !d.session.is_closed())
            .cloned()
            .ok_or_else(|| GatewayError::ToolNotFound {
                name: qualified_name.to_string(),
            })
    }

    /// All tools, sorted by qualified name.
    pub fn list(&self) -> Vec<Arc<ToolDescriptor>> {
        self.current()
            .tools
            .values()
            .filter(|d| !d.session.is_closed())
            .cloned()
            .collect()
    }

    /// Whether `provider` currently has a registered, open session.
    pub fn has_provider(&self, provider: &str) -> bool {
        self.current()
            .providers
            .get(provider)
            .is_some_and(|session| !session.is_closed())
    }

    /// Number of tools `provider` currently publishes.
    pub fn provider_tool_count(&self, provider: &str) -> usize {
        self.current()
            .tools
            .values()
            .filter(|d| d.provider == provider && !d.session.is_closed())
            .count()
    }

    pub fn len(&self) -> usize {
        self.current()
            .tools
            .values()
            .filter(|d| !d.session.is_closed())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;
    use toolgate_mcp::protocol::ToolSchema;
    use toolgate_mcp::tools::{json_schema_object, Tool, ToolSet};
    use toolgate_mcp::{Framing, McpServer, TransportChannel};

    pub(crate) struct NamedTool(pub &'static str);

    #[async_trait::async_trait]
    impl Tool for NamedTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: self.0.to_string(),
                description: format!("{} tool", self.0),
                input_schema: json_schema_object(serde_json::json!({}), vec![]),
            }
        }

        async fn execute(
            &self,
            arguments: serde_json::Value,
        ) -> Result<serde_json::Value, toolgate_mcp::protocol::JsonRpcError> {
            Ok(arguments)
        }
    }

    /// A session connected to an in-process server, not yet initialized.
    pub(crate) fn connect(provider: &str, tools: ToolSet) -> Arc<ProviderSession> {
        let (gateway, remote) = tokio::io::duplex(64 * 1024);
        let (gateway_read, gateway_write) = tokio::io::split(gateway);
        let (remote_read, remote_write) = tokio::io::split(remote);
        let server = McpServer::new(provider, "test", tools);
        tokio::spawn(async move { server.serve(remote_read, remote_write, Framing::Lines).await });
        ProviderSession::start(TransportChannel::new(
            provider,
            gateway_read,
            gateway_write,
            Framing::Lines,
        ))
    }

    pub(crate) async fn ready_session(provider: &str, tools: ToolSet) -> Arc<ProviderSession> {
        let session = connect(provider, tools);
        session.initialize(Duration::from_secs(5)).await.unwrap();
        session
    }

    fn names(registry: &ToolRegistry) -> Vec<String> {
        registry.list().iter().map(|d| d.qualified_name.clone()).collect()
    }

    #[test]
    fn test_qualified_names() {
        assert_eq!(qualify("fs", "read"), "fs/read");
        assert_eq!(split_qualified("fs/read"), Some(("fs", "read")));
        assert_eq!(split_qualified("fs/dir/read"), Some(("fs", "dir/read")));
        assert_eq!(split_qualified("read"), None);
        assert_eq!(split_qualified("/read"), None);
    }

    #[tokio::test]
    async fn test_register_lists_sorted_snapshot() {
        let registry = ToolRegistry::new();
        let web = ready_session("web", ToolSet::new().with(NamedTool("fetch"))).await;
        let fs = ready_session("fs", ToolSet::new().with(NamedTool("write")).with(NamedTool("read"))).await;

        assert_eq!(registry.register(&web).unwrap(), 1);
        assert_eq!(registry.register(&fs).unwrap(), 2);
        assert_eq!(names(&registry), vec!["fs/read", "fs/write", "web/fetch"]);

        let descriptor = registry.resolve("fs/read").unwrap();
        assert_eq!(descriptor.tool_name, "read");
        assert_eq!(descriptor.info().name, "fs/read");
        assert!(matches!(
            registry.resolve("fs/missing"),
            Err(GatewayError::ToolNotFound { ref name }) if name == "fs/missing"
        ));
    }

    #[tokio::test]
    async fn test_unregister_removes_whole_session() {
        let registry = ToolRegistry::new();
        let fs = ready_session("fs", ToolSet::new().with(NamedTool("read")).with(NamedTool("write"))).await;
        let web = ready_session("web", ToolSet::new().with(NamedTool("fetch"))).await;
        registry.register(&fs).unwrap();
        registry.register(&web).unwrap();

        let before = registry.list();
        assert_eq!(registry.unregister(&fs.id()), 2);
        assert_eq!(names(&registry), vec!["web/fetch"]);
        assert!(!registry.has_provider("fs"));
        assert_eq!(registry.unregister(&fs.id()), 0);

        // Snapshots taken earlier are unaffected.
        assert_eq!(before.len(), 3);
    }

    #[tokio::test]
    async fn test_closed_session_tools_hidden_before_unregister() {
        let registry = ToolRegistry::new();
        let fs = ready_session("fs", ToolSet::new().with(NamedTool("read"))).await;
        let web = ready_session("web", ToolSet::new().with(NamedTool("fetch"))).await;
        registry.register(&fs).unwrap();
        registry.register(&web).unwrap();

        fs.close();
        assert!(!registry.has_provider("fs"));
        assert!(matches!(
            registry.resolve("fs/read"),
            Err(GatewayError::ToolNotFound { .. })
        ));
        assert_eq!(names(&registry), vec!["web/fetch"]);
        assert_eq!(registry.provider_tool_count("fs"), 0);
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.unregister(&fs.id()), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_see_all_or_nothing() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let registry = Arc::new(ToolRegistry::new());
        let fs = ready_session(
            "fs",
            ToolSet::new()
                .with(NamedTool("read"))
                .with(NamedTool("write"))
                .with(NamedTool("stat")),
        )
        .await;
        registry.register(&fs).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let stop = Arc::clone(&stop);
                let session_id = fs.id();
                tokio::spawn(async move {
                    let mut gone = false;
                    let mut observations = 0usize;
                    while !stop.load(Ordering::SeqCst) {
                        let visible = registry.list().iter().filter(|d| d.provider == "fs").count();
                        assert!(visible == 0 || visible == 3, "saw {} of 3 tools", visible);
                        if visible == 0 {
                            gone = true;
                        } else {
                            assert!(!gone, "tools reappeared after unregister");
                        }
                        match registry.resolve("fs/write") {
                            Ok(descriptor) => {
                                assert!(!gone);
                                assert_eq!(descriptor.session.id(), session_id);
                            }
                            Err(GatewayError::ToolNotFound { .. }) => gone = true,
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                        observations += 1;
                        tokio::task::yield_now().await;
                    }
                    observations
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.unregister(&fs.id()), 3);
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.store(true, Ordering::SeqCst);

        for reader in readers {
            assert!(reader.await.unwrap() > 0);
        }
        assert!(registry.resolve("fs/read").is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_reregister_replaces_previous_session() {
        let registry = ToolRegistry::new();
        let old = ready_session("fs", ToolSet::new().with(NamedTool("read")).with(NamedTool("stat"))).await;
        registry.register(&old).unwrap();

        let new = ready_session("fs", ToolSet::new().with(NamedTool("read"))).await;
        registry.register(&new).unwrap();
        assert_eq!(names(&registry), vec!["fs/read"]);
        assert_eq!(registry.resolve("fs/read").unwrap().session.id(), new.id());

        // The old session dying late must not take the new one's tools with it.
        assert_eq!(registry.unregister(&old.id()), 0);
        assert_eq!(registry.provider_tool_count("fs"), 1);
    }

    #[tokio::test]
    async fn test_register_requires_ready_session() {
        let registry = ToolRegistry::new();
        let session = connect("fs", ToolSet::new().with(NamedTool("read")));
        assert!(matches!(
            registry.register(&session),
            Err(GatewayError::ProviderStartupFailure { .. })
        ));
        assert!(registry.is_empty());
    }
}

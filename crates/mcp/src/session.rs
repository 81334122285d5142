//! Provider session: request/response correlation over a [`TransportChannel`].
//!
//! A session owns one provider connection. A single reader task drains the read half and
//! completes pending requests by ID; callers take turns on the write half only for the
//! duration of one frame. Closing the session (or the provider hanging up) fails every
//! request still waiting for an answer.

use crate::error::SessionError;
use crate::protocol::{
    ClientCapabilities, ClientInfo, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, ListToolsParams, ListToolsResult,
    ServerInfo, ToolSchema, PROTOCOL_VERSION,
};
use crate::transport::{ChannelReader, ChannelWriter, TransportChannel};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Name the gateway announces in `initialize`.
pub const CLIENT_NAME: &str = "toolgate";

/// Unique identifier of one session (one provider process incarnation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Initialization state as seen from outside the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Ready,
    Failed,
}

enum InitStatus {
    Uninitialized,
    Initializing,
    Ready {
        server_info: ServerInfo,
        tools: Arc<Vec<ToolSchema>>,
    },
    Failed(String),
}

type PendingSlot = oneshot::Sender<Result<JsonRpcResponse, SessionError>>;

/// A live JSON-RPC conversation with one provider.
pub struct ProviderSession {
    id: SessionId,
    provider: String,
    writer: tokio::sync::Mutex<ChannelWriter>,
    pending: Mutex<HashMap<u64, PendingSlot>>,
    next_id: AtomicU64,
    init: RwLock<InitStatus>,
    closed: CancellationToken,
}

impl ProviderSession {
    /// Take ownership of `channel` and spawn the reader task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(channel: TransportChannel) -> Arc<Self> {
        let provider = channel.provider().to_string();
        let (reader, writer) = channel.split();

        let session = Arc::new(Self {
            id: SessionId::new(),
            provider,
            writer: tokio::sync::Mutex::new(writer),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            init: RwLock::new(InitStatus::Uninitialized),
            closed: CancellationToken::new(),
        });

        tokio::spawn(Arc::clone(&session).read_loop(reader));
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn state(&self) -> SessionState {
        match &*self.init.read() {
            InitStatus::Uninitialized | InitStatus::Initializing => SessionState::Uninitialized,
            InitStatus::Ready { .. } => SessionState::Ready,
            InitStatus::Failed(_) => SessionState::Failed,
        }
    }

    /// Tools declared by the provider; empty until the session is ready.
    pub fn tools(&self) -> Arc<Vec<ToolSchema>> {
        match &*self.init.read() {
            InitStatus::Ready { tools, .. } => Arc::clone(tools),
            _ => Arc::new(Vec::new()),
        }
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        match &*self.init.read() {
            InitStatus::Ready { server_info, .. } => Some(server_info.clone()),
            _ => None,
        }
    }

    /// Why initialization failed, if it did.
    pub fn failure(&self) -> Option<String> {
        match &*self.init.read() {
            InitStatus::Failed(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.init.read(), InitStatus::Ready { .. })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the session is disconnected, for whatever reason.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Number of requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Run the MCP handshake: `initialize`, `notifications/initialized`, then `tools/list`
    /// (following `nextCursor` until exhausted). Runs at most once per session.
    pub async fn initialize(&self, timeout: Duration) -> Result<Arc<Vec<ToolSchema>>, SessionError> {
        {
            let mut init = self.init.write();
            if !matches!(*init, InitStatus::Uninitialized) {
                return Err(SessionError::AlreadyInitialized {
                    provider: self.provider.clone(),
                });
            }
            *init = InitStatus::Initializing;
        }

        let deadline = Instant::now() + timeout;
        match self.handshake(deadline).await {
            Ok((server_info, tools)) => {
                let tools = Arc::new(tools);
                info!(
                    provider = %self.provider,
                    server = %server_info.name,
                    version = %server_info.version,
                    tools = tools.len(),
                    "provider session ready"
                );
                *self.init.write() = InitStatus::Ready {
                    server_info,
                    tools: Arc::clone(&tools),
                };
                Ok(tools)
            }
            Err(e) => {
                warn!(provider = %self.provider, error = %e, "provider initialization failed");
                *self.init.write() = InitStatus::Failed(e.to_string());
                Err(e)
            }
        }
    }

    async fn handshake(&self, deadline: Instant) -> Result<(ServerInfo, Vec<ToolSchema>), SessionError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: CLIENT_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let result = self
            .request("initialize", Some(self.encode(&params)?), remaining(deadline))
            .await?;
        let init: InitializeResult = self.decode("initialize", result)?;

        if init.protocol_version != PROTOCOL_VERSION {
            warn!(
                provider = %self.provider,
                "provider speaks protocol '{}' (gateway supports '{}')",
                init.protocol_version,
                PROTOCOL_VERSION
            );
        }

        self.notify("notifications/initialized", None).await?;

        let mut tools = Vec::new();
        let mut cursor = None;
        loop {
            let params = ListToolsParams { cursor: cursor.take() };
            let result = self
                .request("tools/list", Some(self.encode(&params)?), remaining(deadline))
                .await?;
            let page: ListToolsResult = self.decode("tools/list", result)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok((init.server_info, tools))
    }

    /// Call `tool` on the provider and return its `result` payload verbatim.
    pub async fn invoke(&self, tool: &str, arguments: Value, timeout: Duration) -> Result<Value, SessionError> {
        if self.is_closed() {
            return Err(self.disconnected());
        }
        if !self.is_ready() {
            return Err(SessionError::NotReady {
                provider: self.provider.clone(),
            });
        }

        let params = json!({ "name": tool, "arguments": arguments });
        self.request("tools/call", Some(params), timeout).await
    }

    /// Send a request with a fresh ID and wait for the matching response.
    ///
    /// On timeout the pending slot is dropped; a late answer is discarded by the reader.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        // close() may have drained the table just before our insert.
        if self.is_closed() {
            self.pending.lock().remove(&id);
            return Err(self.disconnected());
        }

        debug!(provider = %self.provider, id, method, "sending request");
        let exchange = async {
            self.write(JsonRpcRequest::new(id, method, params).into()).await?;
            let response = rx.await.map_err(|_| self.disconnected())??;
            Ok::<_, SessionError>(response)
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(response)) => response.into_result().map_err(|error| SessionError::Rpc {
                provider: self.provider.clone(),
                error,
            }),
            Ok(Err(e)) => {
                self.pending.lock().remove(&id);
                Err(e)
            }
            Err(_) => {
                self.pending.lock().remove(&id);
                debug!(provider = %self.provider, id, method, "request timed out");
                Err(SessionError::Timeout {
                    provider: self.provider.clone(),
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(self.disconnected());
        }
        self.write(JsonRpcRequest::notification(method, params).into()).await
    }

    /// Disconnect: stop the reader and fail every pending request with `Disconnected`.
    pub fn close(&self) {
        self.closed.cancel();

        let drained: Vec<PendingSlot> = self.pending.lock().drain().map(|(_, slot)| slot).collect();
        if !drained.is_empty() {
            debug!(provider = %self.provider, count = drained.len(), "failing pending requests");
        }
        for slot in drained {
            let _ = slot.send(Err(self.disconnected()));
        }
    }

    /// Shut down the provider's input stream so it sees end of input.
    pub async fn close_input(&self) -> Result<(), SessionError> {
        self.writer.lock().await.close().await.map_err(SessionError::from)
    }

    async fn write(&self, message: JsonRpcMessage) -> Result<(), SessionError> {
        let mut writer = self.writer.lock().await;
        writer.send(message).await.map_err(SessionError::from)
    }

    async fn read_loop(self: Arc<Self>, mut reader: ChannelReader) {
        loop {
            let message = tokio::select! {
                _ = self.closed.cancelled() => break,
                message = reader.receive() => message,
            };

            match message {
                Ok(JsonRpcMessage::Response(response)) => self.complete(response),
                Ok(JsonRpcMessage::Request(request)) => self.handle_provider_request(request),
                Err(e) => {
                    match SessionError::from(e) {
                        SessionError::Disconnected { .. } => {
                            debug!(provider = %self.provider, "provider closed its output")
                        }
                        other => warn!(provider = %self.provider, error = %other, "provider stream failed"),
                    }
                    break;
                }
            }
        }

        self.close();
    }

    fn complete(&self, response: JsonRpcResponse) {
        let Some(id) = response.numeric_id() else {
            warn!(provider = %self.provider, id = %response.id, "response with non-numeric id");
            return;
        };

        match self.pending.lock().remove(&id) {
            Some(slot) => {
                let _ = slot.send(Ok(response));
            }
            None => debug!(provider = %self.provider, id, "dropping response for unknown or expired request"),
        }
    }

    fn handle_provider_request(self: &Arc<Self>, request: JsonRpcRequest) {
        let Some(id) = request.id else {
            debug!(provider = %self.provider, method = %request.method, "provider notification");
            return;
        };

        let response = match request.method.as_str() {
            "ping" => JsonRpcResponse::success(id, json!({})),
            other => {
                debug!(provider = %self.provider, method = other, "rejecting provider request");
                JsonRpcResponse::error(id, JsonRpcError::method_not_found(other))
            }
        };

        let session = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = session.write(response.into()).await {
                debug!(provider = %session.provider, error = %e, "failed to answer provider request");
            }
        });
    }

    fn encode<T: Serialize>(&self, params: &T) -> Result<Value, SessionError> {
        serde_json::to_value(params).map_err(|e| self.protocol(format!("failed to encode params: {}", e)))
    }

    fn decode<T: for<'de> Deserialize<'de>>(&self, method: &str, result: Value) -> Result<T, SessionError> {
        serde_json::from_value(result).map_err(|e| self.protocol(format!("invalid {} result: {}", method, e)))
    }

    fn protocol(&self, reason: String) -> SessionError {
        SessionError::Protocol {
            provider: self.provider.clone(),
            reason,
        }
    }

    fn disconnected(&self) -> SessionError {
        SessionError::Disconnected {
            provider: self.provider.clone(),
        }
    }
}

impl fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSession")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Framing;
    use crate::server::McpServer;
    use crate::tools::demo_tools;

    fn pipe(provider: &str) -> (Arc<ProviderSession>, TransportChannel) {
        let (gateway, remote) = tokio::io::duplex(64 * 1024);
        let (gateway_read, gateway_write) = tokio::io::split(gateway);
        let (remote_read, remote_write) = tokio::io::split(remote);
        let session = ProviderSession::start(TransportChannel::new(
            provider,
            gateway_read,
            gateway_write,
            Framing::Lines,
        ));
        let remote = TransportChannel::new(provider, remote_read, remote_write, Framing::Lines);
        (session, remote)
    }

    fn served(provider: &str, server: McpServer) -> Arc<ProviderSession> {
        let (gateway, remote) = tokio::io::duplex(64 * 1024);
        let (gateway_read, gateway_write) = tokio::io::split(gateway);
        let (remote_read, remote_write) = tokio::io::split(remote);
        tokio::spawn(async move { server.serve(remote_read, remote_write, Framing::Lines).await });
        ProviderSession::start(TransportChannel::new(
            provider,
            gateway_read,
            gateway_write,
            Framing::Lines,
        ))
    }

    async fn next_request(remote: &mut TransportChannel) -> JsonRpcRequest {
        match remote.receive().await.unwrap() {
            JsonRpcMessage::Request(request) => request,
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initialize_and_invoke() {
        let session = served("demo", McpServer::new("demo", "0.0.1", demo_tools()));
        assert_eq!(session.state(), SessionState::Uninitialized);

        let tools = session.initialize(Duration::from_secs(5)).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert!(tools.iter().any(|t| t.name == "echo"));
        assert_eq!(session.server_info().unwrap().name, "demo");

        let result = session
            .invoke("echo", json!({"text": "hi"}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result, json!({"text": "hi"}));
    }

    #[tokio::test]
    async fn test_initialize_runs_once() {
        let session = served("demo", McpServer::new("demo", "0.0.1", demo_tools()));
        session.initialize(Duration::from_secs(5)).await.unwrap();

        let err = session.initialize(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadyInitialized { .. }));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_invoke_requires_ready_session() {
        let (session, _remote) = pipe("early");
        let err = session
            .invoke("echo", json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotReady { ref provider } if provider == "early"));
    }

    #[tokio::test]
    async fn test_handshake_sends_initialized_and_follows_cursor() {
        let (session, mut remote) = pipe("paged");

        let provider = tokio::spawn(async move {
            let init = next_request(&mut remote).await;
            assert_eq!(init.method, "initialize");
            assert_eq!(init.params.as_ref().unwrap()["clientInfo"]["name"], "toolgate");
            remote
                .send(
                    JsonRpcResponse::success(
                        init.id.unwrap(),
                        json!({"protocolVersion": PROTOCOL_VERSION, "serverInfo": {"name": "paged", "version": "1"}}),
                    )
                    .into(),
                )
                .await
                .unwrap();

            let initialized = next_request(&mut remote).await;
            assert!(initialized.is_notification());
            assert_eq!(initialized.method, "notifications/initialized");

            let first = next_request(&mut remote).await;
            assert_eq!(first.method, "tools/list");
            remote
                .send(
                    JsonRpcResponse::success(
                        first.id.unwrap(),
                        json!({"tools": [{"name": "a"}], "nextCursor": "page-2"}),
                    )
                    .into(),
                )
                .await
                .unwrap();

            let second = next_request(&mut remote).await;
            assert_eq!(second.params.as_ref().unwrap()["cursor"], "page-2");
            remote
                .send(JsonRpcResponse::success(second.id.unwrap(), json!({"tools": [{"name": "b"}]})).into())
                .await
                .unwrap();
            remote
        });

        let tools = session.initialize(Duration::from_secs(5)).await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        let _remote = provider.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_handshake_marks_session_failed() {
        let (session, mut remote) = pipe("broken");

        tokio::spawn(async move {
            let init = next_request(&mut remote).await;
            remote
                .send(JsonRpcResponse::error(init.id.unwrap(), JsonRpcError::internal_error("boom")).into())
                .await
                .unwrap();
            remote
        });

        let err = session.initialize(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, SessionError::Rpc { ref error, .. } if error.message == "boom"));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.failure().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_responses_correlate_out_of_order() {
        let (session, mut remote) = pipe("shuffle");

        let mut calls = Vec::new();
        for n in 0..3 {
            let session = Arc::clone(&session);
            calls.push(tokio::spawn(async move {
                session
                    .request("tools/call", Some(json!({"n": n})), Duration::from_secs(5))
                    .await
            }));
        }

        let mut requests = Vec::new();
        for _ in 0..3 {
            requests.push(next_request(&mut remote).await);
        }
        for request in requests.into_iter().rev() {
            let n = request.params.as_ref().unwrap()["n"].clone();
            remote
                .send(JsonRpcResponse::success(request.id.unwrap(), json!({"n": n})).into())
                .await
                .unwrap();
        }

        for (n, call) in calls.into_iter().enumerate() {
            assert_eq!(call.await.unwrap().unwrap(), json!({"n": n}));
        }
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_fails_every_pending_request() {
        let (session, mut remote) = pipe("crashy");

        let mut calls = Vec::new();
        for _ in 0..3 {
            let session = Arc::clone(&session);
            calls.push(tokio::spawn(async move {
                session.request("tools/call", None, Duration::from_secs(5)).await
            }));
        }
        for _ in 0..3 {
            next_request(&mut remote).await;
        }
        drop(remote);

        for call in calls {
            let err = call.await.unwrap().unwrap_err();
            assert!(matches!(err, SessionError::Disconnected { ref provider } if provider == "crashy"));
        }
        session.closed().await;
        assert!(session.is_closed());
        assert_eq!(session.pending_count(), 0);

        let err = session.request("ping", None, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SessionError::Disconnected { .. }));
    }

    #[tokio::test]
    async fn test_timeout_releases_slot() {
        let (session, mut remote) = pipe("slow");

        let err = session
            .request("tools/call", None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout { ref method, .. } if method == "tools/call"));
        assert_eq!(session.pending_count(), 0);

        // The late answer is dropped; the session keeps working.
        let late = next_request(&mut remote).await;
        remote
            .send(JsonRpcResponse::success(late.id.unwrap(), json!("late")).into())
            .await
            .unwrap();
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_close_fails_pending_with_disconnected() {
        let (session, mut remote) = pipe("closing");

        let call = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.request("tools/call", None, Duration::from_secs(5)).await })
        };
        next_request(&mut remote).await;

        session.close();
        assert!(matches!(
            call.await.unwrap(),
            Err(SessionError::Disconnected { .. })
        ));
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_answers_provider_requests() {
        let (_session, mut remote) = pipe("chatty");

        remote
            .send(JsonRpcRequest::new(99, "ping", None).into())
            .await
            .unwrap();
        match remote.receive().await.unwrap() {
            JsonRpcMessage::Response(r) => {
                assert_eq!(r.numeric_id(), Some(99));
                assert_eq!(r.into_result().unwrap(), json!({}));
            }
            other => panic!("unexpected message {:?}", other),
        }

        remote
            .send(JsonRpcRequest::new(100, "sampling/createMessage", None).into())
            .await
            .unwrap();
        match remote.receive().await.unwrap() {
            JsonRpcMessage::Response(r) => assert_eq!(r.into_result().unwrap_err().code, -32601),
            other => panic!("unexpected message {:?}", other),
        }
    }
}

// MCP server implementation: serves a ToolSet over a framed byte stream (usually stdio)

use crate::codec::Framing;
use crate::error::TransportError;
use crate::protocol::{
    CallToolParams, InitializeResult, JsonRpcError, JsonRpcMessage, JsonRpcRequest,
    JsonRpcResponse, ListToolsParams, ListToolsResult, ServerCapabilities, ServerInfo,
    ToolsCapability, PROTOCOL_VERSION,
};
use crate::tools::ToolSet;
use crate::transport::TransportChannel;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Serves tools to a single MCP client.
///
/// Each request is handled on its own task, so a slow tool does not hold up the others and
/// responses may arrive out of order.
#[derive(Clone)]
pub struct McpServer {
    tools: Arc<ToolSet>,
    info: ServerInfo,
    page_size: Option<usize>,
}

impl McpServer {
    pub fn new(name: impl Into<String>, version: impl Into<String>, tools: ToolSet) -> Self {
        Self {
            tools: Arc::new(tools),
            info: ServerInfo {
                name: name.into(),
                version: version.into(),
            },
            page_size: None,
        }
    }

    /// Split `tools/list` answers into pages of at most `page_size` tools.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Serve requests read from `reader`, answering on `writer`, until end of input.
    pub async fn serve<R, W>(&self, reader: R, writer: W, framing: Framing) -> Result<(), TransportError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (mut reader, writer) = TransportChannel::new(&self.info.name, reader, writer, framing).split();
        let writer = Arc::new(tokio::sync::Mutex::new(writer));

        tracing::info!("MCP server '{}' serving {} tools", self.info.name, self.tools.len());

        loop {
            let request = match reader.receive().await {
                Ok(JsonRpcMessage::Request(request)) => request,
                Ok(JsonRpcMessage::Response(response)) => {
                    tracing::debug!("ignoring unsolicited response {}", response.id);
                    continue;
                }
                Err(TransportError::Disconnected { .. }) => {
                    tracing::info!("MCP client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            if request.is_notification() {
                tracing::debug!("notification: {}", request.method);
                continue;
            }

            let server = self.clone();
            let writer = Arc::clone(&writer);
            tokio::spawn(async move {
                let response = server.handle_request(request).await;
                if let Err(e) = writer.lock().await.send(response.into()).await {
                    tracing::warn!("failed to write response: {}", e);
                }
            });
        }
    }

    /// Answer one request.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.unwrap_or(Value::Null);

        match request.method.as_str() {
            "initialize" => JsonRpcResponse::from_serializable(
                id,
                &InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: ServerCapabilities {
                        tools: Some(ToolsCapability { list_changed: false }),
                        experimental: None,
                    },
                    server_info: self.info.clone(),
                },
            ),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => self.list_tools(id, request.params),
            "tools/call" => self.call_tool(id, request.params).await,
            other => JsonRpcResponse::error(id, JsonRpcError::method_not_found(other)),
        }
    }

    fn list_tools(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params: ListToolsParams = match params {
            Some(params) => match serde_json::from_value(params) {
                Ok(params) => params,
                Err(e) => return JsonRpcResponse::error(id, JsonRpcError::invalid_params(e.to_string())),
            },
            None => ListToolsParams::default(),
        };

        let schemas = self.tools.list_schemas();
        let Some(page_size) = self.page_size else {
            return JsonRpcResponse::from_serializable(
                id,
                &ListToolsResult {
                    tools: schemas,
                    next_cursor: None,
                },
            );
        };

        let start = match params.cursor.as_deref().map(str::parse::<usize>) {
            None => 0,
            Some(Ok(start)) if start <= schemas.len() => start,
            Some(_) => return JsonRpcResponse::error(id, JsonRpcError::invalid_params("invalid cursor")),
        };
        let end = (start + page_size).min(schemas.len());
        let next_cursor = (end < schemas.len()).then(|| end.to_string());

        JsonRpcResponse::from_serializable(
            id,
            &ListToolsResult {
                tools: schemas[start..end].to_vec(),
                next_cursor,
            },
        )
    }

    async fn call_tool(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params: CallToolParams = match params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => return JsonRpcResponse::error(id, JsonRpcError::invalid_params(e.to_string())),
            None => return JsonRpcResponse::error(id, JsonRpcError::invalid_params("missing params")),
        };

        let Some(tool) = self.tools.get(&params.name) else {
            return JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_params(format!("Unknown tool: {}", params.name)),
            );
        };

        tracing::debug!("calling tool {}", params.name);
        match tool.execute(params.arguments).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::error(id, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::demo_tools;

    fn server() -> McpServer {
        McpServer::new("demo", "0.0.1", demo_tools())
    }

    #[tokio::test]
    async fn test_initialize_reports_tools_capability() {
        let response = server()
            .handle_request(JsonRpcRequest::new(1, "initialize", None))
            .await;
        let result: InitializeResult = serde_json::from_value(response.into_result().unwrap()).unwrap();
        assert_eq!(result.protocol_version, PROTOCOL_VERSION);
        assert_eq!(result.server_info.name, "demo");
        assert!(result.capabilities.tools.is_some());
    }

    #[tokio::test]
    async fn test_call_tool() {
        let response = server()
            .handle_request(JsonRpcRequest::new(
                2,
                "tools/call",
                Some(json!({"name": "add", "arguments": {"a": 1, "b": 2}})),
            ))
            .await;
        assert_eq!(response.into_result().unwrap(), json!({"sum": 3.0}));
    }

    #[tokio::test]
    async fn test_unknown_tool_and_method() {
        let response = server()
            .handle_request(JsonRpcRequest::new(3, "tools/call", Some(json!({"name": "nope"}))))
            .await;
        assert_eq!(response.into_result().unwrap_err().code, -32602);

        let response = server()
            .handle_request(JsonRpcRequest::new(4, "resources/list", None))
            .await;
        assert_eq!(response.into_result().unwrap_err().code, -32601);
    }

    #[tokio::test]
    async fn test_paged_tool_list() {
        let server = server().with_page_size(3);

        let first = server
            .handle_request(JsonRpcRequest::new(5, "tools/list", None))
            .await;
        let first: ListToolsResult = serde_json::from_value(first.into_result().unwrap()).unwrap();
        assert_eq!(first.tools.len(), 3);
        assert_eq!(first.next_cursor.as_deref(), Some("3"));

        let second = server
            .handle_request(JsonRpcRequest::new(6, "tools/list", Some(json!({"cursor": "3"}))))
            .await;
        let second: ListToolsResult = serde_json::from_value(second.into_result().unwrap()).unwrap();
        assert_eq!(second.tools.len(), 1);
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_serve_interleaves_responses() {
        let (client, remote) = tokio::io::duplex(16 * 1024);
        let (remote_read, remote_write) = tokio::io::split(remote);
        let handle = tokio::spawn(async move { server().serve(remote_read, remote_write, Framing::Lines).await });

        let (client_read, client_write) = tokio::io::split(client);
        let mut client = TransportChannel::new("demo", client_read, client_write, Framing::Lines);
        client
            .send(
                JsonRpcRequest::new(1, "tools/call", Some(json!({"name": "sleep", "arguments": {"ms": 200}})))
                    .into(),
            )
            .await
            .unwrap();
        client
            .send(JsonRpcRequest::new(2, "ping", None).into())
            .await
            .unwrap();

        let mut order = Vec::new();
        for _ in 0..2 {
            match client.receive().await.unwrap() {
                JsonRpcMessage::Response(r) => order.push(r.numeric_id().unwrap()),
                other => panic!("unexpected message {:?}", other),
            }
        }
        assert_eq!(order, vec![2, 1]);

        drop(client);
        handle.await.unwrap().unwrap();
    }
}

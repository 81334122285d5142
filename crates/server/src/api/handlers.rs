use super::{ApiError, ApiResult};
use crate::config::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use toolgate_core::registry::qualify;
use toolgate_core::{HealthReport, ToolInfo};

#[derive(Debug, Serialize, Deserialize)]
pub struct ListToolsResponse {
    pub tools: Vec<ToolInfo>,
}

/// List every tool currently published
pub async fn list_tools(State(state): State<Arc<AppState>>) -> Json<ListToolsResponse> {
    Json(ListToolsResponse {
        tools: state.gateway.list_tools(),
    })
}

/// Invoke `<provider>/<tool>` with the request body as arguments
pub async fn invoke_tool(
    State(state): State<Arc<AppState>>,
    Path((provider, tool)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let arguments = parse_arguments(&body)?;
    let result = state.gateway.dispatch(&qualify(&provider, &tool), arguments).await?;
    Ok(Json(result))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(state.gateway.health())
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// JSON-RPC style endpoint: `tools/list` and `tools/call`
pub async fn message(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult<Json<Value>> {
    let request: MessageRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::MalformedBody(format!("invalid message: {}", e)))?;
    tracing::debug!("Received message: {}", request.method);

    match request.method.as_str() {
        "tools/list" => Ok(Json(serde_json::json!({
            "tools": state.gateway.list_tools(),
        }))),
        "tools/call" => {
            let params: CallParams = request
                .params
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| ApiError::MalformedBody(format!("invalid tools/call params: {}", e)))?
                .ok_or_else(|| ApiError::MalformedBody("tools/call requires params".to_string()))?;
            let arguments = match params.arguments {
                None | Some(Value::Null) => empty_object(),
                Some(arguments) => require_object(arguments)?,
            };
            let result = state.gateway.dispatch(&params.name, arguments).await?;
            Ok(Json(result))
        }
        other => Err(ApiError::UnknownMethod(other.to_string())),
    }
}

/// An empty body means no arguments.
fn parse_arguments(body: &[u8]) -> ApiResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(empty_object());
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::MalformedBody(format!("malformed JSON body: {}", e)))?;
    require_object(value)
}

fn require_object(value: Value) -> ApiResult<Value> {
    if value.is_object() {
        Ok(value)
    } else {
        Err(ApiError::MalformedBody("arguments must be a JSON object".to_string()))
    }
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

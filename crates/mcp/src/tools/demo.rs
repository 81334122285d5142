// Demo tools served by the toolgate-echo provider

use crate::protocol::{JsonRpcError, ToolSchema};
use crate::tools::{
    json_schema_integer, json_schema_number, json_schema_object, json_schema_string, Tool, ToolSet,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Error code the `fail` tool answers with.
pub const FAIL_ERROR_CODE: i32 = -32000;

/// Every demo tool in one set.
pub fn demo_tools() -> ToolSet {
    ToolSet::new()
        .with(EchoTool)
        .with(AddTool)
        .with(SleepTool)
        .with(FailTool)
}

fn parse_args<T: for<'de> Deserialize<'de>>(tool: &str, arguments: Value) -> Result<T, JsonRpcError> {
    serde_json::from_value(arguments)
        .map_err(|e| JsonRpcError::invalid_params(format!("invalid arguments for {}: {}", tool, e)))
}

/// Returns its arguments unchanged.
pub struct EchoTool;

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "echo".to_string(),
            description: "Echo the arguments back".to_string(),
            input_schema: json_schema_object(
                json!({ "text": json_schema_string("Text to echo") }),
                vec!["text"],
            ),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<Value, JsonRpcError> {
        Ok(arguments)
    }
}

pub struct AddTool;

#[derive(Debug, Deserialize)]
struct AddArgs {
    a: f64,
    b: f64,
}

#[async_trait::async_trait]
impl Tool for AddTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "add".to_string(),
            description: "Add two numbers".to_string(),
            input_schema: json_schema_object(
                json!({
                    "a": json_schema_number("First operand"),
                    "b": json_schema_number("Second operand")
                }),
                vec!["a", "b"],
            ),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<Value, JsonRpcError> {
        let args: AddArgs = parse_args("add", arguments)?;
        Ok(json!({ "sum": args.a + args.b }))
    }
}

/// Waits before answering; used to exercise deadlines.
pub struct SleepTool;

#[derive(Debug, Deserialize)]
struct SleepArgs {
    ms: u64,
}

#[async_trait::async_trait]
impl Tool for SleepTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "sleep".to_string(),
            description: "Sleep for the given number of milliseconds".to_string(),
            input_schema: json_schema_object(
                json!({ "ms": json_schema_integer("Milliseconds to sleep") }),
                vec!["ms"],
            ),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<Value, JsonRpcError> {
        let args: SleepArgs = parse_args("sleep", arguments)?;
        tokio::time::sleep(Duration::from_millis(args.ms)).await;
        Ok(json!({ "slept_ms": args.ms }))
    }
}

/// Always answers with a JSON-RPC error.
pub struct FailTool;

#[async_trait::async_trait]
impl Tool for FailTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "fail".to_string(),
            description: "Fail with the given message".to_string(),
            input_schema: json_schema_object(
                json!({ "message": json_schema_string("Error message") }),
                vec![],
            ),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<Value, JsonRpcError> {
        let message = arguments
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("requested failure");
        Err(JsonRpcError::custom(FAIL_ERROR_CODE, message).with_data(arguments.clone()))
    }
}

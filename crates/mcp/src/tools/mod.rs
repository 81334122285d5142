mod demo;
mod registry;

pub use demo::{demo_tools, AddTool, EchoTool, FailTool, SleepTool};
pub use registry::{
    json_schema_array, json_schema_boolean, json_schema_integer, json_schema_number,
    json_schema_object, json_schema_string, Tool, ToolSet,
};

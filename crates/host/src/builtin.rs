// In-process servers shipped with the gateway binary

use anyhow::Context;
use mcpbroker_core::capability::{self, Capabilities};
use mcpbroker_core::config::ResourceConfig;
use mcpbroker_core::resource::FilesystemProvider;
use mcpbroker_mcp::{json_schema_number, json_schema_object, McpServer, ToolDescriptor};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

pub const CALCULATOR_SERVER_ID: &str = "calculator";
pub const FILES_SERVER_ID: &str = "files";

fn operand(args: &Value, name: &str) -> anyhow::Result<f64> {
    args.get(name)
        .and_then(Value::as_f64)
        .with_context(|| format!("missing numeric argument '{}'", name))
}

// Integer operands give an integer result whenever `exact` can produce one
fn arithmetic(
    args: &Value,
    exact: fn(i64, i64) -> Option<i64>,
    float: fn(f64, f64) -> f64,
) -> anyhow::Result<Value> {
    let (a, b) = (operand(args, "a")?, operand(args, "b")?);
    let integers = args
        .get("a")
        .and_then(Value::as_i64)
        .zip(args.get("b").and_then(Value::as_i64));

    match integers.and_then(|(a, b)| exact(a, b)) {
        Some(result) => Ok(json!(result)),
        None => Ok(json!(float(a, b))),
    }
}

/// Arithmetic tools: add, subtract, multiply, divide
pub async fn calculator_server() -> McpServer {
    let server = McpServer::builder(CALCULATOR_SERVER_ID)
        .name("Calculator")
        .description("Basic arithmetic over two operands")
        .capabilities(Capabilities::new().with(capability::TOOLS).with(capability::BATCH))
        .build();

    let schema = json_schema_object(
        json!({
            "a": json_schema_number("Left operand"),
            "b": json_schema_number("Right operand")
        }),
        vec!["a", "b"],
    );
    let output = json_schema_number("Result");

    server
        .register_tool(
            ToolDescriptor::new("add", "Add two numbers", schema.clone()).with_output_schema(output.clone()),
            |args| async move { arithmetic(&args, i64::checked_add, |a, b| a + b) },
        )
        .await;
    server
        .register_tool(
            ToolDescriptor::new("subtract", "Subtract b from a", schema.clone())
                .with_output_schema(output.clone()),
            |args| async move { arithmetic(&args, i64::checked_sub, |a, b| a - b) },
        )
        .await;
    server
        .register_tool(
            ToolDescriptor::new("multiply", "Multiply two numbers", schema.clone())
                .with_output_schema(output.clone()),
            |args| async move { arithmetic(&args, i64::checked_mul, |a, b| a * b) },
        )
        .await;
    server
        .register_tool(
            ToolDescriptor::new("divide", "Divide a by b", schema).with_output_schema(output),
            |args| async move {
                if operand(&args, "b")? == 0.0 {
                    anyhow::bail!("division by zero");
                }
                arithmetic(
                    &args,
                    |a, b| a.checked_rem(b).filter(|r| *r == 0).and_then(|_| a.checked_div(b)),
                    |a, b| a / b,
                )
            },
        )
        .await;

    server
}

/// Serves `root` as `resource://files/...`
pub async fn files_server(root: impl Into<PathBuf>, config: ResourceConfig) -> McpServer {
    let root = root.into();
    let server = McpServer::builder(FILES_SERVER_ID)
        .name("Files")
        .description(format!("Files under {}", root.display()))
        .resource_config(config)
        .build();

    server
        .resources()
        .register_provider(Arc::new(FilesystemProvider::new(FILES_SERVER_ID, root)))
        .await;
    server
}

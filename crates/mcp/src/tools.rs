// MCP tool registry

use crate::protocol::{CallToolResult, ToolDescriptor};
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Tool executor trait
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Explicit descriptor advertised to clients
    fn descriptor(&self) -> ToolDescriptor;

    /// Execute the tool with given arguments
    async fn execute(&self, arguments: Value) -> Result<CallToolResult>;
}

/// Tool backed by an async closure returning a JSON value
pub struct FnTool<F> {
    descriptor: ToolDescriptor,
    handler: F,
}

impl<F, Fut> FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    pub fn new(descriptor: ToolDescriptor, handler: F) -> Self {
        Self { descriptor, handler }
    }
}

#[async_trait::async_trait]
impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }

    async fn execute(&self, arguments: Value) -> Result<CallToolResult> {
        let value = (self.handler)(arguments).await?;
        Ok(CallToolResult::structured(value))
    }
}

/// Tool registry for managing available tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool; an existing tool with the same name is replaced
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let descriptor = tool.descriptor();
        if self.tools.insert(descriptor.name.clone(), tool).is_some() {
            tracing::debug!(tool = %descriptor.name, "Replaced tool");
        } else {
            tracing::info!(tool = %descriptor.name, dangerous = descriptor.dangerous, "Registered tool");
        }
    }

    /// Register an async closure under `descriptor`
    pub fn register_fn<F, Fut>(&mut self, descriptor: ToolDescriptor, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(Arc::new(FnTool::new(descriptor, handler)));
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All descriptors, sorted by name
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<_> = self.tools.values().map(|t| t.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Check if a tool exists
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// Helper functions for creating tool schemas

pub fn json_schema_object(properties: Value, required: Vec<&str>) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

pub fn json_schema_string(description: &str) -> Value {
    serde_json::json!({
        "type": "string",
        "description": description
    })
}

pub fn json_schema_number(description: &str) -> Value {
    serde_json::json!({
        "type": "number",
        "description": description
    })
}

pub fn json_schema_boolean(description: &str) -> Value {
    serde_json::json!({
        "type": "boolean",
        "description": description
    })
}

pub fn json_schema_array(items: Value, description: &str) -> Value {
    serde_json::json!({
        "type": "array",
        "items": items,
        "description": description
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_descriptor(description: &str) -> ToolDescriptor {
        ToolDescriptor::new(
            "echo",
            description,
            json_schema_object(json!({"value": json_schema_string("Anything")}), vec!["value"]),
        )
    }

    #[tokio::test]
    async fn test_register_fn_and_execute() {
        let mut registry = ToolRegistry::new();
        registry.register_fn(echo_descriptor("Echo"), |args| async move {
            Ok::<_, anyhow::Error>(args["value"].clone())
        });

        let tool = registry.get("echo").unwrap();
        let result = tool.execute(json!({"value": "hi"})).await.unwrap();
        assert_eq!(result.structured_content, Some(json!("hi")));
        assert_eq!(result.joined_text(), "hi");
    }

    #[test]
    fn test_duplicate_overwrites() {
        let mut registry = ToolRegistry::new();
        registry.register_fn(echo_descriptor("first"), |args| async move { Ok::<_, anyhow::Error>(args) });
        registry.register_fn(echo_descriptor("second"), |args| async move { Ok::<_, anyhow::Error>(args) });
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list()[0].description, "second");
    }

    #[test]
    fn test_schema_helpers() {
        let schema = json_schema_object(
            json!({
                "a": json_schema_number("First"),
                "flags": json_schema_array(json_schema_boolean("Flag"), "Flags")
            }),
            vec!["a"],
        );
        assert_eq!(schema["required"], json!(["a"]));
        assert_eq!(schema["properties"]["flags"]["items"]["type"], "boolean");
    }
}

// MCP protocol payloads carried inside JSON-RPC 2.0 messages

use mcpbroker_core::capability::Capabilities;
use mcpbroker_core::resource::ResourceDescriptor;
use mcpbroker_core::{ConsentLevel, StreamId, SubscriptionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Standard method names every MCP server answers
pub mod methods {
    pub const NEGOTIATE: &str = "capabilities/negotiate";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_GET: &str = "tools/get";
    pub const TOOLS_EXECUTE: &str = "tools/execute";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_READ: &str = "resources/read";
    pub const RESOURCES_STREAM_NEXT: &str = "resources/stream/next";
    pub const RESOURCES_STREAM_CLOSE: &str = "resources/stream/close";
    pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
    pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";
}

/// Static description of a server, as registered with a host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Consent level each method needs; unlisted methods need `basic`
    #[serde(default)]
    pub required_levels: BTreeMap<String, ConsentLevel>,
}

impl ServerInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            capabilities: Capabilities::default(),
            required_levels: BTreeMap::new(),
        }
    }

    pub fn required_level(&self, method: &str) -> ConsentLevel {
        self.required_levels
            .get(method)
            .copied()
            .unwrap_or(ConsentLevel::Basic)
    }
}

/// Tool definition for MCP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(rename = "outputSchema", default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Side effects that warrant extra care from callers
    #[serde(default)]
    pub dangerous: bool,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            output_schema: None,
            dangerous: false,
        }
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn dangerous(mut self) -> Self {
        self.dangerous = true;
        self
    }
}

/// List tools response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetToolParams {
    pub name: String,
}

/// Execute tool request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Execute tool response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "structuredContent", default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(rename = "isError", default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    /// A result carrying `value` both as structured content and as text
    pub fn structured(value: Value) -> Self {
        let text = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            content: vec![ToolContent::text(text)],
            structured_content: Some(value),
            is_error: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            structured_content: None,
            is_error: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::error(text)],
            structured_content: None,
            is_error: Some(true),
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }

    /// All text content joined by newlines
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|content| match content {
                ToolContent::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Text {
            text: format!("Error: {}", text.into()),
        }
    }
}

/// Negotiation request params
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NegotiateParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub capabilities: Capabilities,
}

/// Negotiation response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiateResult {
    pub server_id: String,
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub name: String,
    pub version: String,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResourcesResult {
    pub resources: Vec<ResourceDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamParams {
    pub stream_id: StreamId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseStreamResult {
    pub closed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeParams {
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeResult {
    pub subscription_id: SubscriptionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeParams {
    pub subscription_id: SubscriptionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeResult {
    pub removed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_level_defaults_to_basic() {
        let mut info = ServerInfo::new("s", "1.0");
        info.required_levels
            .insert("admin_reset".to_string(), ConsentLevel::Full);
        assert_eq!(info.required_level("admin_reset"), ConsentLevel::Full);
        assert_eq!(info.required_level("tools/list"), ConsentLevel::Basic);
    }

    #[test]
    fn test_descriptor_wire_names() {
        let descriptor = ToolDescriptor::new("rm", "Delete things", json!({"type": "object"}))
            .with_output_schema(json!({"type": "boolean"}))
            .dangerous();
        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(value["inputSchema"]["type"], "object");
        assert_eq!(value["outputSchema"]["type"], "boolean");
        assert_eq!(value["dangerous"], true);
    }

    #[test]
    fn test_structured_result() {
        let result = CallToolResult::structured(json!(5.0));
        assert_eq!(result.joined_text(), "5.0");
        assert!(!result.is_error());
        assert!(CallToolResult::error("bad").is_error());
    }
}

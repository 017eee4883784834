// MCP (Model Context Protocol) server and client built on the core JSON-RPC runtime

pub mod client;
pub mod protocol;
pub mod server;
pub mod tools;

pub use client::{ClientError, ConnectionState, Connector, DirectConnector, McpClient, ToolProxy};
pub use protocol::{CallToolResult, ServerInfo, ToolContent, ToolDescriptor};
pub use server::{McpServer, McpServerBuilder};
pub use tools::{
    json_schema_array, json_schema_boolean, json_schema_number, json_schema_object,
    json_schema_string, FnTool, Tool, ToolRegistry,
};

// Host side of mcpbroker: consent-checked routing between MCP clients and servers

pub mod builtin;
pub mod config;
pub mod connector;
pub mod gateway;
pub mod host;

pub use config::{ConfigError, HostConfig};
pub use connector::{HostConnector, HostTransport};
pub use host::{ClientInfo, ClientRegistration, Host, HostError, ServerRegistration, ServerSummary};

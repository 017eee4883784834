// Core protocol runtime for mcpbroker

pub mod types;
pub mod jsonrpc;
pub mod consent;
pub mod capability;
pub mod config;
pub mod resource;

pub use types::*;

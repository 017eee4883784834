// JSON-RPC 2.0 error objects and the code table used across the broker

use serde::{Deserialize, Serialize};

// Reserved by JSON-RPC 2.0.
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

// Implementation-defined server errors (-32000..=-32099).
pub const SERVER_ERROR_MIN: i32 = -32099;
pub const SERVER_ERROR_MAX: i32 = -32000;
pub const CONSENT_DENIED: i32 = -32001;
pub const RESOURCE_NOT_FOUND: i32 = -32002;
pub const STREAM_STATE_ERROR: i32 = -32003;
pub const SERVER_NOT_FOUND: i32 = -32004;
pub const DATA_INTEGRITY_ERROR: i32 = -32005;
pub const CAPABILITY_NOT_SUPPORTED: i32 = -32006;

/// Classification of an error code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    /// Implementation-defined code in the reserved server range
    Server(i32),
    /// Anything outside the reserved ranges (application codes)
    Application(i32),
}

impl ErrorKind {
    pub fn from_code(code: i32) -> Self {
        match code {
            PARSE_ERROR => Self::ParseError,
            INVALID_REQUEST => Self::InvalidRequest,
            METHOD_NOT_FOUND => Self::MethodNotFound,
            INVALID_PARAMS => Self::InvalidParams,
            INTERNAL_ERROR => Self::InternalError,
            SERVER_ERROR_MIN..=SERVER_ERROR_MAX => Self::Server(code),
            other => Self::Application(other),
        }
    }
}

/// JSON-RPC 2.0 Error
///
/// This is the single error kind every protocol failure surfaces as, whether it
/// was produced remotely or by local validation before a request was sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(PARSE_ERROR, "Parse error").with_data(serde_json::Value::String(detail.into()))
    }

    pub fn invalid_request(violations: Vec<String>) -> Self {
        Self::new(INVALID_REQUEST, "Invalid Request").with_data(serde_json::json!(violations))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal_error(detail: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, "Internal error").with_data(serde_json::Value::String(detail.into()))
    }

    pub fn custom(code: i32, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_code(self.code)
    }
}

// JSON-RPC 2.0 message types and their wire codec

use super::error::JsonRpcError;
use super::validate::{validate_batch, validate_request, validate_response};
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier: a string or an integer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::String(s) => Value::String(s.clone()),
        }
    }

    /// Interpret a raw `id` value; `None` for null, fractional or non-scalar ids
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Number(n) => n.as_i64().map(Self::Number),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// JSON-RPC 2.0 Request (a notification when `id` is absent)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("jsonrpc".to_string(), Value::String(self.jsonrpc.clone()));
        if let Some(id) = &self.id {
            map.insert("id".to_string(), id.to_value());
        }
        map.insert("method".to_string(), Value::String(self.method.clone()));
        if let Some(params) = &self.params {
            map.insert("params".to_string(), params.clone());
        }
        Value::Object(map)
    }

    /// Validate and decode a single request or notification
    pub fn from_value(value: Value) -> Result<Self, JsonRpcError> {
        validate_request(&value).into_result()?;
        serde_json::from_value(value)
            .map_err(|e| JsonRpcError::invalid_request(vec![e.to_string()]))
    }
}

/// Outcome carried by a response: exactly one of `result` or `error`
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Result(Value),
    Error(JsonRpcError),
}

/// JSON-RPC 2.0 Response
///
/// `id` is `None` only for errors that could not be attributed to a request
/// (parse failures, unidentifiable invalid requests); it serializes as `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcResponse {
    pub id: Option<RequestId>,
    pub outcome: ResponseOutcome,
}

impl JsonRpcResponse {
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            id: Some(id.into()),
            outcome: ResponseOutcome::Result(result),
        }
    }

    pub fn error(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            id,
            outcome: ResponseOutcome::Error(error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ResponseOutcome::Error(_))
    }

    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.outcome {
            ResponseOutcome::Result(value) => Ok(value),
            ResponseOutcome::Error(error) => Err(error),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("jsonrpc".to_string(), Value::String(JSONRPC_VERSION.to_string()));
        map.insert(
            "id".to_string(),
            self.id.as_ref().map(RequestId::to_value).unwrap_or(Value::Null),
        );
        match &self.outcome {
            ResponseOutcome::Result(result) => {
                map.insert("result".to_string(), result.clone());
            }
            ResponseOutcome::Error(error) => {
                map.insert("error".to_string(), error_to_value(error));
            }
        }
        Value::Object(map)
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    /// Validate and decode a single response object
    pub fn from_value(value: Value) -> Result<Self, JsonRpcError> {
        validate_response(&value).into_result()?;

        let Value::Object(mut map) = value else {
            return Err(JsonRpcError::invalid_request(vec![
                "response must be an object".to_string(),
            ]));
        };

        let id = map.get("id").and_then(RequestId::from_value);
        let outcome = match map.remove("error") {
            Some(error) => ResponseOutcome::Error(
                serde_json::from_value(error)
                    .map_err(|e| JsonRpcError::invalid_request(vec![e.to_string()]))?,
            ),
            None => ResponseOutcome::Result(map.remove("result").unwrap_or(Value::Null)),
        };

        Ok(Self { id, outcome })
    }
}

impl Serialize for JsonRpcResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("jsonrpc", JSONRPC_VERSION)?;
        map.serialize_entry("id", &self.id)?;
        match &self.outcome {
            ResponseOutcome::Result(result) => map.serialize_entry("result", result)?,
            ResponseOutcome::Error(error) => map.serialize_entry("error", error)?,
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for JsonRpcResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(D::Error::custom)
    }
}

fn error_to_value(error: &JsonRpcError) -> Value {
    let mut map = Map::new();
    map.insert("code".to_string(), Value::from(error.code));
    map.insert("message".to_string(), Value::String(error.message.clone()));
    if let Some(data) = &error.data {
        map.insert("data".to_string(), data.clone());
    }
    Value::Object(map)
}

/// Any JSON-RPC 2.0 message
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcRequest),
    Response(JsonRpcResponse),
    ErrorResponse(JsonRpcResponse),
    BatchRequest(Vec<JsonRpcRequest>),
    BatchResponse(Vec<JsonRpcResponse>),
}

impl JsonRpcMessage {
    /// Classify and decode a parsed JSON value
    pub fn from_value(value: Value) -> Result<Self, JsonRpcError> {
        if value.is_array() {
            validate_batch(&value).into_result()?;
        }

        match value {
            Value::Array(items) => {
                if items.first().is_some_and(|item| item.get("method").is_some()) {
                    let requests = items
                        .into_iter()
                        .map(JsonRpcRequest::from_value)
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(Self::BatchRequest(requests))
                } else {
                    let responses = items
                        .into_iter()
                        .map(JsonRpcResponse::from_value)
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(Self::BatchResponse(responses))
                }
            }
            value if value.get("method").is_some() => {
                let request = JsonRpcRequest::from_value(value)?;
                if request.is_notification() {
                    Ok(Self::Notification(request))
                } else {
                    Ok(Self::Request(request))
                }
            }
            value => {
                let response = JsonRpcResponse::from_value(value)?;
                if response.is_error() {
                    Ok(Self::ErrorResponse(response))
                } else {
                    Ok(Self::Response(response))
                }
            }
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Request(request) | Self::Notification(request) => request.to_value(),
            Self::Response(response) | Self::ErrorResponse(response) => response.to_value(),
            Self::BatchRequest(requests) => {
                Value::Array(requests.iter().map(JsonRpcRequest::to_value).collect())
            }
            Self::BatchResponse(responses) => {
                Value::Array(responses.iter().map(JsonRpcResponse::to_value).collect())
            }
        }
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }
}

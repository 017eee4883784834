// Structural validation of JSON-RPC 2.0 messages

use super::error::JsonRpcError;
use super::message::{RequestId, JSONRPC_VERSION};
use serde_json::Value;

/// Outcome of validating a message: the list of violations found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub violations: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    fn push(&mut self, violation: impl Into<String>) {
        self.violations.push(violation.into());
    }

    /// Convert into an Invalid Request error carrying the violations as `data`
    pub fn into_result(self) -> Result<(), JsonRpcError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(JsonRpcError::invalid_request(self.violations))
        }
    }
}

/// Parse raw text into a JSON value
pub fn parse(raw: &str) -> Result<Value, JsonRpcError> {
    serde_json::from_str(raw).map_err(|e| JsonRpcError::parse_error(e.to_string()))
}

fn check_version(object: &serde_json::Map<String, Value>, result: &mut ValidationResult) {
    match object.get("jsonrpc") {
        Some(Value::String(version)) if version == JSONRPC_VERSION => {}
        Some(_) => result.push("jsonrpc must be exactly \"2.0\""),
        None => result.push("missing jsonrpc member"),
    }
}

/// Validate a request or notification
pub fn validate_request(message: &Value) -> ValidationResult {
    let mut result = ValidationResult::default();

    let Some(object) = message.as_object() else {
        result.push("request must be a JSON object");
        return result;
    };

    check_version(object, &mut result);

    match object.get("method") {
        Some(Value::String(method)) if method.is_empty() => {
            result.push("method must not be empty")
        }
        Some(Value::String(_)) => {}
        Some(_) => result.push("method must be a string"),
        None => result.push("missing method member"),
    }

    if let Some(id) = object.get("id") {
        if RequestId::from_value(id).is_none() {
            result.push("id must be a string or an integer");
        }
    }

    match object.get("params") {
        None | Some(Value::Object(_)) | Some(Value::Array(_)) => {}
        Some(_) => result.push("params must be an object or an array"),
    }

    result
}

/// Validate a response or error response
pub fn validate_response(message: &Value) -> ValidationResult {
    let mut result = ValidationResult::default();

    let Some(object) = message.as_object() else {
        result.push("response must be a JSON object");
        return result;
    };

    check_version(object, &mut result);

    match object.get("id") {
        None => result.push("missing id member"),
        Some(Value::Null) => {}
        Some(id) if RequestId::from_value(id).is_none() => {
            result.push("id must be a string, an integer or null")
        }
        Some(_) => {}
    }

    match (object.get("result"), object.get("error")) {
        (Some(_), Some(_)) => result.push("response must not contain both result and error"),
        (None, None) => result.push("response must contain result or error"),
        (None, Some(error)) => validate_error_object(error, &mut result),
        (Some(_), None) => {}
    }

    result
}

fn validate_error_object(error: &Value, result: &mut ValidationResult) {
    let Some(error) = error.as_object() else {
        result.push("error must be an object");
        return;
    };

    let code_is_integer = error
        .get("code")
        .and_then(Value::as_i64)
        .is_some_and(|code| i32::try_from(code).is_ok());
    if !code_is_integer {
        result.push("error.code must be an integer");
    }

    if !error.get("message").is_some_and(Value::is_string) {
        result.push("error.message must be a string");
    }
}

/// Validate the batch envelope only; members are checked individually
pub fn validate_batch(message: &Value) -> ValidationResult {
    let mut result = ValidationResult::default();

    match message.as_array() {
        Some(items) if items.is_empty() => result.push("batch must not be empty"),
        Some(_) => {}
        None => result.push("batch must be a JSON array"),
    }

    result
}

/// Recover the id of a (possibly malformed) message where it can be derived
pub fn extract_id(message: &Value) -> Option<RequestId> {
    message.get("id").and_then(RequestId::from_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_error() {
        let err = parse("{\"jsonrpc\": ").unwrap_err();
        assert_eq!(err.code, -32700);
    }

    #[test]
    fn test_valid_request() {
        let request = json!({"jsonrpc": "2.0", "id": "1", "method": "add", "params": {"a": 1}});
        assert!(validate_request(&request).is_valid());

        let notification = json!({"jsonrpc": "2.0", "method": "tick", "params": [1, 2]});
        assert!(validate_request(&notification).is_valid());
    }

    #[test]
    fn test_request_violations_are_collected() {
        let request = json!({"jsonrpc": "1.0", "id": true, "method": "", "params": 3});
        let result = validate_request(&request);
        assert_eq!(result.violations.len(), 4);

        let err = result.into_result().unwrap_err();
        assert_eq!(err.code, -32600);
        assert_eq!(err.data.unwrap().as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_null_and_fractional_request_ids_rejected() {
        assert!(!validate_request(&json!({"jsonrpc": "2.0", "id": null, "method": "m"})).is_valid());
        assert!(!validate_request(&json!({"jsonrpc": "2.0", "id": 1.5, "method": "m"})).is_valid());
    }

    #[test]
    fn test_response_requires_exactly_one_outcome() {
        assert!(validate_response(&json!({"jsonrpc": "2.0", "id": 1, "result": 2})).is_valid());
        assert!(validate_response(&json!({
            "jsonrpc": "2.0", "id": null,
            "error": {"code": -32700, "message": "Parse error"}
        }))
        .is_valid());
        assert!(!validate_response(&json!({"jsonrpc": "2.0", "id": 1})).is_valid());
        assert!(!validate_response(&json!({"jsonrpc": "2.0", "result": 1})).is_valid());
        assert!(!validate_response(&json!({
            "jsonrpc": "2.0", "id": 1, "error": {"code": "x", "message": 4}
        }))
        .is_valid());
    }

    #[test]
    fn test_batch_envelope() {
        assert!(!validate_batch(&json!([])).is_valid());
        assert!(!validate_batch(&json!({"jsonrpc": "2.0"})).is_valid());
        // Malformed members do not fail the envelope
        assert!(validate_batch(&json!([1, 2, 3])).is_valid());
    }

    #[test]
    fn test_extract_id() {
        assert_eq!(extract_id(&json!({"id": 4, "method": 9})), Some(RequestId::Number(4)));
        assert_eq!(extract_id(&json!({"id": [1]})), None);
        assert_eq!(extract_id(&json!("text")), None);
    }
}

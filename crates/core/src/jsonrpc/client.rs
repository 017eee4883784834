// JSON-RPC 2.0 client: typed call / notify / batch over an abstract transport

use super::error::JsonRpcError;
use super::message::{JsonRpcRequest, JsonRpcResponse, RequestId};
use super::transport::{Transport, TransportError};
use super::validate::{parse, validate_batch, validate_request};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Error returned by client operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    /// Any JSON-RPC level failure, remote or from local validation
    #[error(transparent)]
    Rpc(#[from] JsonRpcError),

    /// The channel itself failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CallError {
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Rpc(error) => Some(error.code),
            Self::Transport(_) => None,
        }
    }
}

/// Client half of the JSON-RPC transport.
///
/// Request ids come from a counter owned by this instance, so two clients never
/// share id state.
pub struct JsonRpcClient {
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a fresh request id
    pub fn next_id(&self) -> RequestId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        RequestId::String(format!("req-{}", n))
    }

    /// Build a request with a fresh id (useful for assembling batches)
    pub fn request(&self, method: impl Into<String>, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest::new(self.next_id(), method, params)
    }

    /// Call `method` and return its result
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, CallError> {
        let id = self.next_id();
        self.call_with_id(id, method, params).await
    }

    /// Call `method` using a caller-supplied id
    pub async fn call_with_id(
        &self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, CallError> {
        let request = JsonRpcRequest::new(id.clone(), method, params).to_value();
        validate_request(&request).into_result()?;

        let raw = self.transport.send(request.to_string()).await?;
        if raw.trim().is_empty() {
            return Err(TransportError::Failed(format!("no response for request {}", id)).into());
        }

        let response = JsonRpcResponse::from_value(parse(&raw)?)?;
        if !response.is_error() && response.id.as_ref() != Some(&id) {
            return Err(JsonRpcError::invalid_request(vec![format!(
                "response id {:?} does not match request id {}",
                response.id, id
            )])
            .into());
        }

        Ok(response.into_result()?)
    }

    /// Send a notification; whatever the transport returns is discarded
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), CallError> {
        let notification = JsonRpcRequest::notification(method, params).to_value();
        validate_request(&notification).into_result()?;

        self.transport.send(notification.to_string()).await?;
        Ok(())
    }

    /// Send a batch; responses come back in whatever order the peer chose.
    ///
    /// Correlate results through each response's `id`, not its position.
    pub async fn batch(&self, requests: Vec<JsonRpcRequest>) -> Result<Vec<JsonRpcResponse>, CallError> {
        let payload = Value::Array(requests.iter().map(JsonRpcRequest::to_value).collect());
        validate_batch(&payload).into_result()?;

        let violations: Vec<String> = requests
            .iter()
            .enumerate()
            .flat_map(|(index, request)| {
                validate_request(&request.to_value())
                    .violations
                    .into_iter()
                    .map(move |v| format!("member {}: {}", index, v))
            })
            .collect();
        if !violations.is_empty() {
            return Err(JsonRpcError::invalid_request(violations).into());
        }

        let raw = self.transport.send(payload.to_string()).await?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        match parse(&raw)? {
            Value::Array(items) => Ok(items
                .into_iter()
                .map(JsonRpcResponse::from_value)
                .collect::<Result<Vec<_>, _>>()?),
            single => {
                // The peer rejected the batch as a whole
                let response = JsonRpcResponse::from_value(single)?;
                match response.into_result() {
                    Err(error) => Err(error.into()),
                    Ok(_) => Err(JsonRpcError::invalid_request(vec![
                        "expected an array in reply to a batch".to_string(),
                    ])
                    .into()),
                }
            }
        }
    }
}

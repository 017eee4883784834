// JSON-RPC 2.0 server-side dispatch: method table, single and batch processing

use super::error::JsonRpcError;
use super::message::{JsonRpcRequest, JsonRpcResponse};
use super::transport::RpcEndpoint;
use super::validate::{extract_id, parse, validate_batch, validate_request};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Boxed future returned by every registered handler
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Value>>;

type HandlerFn = dyn Fn(Option<Value>) -> HandlerFuture + Send + Sync;

/// Declared metadata for a registered method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "paramsSchema", default, skip_serializing_if = "Option::is_none")]
    pub params_schema: Option<Value>,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            params_schema: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_params_schema(mut self, schema: Value) -> Self {
        self.params_schema = Some(schema);
        self
    }
}

struct MethodEntry {
    descriptor: MethodDescriptor,
    handler: Arc<HandlerFn>,
}

/// String-keyed method table that turns raw JSON-RPC text into responses.
///
/// Handlers return `anyhow::Result<Value>`. An error that wraps a
/// [`JsonRpcError`] is sent verbatim; any other error (or a panic) becomes an
/// Internal Error whose `data` is the error's text. Notifications never
/// produce output, whatever happens while handling them.
pub struct JsonRpcServer {
    name: String,
    methods: HashMap<String, MethodEntry>,
}

impl JsonRpcServer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a handler; a later registration under the same name wins
    pub fn register_method<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register_with_descriptor(MethodDescriptor::new(name), handler);
    }

    /// Register a handler together with its declared descriptor
    pub fn register_with_descriptor<F, Fut>(&mut self, descriptor: MethodDescriptor, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: Arc<HandlerFn> =
            Arc::new(move |params: Option<Value>| handler(params).boxed());
        let name = descriptor.name.clone();
        if self.methods.contains_key(&name) {
            tracing::debug!(server = %self.name, method = %name, "Replacing method handler");
        }
        self.methods.insert(name, MethodEntry { descriptor, handler });
    }

    /// Register a handler whose params are decoded into `P`.
    ///
    /// Missing params decode from an empty object; a decode failure is
    /// reported as Invalid Params.
    pub fn register_typed<P, R, F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register_method(name, move |params: Option<Value>| {
            let handler = handler.clone();
            async move {
                let params = params.unwrap_or_else(|| Value::Object(Default::default()));
                let params: P = serde_json::from_value(params)
                    .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {}", e)))?;
                let result = (*handler)(params).await?;
                Ok::<Value, anyhow::Error>(serde_json::to_value(result)?)
            }
        });
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Descriptors of all registered methods, sorted by name
    pub fn methods(&self) -> Vec<MethodDescriptor> {
        let mut descriptors: Vec<_> = self
            .methods
            .values()
            .map(|entry| entry.descriptor.clone())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Process raw request text; `None` means there is nothing to send back
    pub async fn process_request(&self, raw: &str) -> Option<String> {
        let message = match parse(raw) {
            Ok(message) => message,
            Err(error) => {
                tracing::debug!(server = %self.name, "Rejecting unparseable message");
                return Some(JsonRpcResponse::error(None, error).to_json());
            }
        };

        self.process_value(message).await.map(|value| value.to_string())
    }

    /// Process an already parsed message (single or batch)
    pub async fn process_value(&self, message: Value) -> Option<Value> {
        if message.is_array() {
            let envelope = validate_batch(&message);
            if !envelope.is_valid() {
                let error = JsonRpcError::invalid_request(envelope.violations);
                return Some(JsonRpcResponse::error(None, error).to_value());
            }
        }

        match message {
            Value::Array(members) => {
                let count = members.len();
                let responses: Vec<Value> = join_all(
                    members.into_iter().map(|member| self.process_single(member)),
                )
                .await
                .into_iter()
                .flatten()
                .map(|response| response.to_value())
                .collect();

                tracing::debug!(
                    server = %self.name,
                    members = count,
                    responses = responses.len(),
                    "Processed batch"
                );

                if responses.is_empty() {
                    None
                } else {
                    Some(Value::Array(responses))
                }
            }
            single => self
                .process_single(single)
                .await
                .map(|response| response.to_value()),
        }
    }

    async fn process_single(&self, message: Value) -> Option<JsonRpcResponse> {
        let validation = validate_request(&message);
        if !validation.is_valid() {
            // A malformed message cannot be proven to be a notification, so it is always answered
            let id = extract_id(&message);
            return Some(JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_request(validation.violations),
            ));
        }

        let request: JsonRpcRequest = match serde_json::from_value(message) {
            Ok(request) => request,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    None,
                    JsonRpcError::invalid_request(vec![e.to_string()]),
                ))
            }
        };

        let Some(entry) = self.methods.get(&request.method) else {
            if request.is_notification() {
                tracing::debug!(server = %self.name, method = %request.method, "Dropping notification for unknown method");
                return None;
            }
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::method_not_found(&request.method),
            ));
        };

        tracing::debug!(server = %self.name, method = %request.method, id = ?request.id, "Dispatching");

        let outcome = invoke(entry.handler.clone(), request.params).await;

        match (request.id, outcome) {
            (None, Ok(_)) => None,
            (None, Err(error)) => {
                tracing::warn!(
                    server = %self.name,
                    method = %request.method,
                    code = error.code,
                    error = %error.message,
                    "Notification handler failed"
                );
                None
            }
            (Some(id), Ok(result)) => Some(JsonRpcResponse::success(id, result)),
            (Some(id), Err(error)) => Some(JsonRpcResponse::error(Some(id), error)),
        }
    }
}

async fn invoke(handler: Arc<HandlerFn>, params: Option<Value>) -> Result<Value, JsonRpcError> {
    match AssertUnwindSafe(async move { handler(params).await })
        .catch_unwind()
        .await
    {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(handler_error_to_rpc(error)),
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_string());
            Err(JsonRpcError::internal_error(detail))
        }
    }
}

/// Map a handler failure onto the wire error
pub fn handler_error_to_rpc(error: anyhow::Error) -> JsonRpcError {
    match error.downcast::<JsonRpcError>() {
        Ok(rpc) => rpc,
        Err(other) => JsonRpcError::internal_error(format!("{:#}", other)),
    }
}

#[async_trait::async_trait]
impl RpcEndpoint for JsonRpcServer {
    async fn handle(&self, raw: &str) -> Option<String> {
        self.process_request(raw).await
    }
}

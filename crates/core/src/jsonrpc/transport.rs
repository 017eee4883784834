// Transport seams: something that answers raw JSON-RPC text

use std::future::Future;
use std::sync::Arc;

/// Failure of the underlying channel, distinct from any JSON-RPC error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("transport failed: {0}")]
    Failed(String),
}

/// Client-side channel: sends serialized requests and returns the raw reply.
///
/// An empty reply means the peer produced no output (notifications, or a batch
/// made only of notifications).
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: String) -> Result<String, TransportError>;
}

/// Server-side endpoint that processes raw request text
#[async_trait::async_trait]
pub trait RpcEndpoint: Send + Sync {
    /// Process `raw`; `None` when there is nothing to send back
    async fn handle(&self, raw: &str) -> Option<String>;
}

/// In-process transport straight into an endpoint
pub struct LocalTransport {
    endpoint: Arc<dyn RpcEndpoint>,
}

impl LocalTransport {
    pub fn new(endpoint: Arc<dyn RpcEndpoint>) -> Self {
        Self { endpoint }
    }
}

#[async_trait::async_trait]
impl Transport for LocalTransport {
    async fn send(&self, payload: String) -> Result<String, TransportError> {
        Ok(self.endpoint.handle(&payload).await.unwrap_or_default())
    }
}

/// Transport backed by an async closure
pub struct FnTransport<F> {
    send_fn: F,
}

impl<F, Fut> FnTransport<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, TransportError>> + Send,
{
    pub fn new(send_fn: F) -> Self {
        Self { send_fn }
    }
}

#[async_trait::async_trait]
impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, TransportError>> + Send,
{
    async fn send(&self, payload: String) -> Result<String, TransportError> {
        (self.send_fn)(payload).await
    }
}

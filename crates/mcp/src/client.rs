// MCP client: per-server sessions, capability negotiation cache, tools, resources

use crate::protocol::{
    methods, CallToolResult, CloseStreamResult, ExecuteToolParams, GetToolParams,
    ListResourcesResult, ListToolsResult, NegotiateParams, NegotiateResult, StreamParams,
    SubscribeParams, SubscribeResult, ToolDescriptor, UnsubscribeParams, UnsubscribeResult,
};
use mcpbroker_core::capability::{self, Capabilities};
use mcpbroker_core::jsonrpc::{
    CallError, JsonRpcClient, JsonRpcError, LocalTransport, RpcEndpoint, Transport, TransportError,
};
use mcpbroker_core::resource::compression::decompress;
use mcpbroker_core::resource::{
    AccessRequest, AccessResponse, ResourceContent, ResourceDescriptor, ResourceError, ResourceUri,
    StreamBuffers, StreamChunk, StreamSession, SubscriptionRegistry, UpdateCallback,
};
use mcpbroker_core::{StreamId, SubscriptionId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

/// Errors surfaced by [`McpClient`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    /// The server (or a host in between) answered with a JSON-RPC error
    #[error(transparent)]
    Rpc(JsonRpcError),

    #[error(transparent)]
    Transport(TransportError),

    #[error("client {0} is not connected")]
    NotConnected(String),

    #[error("unknown server: {0}")]
    UnknownServer(String),

    /// The server did not declare a capability the operation needs
    #[error("server {server_id} does not support {capability}")]
    Unsupported { server_id: String, capability: String },

    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// The tool ran but reported failure in its result
    #[error("tool {tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ClientError {
    /// JSON-RPC error code, when the failure has one
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Rpc(error) => Some(error.code),
            Self::Resource(error) => Some(error.code()),
            _ => None,
        }
    }
}

impl From<CallError> for ClientError {
    fn from(error: CallError) -> Self {
        match error {
            CallError::Rpc(error) => match ResourceError::from_jsonrpc_error(&error) {
                Some(resource) => Self::Resource(resource),
                None => Self::Rpc(error),
            },
            CallError::Transport(error) => Self::Transport(error),
        }
    }
}

/// Opens channels from a client to servers
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Called once when the client connects
    async fn register(&self, _client_id: &str) {}

    /// Called once when the client disconnects
    async fn unregister(&self, _client_id: &str) {}

    /// A transport to `server_id` on behalf of `client_id`
    async fn transport(&self, client_id: &str, server_id: &str) -> Result<Arc<dyn Transport>, ClientError>;
}

/// Connector that talks to in-process endpoints directly, without a host
#[derive(Default)]
pub struct DirectConnector {
    endpoints: HashMap<String, Arc<dyn RpcEndpoint>>,
}

impl DirectConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, server_id: impl Into<String>, endpoint: Arc<dyn RpcEndpoint>) -> Self {
        self.endpoints.insert(server_id.into(), endpoint);
        self
    }
}

#[async_trait::async_trait]
impl Connector for DirectConnector {
    async fn transport(&self, _client_id: &str, server_id: &str) -> Result<Arc<dyn Transport>, ClientError> {
        let endpoint = self
            .endpoints
            .get(server_id)
            .cloned()
            .ok_or_else(|| ClientError::UnknownServer(server_id.to_string()))?;
        Ok(Arc::new(LocalTransport::new(endpoint)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

struct ServerSession {
    rpc: JsonRpcClient,
    capabilities: OnceCell<Capabilities>,
}

/// Client side of MCP.
///
/// Each server gets its own session with a private request-id counter. The
/// server's capabilities are negotiated on first use and cached until the
/// client disconnects; concurrent first uses share one round-trip.
pub struct McpClient {
    client_id: String,
    connector: Arc<dyn Connector>,
    state: RwLock<ConnectionState>,
    sessions: RwLock<HashMap<String, Arc<ServerSession>>>,
    streams: StreamBuffers,
    stream_servers: RwLock<HashMap<StreamId, String>>,
    subscriptions: SubscriptionRegistry,
    subscription_servers: RwLock<HashMap<SubscriptionId, String>>,
}

impl McpClient {
    pub fn new(client_id: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        Self {
            client_id: client_id.into(),
            connector,
            state: RwLock::new(ConnectionState::Disconnected),
            sessions: RwLock::new(HashMap::new()),
            streams: StreamBuffers::new(),
            stream_servers: RwLock::new(HashMap::new()),
            subscriptions: SubscriptionRegistry::new(),
            subscription_servers: RwLock::new(HashMap::new()),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn connect(&self) {
        let mut state = self.state.write().await;
        if *state == ConnectionState::Connected {
            return;
        }
        self.connector.register(&self.client_id).await;
        *state = ConnectionState::Connected;
        tracing::info!(client_id = %self.client_id, "Client connected");
    }

    /// Disconnect and forget every session, negotiated capability set, stream
    /// buffer and subscription.
    ///
    /// Streams that were not read to the end are closed on their servers first.
    pub async fn disconnect(&self) {
        let mut state = self.state.write().await;
        if *state == ConnectionState::Disconnected {
            return;
        }
        let sessions = std::mem::take(&mut *self.sessions.write().await);
        let open_streams: Vec<_> = self.stream_servers.write().await.drain().collect();
        for (stream_id, server_id) in open_streams {
            let complete = self
                .streams
                .get(&stream_id)
                .await
                .map_or(true, |session| session.complete);
            if let (false, Some(session)) = (complete, sessions.get(&server_id)) {
                let params = serde_json::json!({ "stream_id": stream_id });
                if let Err(error) = session.rpc.call(methods::RESOURCES_STREAM_CLOSE, Some(params)).await {
                    tracing::warn!(stream_id = %stream_id, error = %error, "Failed to close remote stream");
                }
            }
        }
        self.streams.clear_all().await;
        self.subscriptions.clear().await;
        self.subscription_servers.write().await.clear();
        self.connector.unregister(&self.client_id).await;
        *state = ConnectionState::Disconnected;
        tracing::info!(client_id = %self.client_id, "Client disconnected");
    }

    async fn session(&self, server_id: &str) -> Result<Arc<ServerSession>, ClientError> {
        if self.state().await != ConnectionState::Connected {
            return Err(ClientError::NotConnected(self.client_id.clone()));
        }

        if let Some(session) = self.sessions.read().await.get(server_id) {
            return Ok(session.clone());
        }

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(server_id) {
            return Ok(session.clone());
        }
        let transport = self.connector.transport(&self.client_id, server_id).await?;
        let session = Arc::new(ServerSession {
            rpc: JsonRpcClient::new(transport),
            capabilities: OnceCell::new(),
        });
        sessions.insert(server_id.to_string(), session.clone());
        Ok(session)
    }

    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        server_id: &str,
        method: &str,
        params: &P,
    ) -> Result<R, ClientError> {
        let session = self.session(server_id).await?;
        let params = serde_json::to_value(params).map_err(|e| ClientError::Decode(e.to_string()))?;
        let result = session.rpc.call(method, Some(params)).await?;
        serde_json::from_value(result).map_err(|e| ClientError::Decode(format!("{}: {}", method, e)))
    }

    /// Capabilities of `server_id`, negotiated once per connection
    pub async fn negotiate_capabilities(&self, server_id: &str) -> Result<Capabilities, ClientError> {
        let session = self.session(server_id).await?;
        let capabilities = session
            .capabilities
            .get_or_try_init(|| async {
                let params = NegotiateParams {
                    client_id: Some(self.client_id.clone()),
                    capabilities: Capabilities::full(),
                };
                let params =
                    serde_json::to_value(&params).map_err(|e| ClientError::Decode(e.to_string()))?;
                let result = session.rpc.call(methods::NEGOTIATE, Some(params)).await?;
                let negotiated: NegotiateResult = serde_json::from_value(result)
                    .map_err(|e| ClientError::Decode(format!("{}: {}", methods::NEGOTIATE, e)))?;
                tracing::debug!(
                    client_id = %self.client_id,
                    server_id = %server_id,
                    capabilities = ?negotiated.capabilities,
                    "Negotiated capabilities"
                );
                Ok::<_, ClientError>(negotiated.capabilities)
            })
            .await?;
        Ok(capabilities.clone())
    }

    async fn require(&self, server_id: &str, feature: &str) -> Result<(), ClientError> {
        if self.negotiate_capabilities(server_id).await?.supports(feature) {
            Ok(())
        } else {
            Err(ClientError::Unsupported {
                server_id: server_id.to_string(),
                capability: feature.to_string(),
            })
        }
    }

    pub async fn list_server_tools(&self, server_id: &str) -> Result<Vec<ToolDescriptor>, ClientError> {
        self.require(server_id, capability::TOOLS).await?;
        let listed: ListToolsResult = self
            .call(server_id, methods::TOOLS_LIST, &serde_json::json!({}))
            .await?;
        Ok(listed.tools)
    }

    pub async fn get_tool_details(&self, server_id: &str, name: &str) -> Result<ToolDescriptor, ClientError> {
        self.require(server_id, capability::TOOLS).await?;
        self.call(
            server_id,
            methods::TOOLS_GET,
            &GetToolParams {
                name: name.to_string(),
            },
        )
        .await
    }

    pub async fn execute_tool(
        &self,
        server_id: &str,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, ClientError> {
        self.require(server_id, capability::TOOLS).await?;
        self.call(
            server_id,
            methods::TOOLS_EXECUTE,
            &ExecuteToolParams {
                name: name.to_string(),
                arguments,
            },
        )
        .await
    }

    /// A callable handle for one remote tool; the descriptor is fetched up front
    pub async fn create_tool_proxy(
        self: &Arc<Self>,
        server_id: &str,
        name: &str,
    ) -> Result<ToolProxy, ClientError> {
        let descriptor = self.get_tool_details(server_id, name).await?;
        Ok(ToolProxy {
            client: self.clone(),
            server_id: server_id.to_string(),
            descriptor,
        })
    }

    pub async fn list_resources(&self, server_id: &str) -> Result<Vec<ResourceDescriptor>, ClientError> {
        self.require(server_id, capability::RESOURCES).await?;
        let listed: ListResourcesResult = self
            .call(server_id, methods::RESOURCES_LIST, &serde_json::json!({}))
            .await?;
        Ok(listed.resources)
    }

    /// Read a resource.
    ///
    /// The URI is validated before anything is sent. Compressed payloads are
    /// decompressed here and must come out at exactly the advertised size.
    /// Stream-initiating reads open a local buffer for the returned stream id.
    pub async fn access_resource(
        &self,
        server_id: &str,
        request: AccessRequest,
    ) -> Result<AccessResponse, ClientError> {
        ResourceUri::parse(&request.uri)?;

        self.require(server_id, capability::RESOURCES).await?;
        if request.stream {
            self.require(server_id, capability::STREAMING).await?;
        }
        if request.range.is_some() {
            self.require(server_id, capability::RANGE_REQUESTS).await?;
        }
        if !request.accept_encoding.is_empty() {
            self.require(server_id, capability::COMPRESSION).await?;
        }

        let mut response: AccessResponse = self
            .call(server_id, methods::RESOURCES_READ, &request)
            .await?;

        if let Some(stream) = &response.stream {
            self.streams
                .open(stream.stream_id.clone(), response.uri.clone(), Some(stream.total_size))
                .await;
            self.stream_servers
                .write()
                .await
                .insert(stream.stream_id.clone(), server_id.to_string());
        }

        let compressed = response
            .compression
            .as_ref()
            .filter(|info| info.applied)
            .cloned();
        if let (Some(info), Some(content)) = (compressed, response.content.take()) {
            let algorithm = info.algorithm.unwrap_or_default();
            let payload = content.into_bytes();
            let restored = decompress(&payload, algorithm, info.original_size)
                .map_err(ResourceError::from)?;
            let mime_type = response.metadata.as_ref().and_then(|m| m.mime_type.as_deref());
            response.content = Some(ResourceContent::encode(restored.into(), mime_type));
        }

        Ok(response)
    }

    /// Pull the next chunk of a stream from its server and buffer it
    pub async fn poll_stream(&self, stream_id: &StreamId) -> Result<StreamChunk, ClientError> {
        let server_id = self
            .stream_servers
            .read()
            .await
            .get(stream_id)
            .cloned()
            .ok_or_else(|| ResourceError::StreamState(format!("unknown or cleared stream {}", stream_id)))?;

        let chunk: StreamChunk = self
            .call(
                &server_id,
                methods::RESOURCES_STREAM_NEXT,
                &StreamParams {
                    stream_id: stream_id.clone(),
                },
            )
            .await?;
        self.handle_resource_stream_chunk(chunk.clone()).await?;
        Ok(chunk)
    }

    /// Buffer a delivered chunk; returns whether the stream is complete
    pub async fn handle_resource_stream_chunk(&self, chunk: StreamChunk) -> Result<bool, ClientError> {
        Ok(self.streams.handle_chunk(chunk).await?)
    }

    pub async fn get_stream_buffer(&self, stream_id: &StreamId) -> Result<StreamSession, ClientError> {
        Ok(self.streams.get(stream_id).await?)
    }

    /// Drop a stream's buffer; the server producer is closed too if it is still open
    pub async fn clear_stream_buffer(&self, stream_id: &StreamId) -> Result<(), ClientError> {
        let session = self.streams.clear(stream_id).await?;
        let server_id = self.stream_servers.write().await.remove(stream_id);

        if let (false, Some(server_id)) = (session.complete, server_id) {
            let closed: Result<CloseStreamResult, _> = self
                .call(
                    &server_id,
                    methods::RESOURCES_STREAM_CLOSE,
                    &StreamParams {
                        stream_id: stream_id.clone(),
                    },
                )
                .await;
            if let Err(error) = closed {
                tracing::warn!(stream_id = %stream_id, error = %error, "Failed to close remote stream");
            }
        }
        Ok(())
    }

    /// Subscribe to changes of `uri` on `server_id`
    pub async fn subscribe(
        &self,
        server_id: &str,
        uri: &str,
        callback: UpdateCallback,
    ) -> Result<SubscriptionId, ClientError> {
        ResourceUri::parse(uri)?;
        self.require(server_id, capability::SUBSCRIPTIONS).await?;

        let subscribed: SubscribeResult = self
            .call(
                server_id,
                methods::RESOURCES_SUBSCRIBE,
                &SubscribeParams {
                    uri: uri.to_string(),
                },
            )
            .await?;
        let subscription_id = subscribed.subscription_id;

        self.subscriptions
            .insert(subscription_id.clone(), server_id, uri, callback)
            .await;
        self.subscription_servers
            .write()
            .await
            .insert(subscription_id.clone(), server_id.to_string());
        Ok(subscription_id)
    }

    /// Remove a subscription locally and on its server; `false` when unknown
    pub async fn unsubscribe(&self, subscription_id: &SubscriptionId) -> Result<bool, ClientError> {
        if self.subscriptions.remove(subscription_id).await.is_none() {
            return Ok(false);
        }
        let Some(server_id) = self.subscription_servers.write().await.remove(subscription_id) else {
            return Ok(true);
        };

        let _: UnsubscribeResult = self
            .call(
                &server_id,
                methods::RESOURCES_UNSUBSCRIBE,
                &UnsubscribeParams {
                    subscription_id: subscription_id.clone(),
                },
            )
            .await?;
        Ok(true)
    }

    /// Deliver an update; unknown subscriptions are ignored
    pub async fn handle_resource_update(&self, subscription_id: &SubscriptionId, payload: Value) -> bool {
        self.subscriptions.dispatch(subscription_id, payload).await
    }
}

/// Handle to a single remote tool
#[derive(Clone)]
pub struct ToolProxy {
    client: Arc<McpClient>,
    server_id: String,
    descriptor: ToolDescriptor,
}

impl ToolProxy {
    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Execute the tool and unwrap its result.
    ///
    /// Structured content is returned as is; otherwise the text content is
    /// parsed as JSON when possible, else returned as a string.
    pub async fn call(&self, arguments: Value) -> Result<Value, ClientError> {
        let result = self
            .client
            .execute_tool(&self.server_id, &self.descriptor.name, arguments)
            .await?;

        if result.is_error() {
            return Err(ClientError::Tool {
                tool: self.descriptor.name.clone(),
                message: result.joined_text(),
            });
        }
        if let Some(value) = result.structured_content {
            return Ok(value);
        }
        let text = result.joined_text();
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

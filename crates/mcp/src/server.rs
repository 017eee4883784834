// MCP server: standard tools/resources/capabilities methods on top of the JSON-RPC dispatcher

use crate::protocol::{
    methods, CloseStreamResult, ExecuteToolParams, GetToolParams, ListResourcesResult,
    ListToolsResult, NegotiateParams, NegotiateResult, ServerInfo, StreamParams, SubscribeParams,
    SubscribeResult, ToolDescriptor, UnsubscribeParams, UnsubscribeResult, PROTOCOL_VERSION,
};
use crate::tools::{Tool, ToolRegistry};
use anyhow::Result;
use mcpbroker_core::capability::{self, Capabilities};
use mcpbroker_core::config::ResourceConfig;
use mcpbroker_core::jsonrpc::error::CAPABILITY_NOT_SUPPORTED;
use mcpbroker_core::jsonrpc::{JsonRpcError, JsonRpcServer, RpcEndpoint};
use mcpbroker_core::resource::{AccessRequest, ResourceManager, ResourceUpdate};
use mcpbroker_core::ConsentLevel;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Builder for [`McpServer`]
pub struct McpServerBuilder {
    server_id: String,
    info: ServerInfo,
    resource_config: ResourceConfig,
}

impl McpServerBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.info.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.info.version = version.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.info.description = Some(description.into());
        self
    }

    /// Override the advertised capabilities (all features by default)
    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.info.capabilities = capabilities;
        self
    }

    pub fn resource_config(mut self, config: ResourceConfig) -> Self {
        self.resource_config = config;
        self
    }

    pub fn build(self) -> McpServer {
        McpServer::from_builder(self)
    }
}

/// An MCP server: a JSON-RPC method table pre-loaded with the standard
/// methods, a tool registry and a resource manager.
///
/// Requests are answered through [`RpcEndpoint`], so the server can sit behind
/// any transport or be registered with a host.
pub struct McpServer {
    server_id: String,
    info: ServerInfo,
    rpc: JsonRpcServer,
    tools: Arc<RwLock<ToolRegistry>>,
    resources: Arc<ResourceManager>,
}

fn unsupported(server_id: &str, feature: &str) -> JsonRpcError {
    JsonRpcError::custom(
        CAPABILITY_NOT_SUPPORTED,
        format!("Server {} does not support {}", server_id, feature),
    )
}

impl McpServer {
    pub fn builder(server_id: impl Into<String>) -> McpServerBuilder {
        let server_id = server_id.into();
        let mut info = ServerInfo::new(server_id.clone(), env!("CARGO_PKG_VERSION"));
        info.capabilities = Capabilities::full();
        McpServerBuilder {
            server_id,
            info,
            resource_config: ResourceConfig::default(),
        }
    }

    pub fn new(server_id: impl Into<String>) -> Self {
        Self::builder(server_id).build()
    }

    fn from_builder(builder: McpServerBuilder) -> Self {
        let McpServerBuilder {
            server_id,
            mut info,
            resource_config,
        } = builder;

        // Negotiation is open to any caller
        info.required_levels
            .insert(methods::NEGOTIATE.to_string(), ConsentLevel::None);

        let mut server = Self {
            rpc: JsonRpcServer::new(server_id.clone()),
            server_id,
            info,
            tools: Arc::new(RwLock::new(ToolRegistry::new())),
            resources: Arc::new(ResourceManager::new(resource_config)),
        };
        server.register_standard_methods();
        server
    }

    fn register_standard_methods(&mut self) {
        let server_id = self.server_id.clone();
        let info = self.info.clone();
        self.rpc
            .register_typed(methods::NEGOTIATE, move |params: NegotiateParams| {
                let server_id = server_id.clone();
                let info = info.clone();
                async move {
                    tracing::info!(
                        server_id = %server_id,
                        client_id = params.client_id.as_deref().unwrap_or("-"),
                        "Capability negotiation"
                    );
                    Ok::<_, anyhow::Error>(NegotiateResult {
                        server_id,
                        protocol_version: PROTOCOL_VERSION.to_string(),
                        name: info.name,
                        version: info.version,
                        capabilities: info.capabilities,
                    })
                }
            });

        let tools = self.tools.clone();
        self.rpc
            .register_typed(methods::TOOLS_LIST, move |_: Value| {
                let tools = tools.clone();
                async move {
                    Ok::<_, anyhow::Error>(ListToolsResult {
                        tools: tools.read().await.list(),
                    })
                }
            });

        let tools = self.tools.clone();
        self.rpc
            .register_typed(methods::TOOLS_GET, move |params: GetToolParams| {
                let tools = tools.clone();
                async move {
                    let tool = tools.read().await.get(&params.name).ok_or_else(|| {
                        JsonRpcError::invalid_params(format!("Unknown tool: {}", params.name))
                    })?;
                    Ok::<_, anyhow::Error>(tool.descriptor())
                }
            });

        let tools = self.tools.clone();
        self.rpc
            .register_typed(methods::TOOLS_EXECUTE, move |params: ExecuteToolParams| {
                let tools = tools.clone();
                async move {
                    let tool = tools.read().await.get(&params.name).ok_or_else(|| {
                        JsonRpcError::invalid_params(format!("Unknown tool: {}", params.name))
                    })?;
                    tracing::debug!(tool = %params.name, "Executing tool");
                    tool.execute(params.arguments).await
                }
            });

        let resources = self.resources.clone();
        self.rpc
            .register_typed(methods::RESOURCES_LIST, move |_: Value| {
                let resources = resources.clone();
                async move {
                    let resources = resources.list().await.map_err(JsonRpcError::from)?;
                    Ok::<_, anyhow::Error>(ListResourcesResult { resources })
                }
            });

        let resources = self.resources.clone();
        let capabilities = self.info.capabilities.clone();
        let server_id = self.server_id.clone();
        self.rpc
            .register_typed(methods::RESOURCES_READ, move |request: AccessRequest| {
                let resources = resources.clone();
                let capabilities = capabilities.clone();
                let server_id = server_id.clone();
                async move {
                    if request.stream && !capabilities.supports(capability::STREAMING) {
                        return Err(anyhow::Error::from(unsupported(&server_id, capability::STREAMING)));
                    }
                    if request.range.is_some() && !capabilities.supports(capability::RANGE_REQUESTS) {
                        return Err(anyhow::Error::from(unsupported(&server_id, capability::RANGE_REQUESTS)));
                    }
                    let mut request = request;
                    if !capabilities.supports(capability::COMPRESSION) {
                        request.accept_encoding.clear();
                    }
                    let response = resources.access(&request).await.map_err(JsonRpcError::from)?;
                    Ok::<_, anyhow::Error>(response)
                }
            });

        let resources = self.resources.clone();
        self.rpc
            .register_typed(methods::RESOURCES_STREAM_NEXT, move |params: StreamParams| {
                let resources = resources.clone();
                async move {
                    let chunk = resources
                        .next_chunk(&params.stream_id)
                        .await
                        .map_err(JsonRpcError::from)?;
                    Ok::<_, anyhow::Error>(chunk)
                }
            });

        let resources = self.resources.clone();
        self.rpc
            .register_typed(methods::RESOURCES_STREAM_CLOSE, move |params: StreamParams| {
                let resources = resources.clone();
                async move {
                    Ok::<_, anyhow::Error>(CloseStreamResult {
                        closed: resources.close_stream(&params.stream_id).await,
                    })
                }
            });

        let resources = self.resources.clone();
        let capabilities = self.info.capabilities.clone();
        let server_id = self.server_id.clone();
        self.rpc
            .register_typed(methods::RESOURCES_SUBSCRIBE, move |params: SubscribeParams| {
                let resources = resources.clone();
                let capabilities = capabilities.clone();
                let server_id = server_id.clone();
                async move {
                    if !capabilities.supports(capability::SUBSCRIPTIONS) {
                        return Err(anyhow::Error::from(unsupported(&server_id, capability::SUBSCRIPTIONS)));
                    }
                    let subscription_id = resources
                        .subscribe(&params.uri)
                        .await
                        .map_err(JsonRpcError::from)?;
                    Ok::<_, anyhow::Error>(SubscribeResult { subscription_id })
                }
            });

        let resources = self.resources.clone();
        self.rpc
            .register_typed(methods::RESOURCES_UNSUBSCRIBE, move |params: UnsubscribeParams| {
                let resources = resources.clone();
                async move {
                    Ok::<_, anyhow::Error>(UnsubscribeResult {
                        removed: resources.unsubscribe(&params.subscription_id).await,
                    })
                }
            });
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Description handed to a host at registration time
    pub fn info(&self) -> ServerInfo {
        self.info.clone()
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.info.capabilities
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    /// Register a custom method requiring `level` consent; last registration wins
    pub fn register_method<F, Fut>(&mut self, name: impl Into<String>, level: ConsentLevel, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let name = name.into();
        self.info.required_levels.insert(name.clone(), level);
        self.rpc.register_method(name, handler);
    }

    /// Register a custom method with typed params
    pub fn register_typed<P, R, F, Fut>(&mut self, name: impl Into<String>, level: ConsentLevel, handler: F)
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let name = name.into();
        self.info.required_levels.insert(name.clone(), level);
        self.rpc.register_typed(name, handler);
    }

    /// Change the consent level a method needs
    pub fn set_required_level(&mut self, method: impl Into<String>, level: ConsentLevel) {
        self.info.required_levels.insert(method.into(), level);
    }

    /// Register a tool with an explicit descriptor; duplicates overwrite
    pub async fn register_tool<F, Fut>(&self, descriptor: ToolDescriptor, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.tools.write().await.register_fn(descriptor, handler);
    }

    pub async fn register_tool_impl(&self, tool: Arc<dyn Tool>) {
        self.tools.write().await.register(tool);
    }

    /// Signal a resource change; returns the updates to deliver to subscribers
    pub async fn publish_update(&self, uri: &str, payload: Value) -> Vec<ResourceUpdate> {
        self.resources.publish_update(uri, payload).await
    }

    pub async fn process_request(&self, raw: &str) -> Option<String> {
        self.rpc.process_request(raw).await
    }
}

#[async_trait::async_trait]
impl RpcEndpoint for McpServer {
    async fn handle(&self, raw: &str) -> Option<String> {
        self.rpc.process_request(raw).await
    }
}

// Host router: server/client directories, consent enforcement, request forwarding

use chrono::{DateTime, Utc};
use mcpbroker_core::consent::{ConsentDecision, ConsentRegistry, NewConsent};
use mcpbroker_core::jsonrpc::error::{CONSENT_DENIED, SERVER_NOT_FOUND};
use mcpbroker_core::jsonrpc::validate::extract_id;
use mcpbroker_core::jsonrpc::{JsonRpcError, JsonRpcResponse, RpcEndpoint};
use mcpbroker_core::{ConsentId, ConsentLevel};
use mcpbroker_mcp::{McpServer, ServerInfo};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;

/// Host-level failures, distinct from anything a server answers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("server not found: {0}")]
    ServerNotFound(String),

    #[error("consent denied: client {client_id} needs {required} consent on {server_id} for {method}")]
    ConsentDenied {
        client_id: String,
        server_id: String,
        method: String,
        required: ConsentLevel,
        granted: Option<ConsentLevel>,
    },
}

impl HostError {
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            Self::ServerNotFound(server_id) => JsonRpcError::custom(SERVER_NOT_FOUND, self.to_string())
                .with_data(json!({ "server_id": server_id })),
            Self::ConsentDenied {
                client_id,
                server_id,
                method,
                required,
                granted,
            } => JsonRpcError::custom(CONSENT_DENIED, self.to_string()).with_data(json!({
                "client_id": client_id,
                "server_id": server_id,
                "method": method,
                "required": required,
                "granted": granted,
            })),
        }
    }

    /// Error response for `request`, keyed to its id when it has one.
    ///
    /// `None` when `request` is a notification or a batch of notifications;
    /// those never get a reply, not even an error.
    pub fn to_response(&self, request: &Value) -> Option<Value> {
        if !expects_response(request) {
            tracing::warn!(error = %self, "Dropped host error for notification");
            return None;
        }
        Some(JsonRpcResponse::error(extract_id(request), self.to_jsonrpc_error()).to_value())
    }
}

/// A registered server; the host only holds a weak reference to its handler
#[derive(Clone)]
pub struct ServerRegistration {
    pub server_id: String,
    pub info: ServerInfo,
    pub registered_at: DateTime<Utc>,
    handler: Weak<dyn RpcEndpoint>,
}

impl ServerRegistration {
    pub fn is_alive(&self) -> bool {
        self.handler.strong_count() > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ClientInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRegistration {
    pub client_id: String,
    pub info: ClientInfo,
    pub registered_at: DateTime<Utc>,
}

/// Directory entry returned by [`Host::get_available_servers`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSummary {
    pub server_id: String,
    pub info: ServerInfo,
    pub registered_at: DateTime<Utc>,
}

/// Brokers requests between clients and servers.
///
/// Every routed request that names a client is checked against the consent
/// registry before it reaches the server. The host never keeps a server alive:
/// once the owner drops it, routing to it yields no output.
pub struct Host {
    servers: RwLock<HashMap<String, ServerRegistration>>,
    clients: RwLock<HashMap<String, ClientRegistration>>,
    consent: ConsentRegistry,
}

impl Host {
    pub fn new(auto_consent: bool) -> Self {
        Self::with_consent(ConsentRegistry::new(auto_consent))
    }

    pub fn with_consent(consent: ConsentRegistry) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
            consent,
        }
    }

    pub fn consent(&self) -> &ConsentRegistry {
        &self.consent
    }

    /// Register (or replace) a server
    pub async fn register_server<E>(&self, server_id: impl Into<String>, info: ServerInfo, handler: &Arc<E>)
    where
        E: RpcEndpoint + 'static,
    {
        let server_id = server_id.into();
        let handler: Arc<dyn RpcEndpoint> = handler.clone();
        let registration = ServerRegistration {
            server_id: server_id.clone(),
            info,
            registered_at: Utc::now(),
            handler: Arc::downgrade(&handler),
        };

        let replaced = self
            .servers
            .write()
            .await
            .insert(server_id.clone(), registration)
            .is_some();
        tracing::info!(server_id = %server_id, replaced, "Registered server");
    }

    /// Register an MCP server under its own id and description
    pub async fn register_mcp_server(&self, server: &Arc<McpServer>) {
        self.register_server(server.server_id().to_string(), server.info(), server)
            .await;
    }

    pub async fn unregister_server(&self, server_id: &str) -> bool {
        let removed = self.servers.write().await.remove(server_id).is_some();
        if removed {
            tracing::info!(server_id = %server_id, "Unregistered server");
        }
        removed
    }

    /// All registered servers, sorted by id
    pub async fn get_available_servers(&self) -> Vec<ServerSummary> {
        let mut servers: Vec<_> = self
            .servers
            .read()
            .await
            .values()
            .map(|registration| ServerSummary {
                server_id: registration.server_id.clone(),
                info: registration.info.clone(),
                registered_at: registration.registered_at,
            })
            .collect();
        servers.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        servers
    }

    pub async fn get_server_info(&self, server_id: &str) -> Option<ServerInfo> {
        self.servers
            .read()
            .await
            .get(server_id)
            .map(|registration| registration.info.clone())
    }

    pub async fn register_client(&self, client_id: impl Into<String>, info: ClientInfo) {
        let client_id = client_id.into();
        tracing::info!(client_id = %client_id, name = %info.name, "Registered client");
        self.clients.write().await.insert(
            client_id.clone(),
            ClientRegistration {
                client_id,
                info,
                registered_at: Utc::now(),
            },
        );
    }

    pub async fn unregister_client(&self, client_id: &str) -> bool {
        self.clients.write().await.remove(client_id).is_some()
    }

    pub async fn get_registered_clients(&self) -> Vec<ClientRegistration> {
        let mut clients: Vec<_> = self.clients.read().await.values().cloned().collect();
        clients.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        clients
    }

    pub async fn get_client_info(&self, client_id: &str) -> Option<ClientRegistration> {
        self.clients.read().await.get(client_id).cloned()
    }

    pub async fn register_consent(&self, consent: NewConsent) -> ConsentId {
        self.consent.register_consent(consent).await
    }

    pub async fn revoke_consent(&self, consent_id: &ConsentId) -> bool {
        self.consent.revoke_consent(consent_id).await
    }

    /// Route a JSON-RPC message (single or batch) to `server_id`.
    ///
    /// With a `client_id`, a single request must pass the consent check or
    /// the call fails with [`HostError::ConsentDenied`]. In a batch each member
    /// is checked on its own: denied members are answered with a consent error
    /// keyed to their id, the rest are forwarded. `Ok(None)` means there is
    /// nothing to send back: a notification, a dropped server, or unusable
    /// output.
    pub async fn route_request(
        &self,
        server_id: &str,
        request: Value,
        client_id: Option<&str>,
    ) -> Result<Option<Value>, HostError> {
        let registration = self
            .servers
            .read()
            .await
            .get(server_id)
            .cloned()
            .ok_or_else(|| HostError::ServerNotFound(server_id.to_string()))?;

        let (request, denied) = match (client_id, request) {
            (Some(client_id), Value::Array(members)) if !members.is_empty() => {
                let mut allowed = Vec::new();
                let mut denied = Vec::new();
                for member in members {
                    match self.authorize(client_id, &registration, &member).await {
                        Ok(()) => allowed.push(member),
                        Err(e) => denied.extend(e.to_response(&member)),
                    }
                }
                if allowed.is_empty() {
                    return Ok((!denied.is_empty()).then_some(Value::Array(denied)));
                }
                (Value::Array(allowed), denied)
            }
            (Some(client_id), request) => {
                self.authorize(client_id, &registration, &request).await?;
                (request, Vec::new())
            }
            (None, request) => (request, Vec::new()),
        };

        let Some(handler) = registration.handler.upgrade() else {
            tracing::warn!(server_id = %server_id, "Server handler has been dropped");
            return Ok(None);
        };

        tracing::debug!(server_id = %server_id, client_id = client_id.unwrap_or("-"), "Routing request");
        let response = match handler.handle(&request.to_string()).await {
            Some(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(response) => Some(response),
                Err(e) => {
                    tracing::error!(server_id = %server_id, error = %e, "Server produced non-JSON output");
                    return Ok(None);
                }
            },
            None => None,
        };

        if denied.is_empty() {
            return Ok(response);
        }
        let mut responses = match response {
            Some(Value::Array(answered)) => answered,
            Some(other) => vec![other],
            None => Vec::new(),
        };
        responses.extend(denied);
        Ok(Some(Value::Array(responses)))
    }

    // Consent check for one message; messages without a method are left for
    // the server to reject
    async fn authorize(
        &self,
        client_id: &str,
        registration: &ServerRegistration,
        message: &Value,
    ) -> Result<(), HostError> {
        let Some(method) = message.get("method").and_then(Value::as_str) else {
            return Ok(());
        };

        let server_id = registration.server_id.as_str();
        let required = registration.info.required_level(method);
        match self.consent.check(client_id, server_id, method, required).await {
            ConsentDecision::Denied { required, best } => {
                tracing::warn!(
                    client_id = %client_id,
                    server_id = %server_id,
                    method = %method,
                    required = %required,
                    "Consent denied"
                );
                Err(HostError::ConsentDenied {
                    client_id: client_id.to_string(),
                    server_id: server_id.to_string(),
                    method: method.to_string(),
                    required,
                    granted: best,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Whether any reply is owed for `request`: a message with an `id`, a batch
/// with at least one such member, or something malformed enough to reject
pub fn expects_response(request: &Value) -> bool {
    match request {
        Value::Object(message) => message.contains_key("id") || !message.contains_key("method"),
        Value::Array(members) => members.is_empty() || members.iter().any(expects_response),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpbroker_core::jsonrpc::JsonRpcServer;

    async fn host_with_echo(auto_consent: bool) -> (Host, Arc<JsonRpcServer>) {
        let host = Host::new(auto_consent);
        let mut server = JsonRpcServer::new("echo");
        server.register_method("echo", |params| async move {
            Ok::<_, anyhow::Error>(params.unwrap_or(Value::Null))
        });
        server.register_method("wipe", |_| async move { Ok::<_, anyhow::Error>(json!("wiped")) });
        let server = Arc::new(server);

        let mut info = ServerInfo::new("echo", "1.0");
        info.required_levels
            .insert("wipe".to_string(), ConsentLevel::Full);
        host.register_server("echo", info, &server).await;
        (host, server)
    }

    fn request(method: &str) -> Value {
        json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": [1]})
    }

    #[tokio::test]
    async fn test_unknown_server() {
        let (host, _server) = host_with_echo(false).await;
        let err = host.route_request("ghost", request("echo"), None).await.unwrap_err();
        assert_eq!(err, HostError::ServerNotFound("ghost".to_string()));
        assert_eq!(err.to_jsonrpc_error().code, SERVER_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_route_without_client_skips_consent() {
        let (host, _server) = host_with_echo(false).await;
        let response = host.route_request("echo", request("wipe"), None).await.unwrap().unwrap();
        assert_eq!(response["result"], "wiped");
    }

    #[tokio::test]
    async fn test_consent_levels_are_enforced() {
        let (host, _server) = host_with_echo(false).await;
        host.register_consent(NewConsent::new("c", "echo", "*", ConsentLevel::Basic))
            .await;

        let response = host
            .route_request("echo", request("echo"), Some("c"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response["result"], json!([1]));

        let err = host
            .route_request("echo", request("wipe"), Some("c"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HostError::ConsentDenied {
                required: ConsentLevel::Full,
                granted: Some(ConsentLevel::Basic),
                ..
            }
        ));
        let wire = err.to_response(&request("wipe")).unwrap();
        assert_eq!(wire["id"], 1);
        assert!(err
            .to_response(&json!({"jsonrpc": "2.0", "method": "wipe"}))
            .is_none());
        assert_eq!(wire["error"]["code"], CONSENT_DENIED);
    }

    #[tokio::test]
    async fn test_no_grant_needs_auto_consent() {
        let (strict, _a) = host_with_echo(false).await;
        assert!(strict.route_request("echo", request("echo"), Some("c")).await.is_err());

        let (lenient, _b) = host_with_echo(true).await;
        assert!(lenient
            .route_request("echo", request("echo"), Some("c"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_batch_members_are_checked_individually() {
        let (host, _server) = host_with_echo(false).await;
        host.register_consent(NewConsent::new("c", "echo", "echo", ConsentLevel::Full))
            .await;
        let batch = json!([
            {"jsonrpc": "2.0", "id": 1, "method": "echo", "params": [1]},
            {"jsonrpc": "2.0", "id": 2, "method": "wipe"},
            {"jsonrpc": "2.0", "method": "wipe"},
            {"jsonrpc": "2.0", "id": 3, "method": "echo", "params": [3]},
        ]);

        let response = host.route_request("echo", batch, Some("c")).await.unwrap().unwrap();
        let responses = response.as_array().unwrap();
        assert_eq!(responses.len(), 3);

        let by_id = |id: u64| responses.iter().find(|r| r["id"] == id).unwrap();
        assert_eq!(by_id(1)["result"], json!([1]));
        assert_eq!(by_id(2)["error"]["code"], CONSENT_DENIED);
        assert_eq!(by_id(3)["result"], json!([3]));
    }

    #[tokio::test]
    async fn test_fully_denied_batch() {
        let (host, _server) = host_with_echo(false).await;
        let batch = json!([request("echo"), {"jsonrpc": "2.0", "method": "echo"}]);
        let response = host.route_request("echo", batch, Some("c")).await.unwrap().unwrap();
        assert_eq!(response.as_array().unwrap().len(), 1);
        assert_eq!(response[0]["error"]["code"], CONSENT_DENIED);

        let notifications = json!([{"jsonrpc": "2.0", "method": "echo"}]);
        assert_eq!(host.route_request("echo", notifications, Some("c")).await, Ok(None));
    }

    #[tokio::test]
    async fn test_revoked_consent_stops_routing() {
        let (host, _server) = host_with_echo(false).await;
        let id = host
            .register_consent(NewConsent::new("c", "echo", "*", ConsentLevel::Basic))
            .await;
        assert!(host.route_request("echo", request("echo"), Some("c")).await.is_ok());
        assert!(host.revoke_consent(&id).await);
        assert!(!host.revoke_consent(&id).await);
        assert!(host.route_request("echo", request("echo"), Some("c")).await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_server_yields_no_output() {
        let (host, server) = host_with_echo(false).await;
        drop(server);
        assert_eq!(host.route_request("echo", request("echo"), None).await, Ok(None));
        assert_eq!(host.get_available_servers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_notification_yields_no_output() {
        let (host, _server) = host_with_echo(false).await;
        let notification = json!({"jsonrpc": "2.0", "method": "echo"});
        assert_eq!(host.route_request("echo", notification, None).await, Ok(None));
    }

    #[tokio::test]
    async fn test_directories() {
        let (host, _server) = host_with_echo(false).await;
        assert!(host.get_server_info("echo").await.is_some());
        assert!(host.get_server_info("ghost").await.is_none());

        host.register_client("c1", ClientInfo::new("cli")).await;
        assert_eq!(host.get_registered_clients().await.len(), 1);
        assert_eq!(host.get_client_info("c1").await.unwrap().info.name, "cli");
        assert!(host.unregister_client("c1").await);
        assert!(host.get_client_info("c1").await.is_none());

        assert!(host.unregister_server("echo").await);
        assert!(host.get_available_servers().await.is_empty());
    }
}

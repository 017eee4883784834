// Lets an MCP client reach its servers through a host

use crate::host::{ClientInfo, Host};
use mcpbroker_core::jsonrpc::{parse, Transport, TransportError};
use mcpbroker_mcp::{ClientError, Connector};
use std::sync::Arc;

/// [`Connector`] that routes every client call through [`Host::route_request`]
pub struct HostConnector {
    host: Arc<Host>,
    client_info: ClientInfo,
}

impl HostConnector {
    pub fn new(host: Arc<Host>, client_info: ClientInfo) -> Self {
        Self { host, client_info }
    }
}

#[async_trait::async_trait]
impl Connector for HostConnector {
    async fn register(&self, client_id: &str) {
        self.host
            .register_client(client_id, self.client_info.clone())
            .await;
    }

    async fn unregister(&self, client_id: &str) {
        self.host.unregister_client(client_id).await;
    }

    async fn transport(&self, client_id: &str, server_id: &str) -> Result<Arc<dyn Transport>, ClientError> {
        if self.host.get_server_info(server_id).await.is_none() {
            return Err(ClientError::UnknownServer(server_id.to_string()));
        }

        Ok(Arc::new(HostTransport {
            host: self.host.clone(),
            client_id: client_id.to_string(),
            server_id: server_id.to_string(),
        }))
    }
}

/// Transport bound to one (client, server) pair on a host
pub struct HostTransport {
    host: Arc<Host>,
    client_id: String,
    server_id: String,
}

#[async_trait::async_trait]
impl Transport for HostTransport {
    async fn send(&self, payload: String) -> Result<String, TransportError> {
        let request = parse(&payload).map_err(|e| TransportError::Failed(e.message))?;

        match self
            .host
            .route_request(&self.server_id, request.clone(), Some(&self.client_id))
            .await
        {
            Ok(Some(response)) => Ok(response.to_string()),
            Ok(None) => Ok(String::new()),
            // Host failures reach the client as ordinary JSON-RPC errors
            Err(e) => Ok(e
                .to_response(&request)
                .map(|response| response.to_string())
                .unwrap_or_default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpbroker_core::consent::NewConsent;
    use mcpbroker_core::jsonrpc::error::{CONSENT_DENIED, SERVER_NOT_FOUND};
    use mcpbroker_core::ConsentLevel;
    use mcpbroker_mcp::{McpClient, McpServer};

    #[tokio::test]
    async fn test_connect_registers_client() {
        let host = Arc::new(Host::new(true));
        let connector = Arc::new(HostConnector::new(host.clone(), ClientInfo::new("test")));
        let client = McpClient::new("c1", connector);

        client.connect().await;
        assert!(host.get_client_info("c1").await.is_some());
        client.disconnect().await;
        assert!(host.get_client_info("c1").await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_server_fails_before_sending() {
        let host = Arc::new(Host::new(true));
        let connector = HostConnector::new(host, ClientInfo::new("test"));
        let err = connector.transport("c1", "ghost").await.err().unwrap();
        assert_eq!(err, ClientError::UnknownServer("ghost".to_string()));
    }

    #[tokio::test]
    async fn test_host_errors_arrive_as_rpc_errors() {
        let host = Arc::new(Host::new(false));
        let server = Arc::new(McpServer::new("tools"));
        host.register_mcp_server(&server).await;

        let transport = HostTransport {
            host: host.clone(),
            client_id: "c1".to_string(),
            server_id: "tools".to_string(),
        };
        let raw = transport
            .send(r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#.to_string())
            .await
            .unwrap();
        let response: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(response["id"], 7);
        assert_eq!(response["error"]["code"], CONSENT_DENIED);

        host.register_consent(NewConsent::new("c1", "tools", "*", ConsentLevel::Basic))
            .await;
        let raw = transport
            .send(r#"{"jsonrpc":"2.0","id":8,"method":"tools/list"}"#.to_string())
            .await
            .unwrap();
        let response: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(response["result"]["tools"], serde_json::json!([]));

        host.unregister_server("tools").await;
        let raw = transport
            .send(r#"{"jsonrpc":"2.0","id":9,"method":"tools/list"}"#.to_string())
            .await
            .unwrap();
        let response: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(response["error"]["code"], SERVER_NOT_FOUND);
    }
}

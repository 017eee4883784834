// Line-delimited stdio gateway in front of a Host

use crate::host::Host;
use futures::{SinkExt, StreamExt};
use mcpbroker_core::jsonrpc::{JsonRpcError, JsonRpcResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

/// One input line: a JSON-RPC message addressed to a server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub server_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub request: Value,
}

/// Handle one input line; `None` when nothing should be written back
pub async fn handle_line(host: &Host, line: &str) -> Option<String> {
    if line.trim().is_empty() {
        return None;
    }

    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected malformed envelope");
            let error = if serde_json::from_str::<Value>(line).is_ok() {
                JsonRpcError::invalid_request(vec![format!("invalid envelope: {}", e)])
            } else {
                JsonRpcError::parse_error(e.to_string())
            };
            return Some(JsonRpcResponse::error(None, error).to_json());
        }
    };

    let Envelope {
        server_id,
        client_id,
        request,
    } = envelope;
    match host
        .route_request(&server_id, request.clone(), client_id.as_deref())
        .await
    {
        Ok(response) => response.map(|response| response.to_string()),
        Err(e) => e.to_response(&request).map(|response| response.to_string()),
    }
}

/// Serve envelopes from `reader` until it closes, one response line each
pub async fn serve<R, W>(host: &Host, reader: R, writer: W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new());
    let mut output = FramedWrite::new(writer, LinesCodec::new());

    while let Some(line) = lines.next().await {
        let line = line?;
        if let Some(response) = handle_line(host, &line).await {
            output.send(response).await?;
        }
    }

    tracing::info!("Input closed, shutting down gateway");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::calculator_server;
    use mcpbroker_core::jsonrpc::error::{INVALID_REQUEST, PARSE_ERROR, SERVER_NOT_FOUND};
    use std::sync::Arc;

    async fn calculator_host() -> (Host, Arc<mcpbroker_mcp::McpServer>) {
        let host = Host::new(true);
        let server = Arc::new(calculator_server().await);
        host.register_mcp_server(&server).await;
        (host, server)
    }

    #[tokio::test]
    async fn test_handle_line_routes_request() {
        let (host, _server) = calculator_host().await;
        let line = r#"{"server_id":"calculator","client_id":"cli","request":{"jsonrpc":"2.0","id":3,"method":"tools/execute","params":{"name":"add","arguments":{"a":1,"b":2}}}}"#;
        let response: Value = serde_json::from_str(&handle_line(&host, line).await.unwrap()).unwrap();
        assert_eq!(response["id"], 3);
        assert_eq!(response["result"]["structuredContent"], serde_json::json!(3));
    }

    #[tokio::test]
    async fn test_bad_lines() {
        let (host, _server) = calculator_host().await;
        assert!(handle_line(&host, "   ").await.is_none());

        let parse: Value = serde_json::from_str(&handle_line(&host, "{nope").await.unwrap()).unwrap();
        assert_eq!(parse["error"]["code"], PARSE_ERROR);

        let invalid: Value = serde_json::from_str(&handle_line(&host, r#"{"request":{}}"#).await.unwrap()).unwrap();
        assert_eq!(invalid["error"]["code"], INVALID_REQUEST);

        let missing: Value = serde_json::from_str(
            &handle_line(&host, r#"{"server_id":"ghost","request":{"jsonrpc":"2.0","id":1,"method":"x"}}"#)
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(missing["id"], 1);
        assert_eq!(missing["error"]["code"], SERVER_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_notifications_never_get_a_line() {
        let host = Host::new(false);
        let server = Arc::new(calculator_server().await);
        host.register_mcp_server(&server).await;

        let denied = r#"{"server_id":"calculator","client_id":"nobody","request":{"jsonrpc":"2.0","method":"tools/list"}}"#;
        assert!(handle_line(&host, denied).await.is_none());

        let missing = r#"{"server_id":"ghost","request":{"jsonrpc":"2.0","method":"tools/list"}}"#;
        assert!(handle_line(&host, missing).await.is_none());

        let batch = r#"{"server_id":"ghost","request":[{"jsonrpc":"2.0","method":"a"},{"jsonrpc":"2.0","method":"b"}]}"#;
        assert!(handle_line(&host, batch).await.is_none());

        // A request in the same position is still answered
        let request = r#"{"server_id":"calculator","client_id":"nobody","request":{"jsonrpc":"2.0","id":4,"method":"tools/list"}}"#;
        let response: Value = serde_json::from_str(&handle_line(&host, request).await.unwrap()).unwrap();
        assert_eq!(response["id"], 4);
        assert!(response["error"].is_object());
    }

    #[tokio::test]
    async fn test_serve_writes_one_line_per_response() {
        let (host, _server) = calculator_host().await;
        let input = concat!(
            r#"{"server_id":"calculator","request":{"jsonrpc":"2.0","id":1,"method":"tools/list"}}"#,
            "\n",
            r#"{"server_id":"calculator","request":{"jsonrpc":"2.0","method":"tools/list"}}"#,
            "\n",
            r#"{"server_id":"calculator","request":{"jsonrpc":"2.0","id":2,"method":"tools/list"}}"#,
            "\n",
        );

        let mut output = Vec::new();
        serve(&host, input.as_bytes(), &mut output).await.unwrap();

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[1]["id"], 2);
    }
}

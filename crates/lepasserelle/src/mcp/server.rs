// MCP Server Implementation
//
// JSON-RPC 2.0 over stdio. Messages are either `Content-Length` framed or one JSON
// document per line; replies use Content-Length framing once the client has used it.

use super::handlers::{error_payload, ToolHandler};
use super::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::engine::Engine;
use anyhow::Context;
use serde_json::Value;
use std::num::ParseIntError;
use std::sync::Arc;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// MCP protocol revision announced during `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// MCP server bound to one engine
///
/// Cloning is cheap; every request is handled on its own task so a tool call that
/// waits on an approval gate does not block the `submit-approval-response` that
/// resolves it.
#[derive(Clone)]
pub struct McpServer {
    engine: Arc<Engine>,
    handlers: Arc<Vec<ToolHandler>>,
}

struct Outgoing {
    body: String,
    framed: bool,
}

impl McpServer {
    /// Server exposing every tool over `engine`
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            handlers: Arc::new(ToolHandler::all()),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Serve stdin/stdout until stdin closes
    pub async fn run_stdio(self) -> anyhow::Result<()> {
        info!(
            "Serving MCP on stdio for {}",
            self.engine.workspace_root().display()
        );
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve one connection until `reader` reaches end of input
    ///
    /// In-flight calls are allowed to finish before the writer is closed.
    pub async fn serve<R, W>(self, reader: R, writer: W) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut reader = BufReader::new(reader);
        let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();

        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(outgoing) = rx.recv().await {
                write_frame(&mut writer, &outgoing).await?;
            }
            Ok::<(), std::io::Error>(())
        });

        let mut use_content_length = false;
        while let Some((payload, framed)) = read_message(&mut reader)
            .await
            .context("Failed to read from client")?
        {
            use_content_length = use_content_length || framed;

            let server = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(response) = server.handle_message(&payload).await {
                    let body = serde_json::to_string(&response).unwrap_or_else(|e| {
                        format!(
                            "{{\"jsonrpc\":\"2.0\",\"id\":null,\"error\":{{\"code\":-32603,\"message\":\"Failed to serialize response: {}\"}}}}",
                            e
                        )
                    });
                    let _ = tx.send(Outgoing {
                        body,
                        framed: use_content_length,
                    });
                }
            });
        }

        debug!("Client closed input, draining in-flight calls");
        drop(tx);
        writer_task
            .await
            .context("Writer task panicked")?
            .context("Failed to write to client")?;
        Ok(())
    }

    /// Decode and handle one raw message; `None` for notifications
    pub async fn handle_message(&self, payload: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<JsonRpcRequest>(payload) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => {
                warn!("Failed to parse JSON-RPC request: {}", e);
                Some(JsonRpcResponse::error(
                    Value::Null,
                    JsonRpcError::parse_error(e.to_string()),
                ))
            }
        }
    }

    /// Handle one request; `None` for notifications
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone();
        let notification = request.is_notification();

        if let Err(e) = request.validate() {
            warn!("Invalid JSON-RPC request: {}", e);
            return (!notification).then(|| JsonRpcResponse::error(id, e));
        }

        debug!("Received JSON-RPC request: method={}", request.method);
        let result = match request.method.as_str() {
            "initialize" => Ok(self.initialize_result()),
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => Ok(list_tools_json(&self.handlers)),
            "tools/call" => self.handle_tool_call(&request).await,
            method if method.starts_with("notifications/") => return None,
            method => Err(JsonRpcError::method_not_found(method.to_string())),
        };

        if notification {
            return None;
        }
        Some(JsonRpcResponse::from_result(id, result))
    }

    fn initialize_result(&self) -> Value {
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": "lecoord",
                "version": env!("CARGO_PKG_VERSION")
            }
        })
    }

    /// Handle tool call requests
    ///
    /// Tool failures are returned as a successful JSON-RPC response with `isError`
    /// set, as MCP expects; only an unknown tool or malformed params are protocol errors.
    async fn handle_tool_call(&self, request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        let tool_call = request.extract_tool_call()?;
        debug!("Tool call: name={}", tool_call.name);

        let handler = self
            .handlers
            .iter()
            .find(|h| h.name() == tool_call.name)
            .ok_or_else(|| JsonRpcError::method_not_found(tool_call.name.clone()))?;

        let payload = match handler.execute(&self.engine, tool_call.arguments).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Tool {} failed: {}", tool_call.name, e);
                error_payload(&e)
            }
        };

        let is_error = payload.get("success").and_then(Value::as_bool) != Some(true);
        let text = serde_json::to_string_pretty(&payload)
            .unwrap_or_else(|_| "Error serializing result".to_string());

        Ok(serde_json::json!({
            "content": [
                {
                    "type": "text",
                    "text": text
                }
            ],
            "structuredContent": payload,
            "isError": is_error
        }))
    }
}

/// List tools as JSON
pub fn list_tools_json(handlers: &[ToolHandler]) -> Value {
    let tools: Vec<_> = handlers
        .iter()
        .map(|handler| {
            serde_json::json!({
                "name": handler.name(),
                "description": handler.description(),
                "inputSchema": handler.argument_schema()
            })
        })
        .collect();

    serde_json::json!({ "tools": tools })
}

fn content_length(line: &str) -> Option<Result<usize, ParseIntError>> {
    let (name, value) = line.split_once(':')?;
    name.trim()
        .eq_ignore_ascii_case("content-length")
        .then(|| value.trim().parse())
}

/// Next message and whether it was Content-Length framed; `None` at end of input
async fn read_message<R>(reader: &mut R) -> std::io::Result<Option<(String, bool)>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }

        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        let length = match content_length(line) {
            None => return Ok(Some((line.to_string(), false))),
            Some(Ok(length)) => length,
            Some(Err(e)) => {
                warn!("Invalid Content-Length header: {}", e);
                continue;
            }
        };

        // remaining headers up to the blank separator
        loop {
            let mut header = String::new();
            if reader.read_line(&mut header).await? == 0 {
                return Ok(None);
            }
            if header.trim().is_empty() {
                break;
            }
        }

        let mut buf = vec![0u8; length];
        reader.read_exact(&mut buf).await?;
        return Ok(Some((String::from_utf8_lossy(&buf).into_owned(), true)));
    }
}

async fn write_frame<W>(writer: &mut W, outgoing: &Outgoing) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = if outgoing.framed {
        format!(
            "Content-Length: {}\r\n\r\n{}",
            outgoing.body.len(),
            outgoing.body
        )
    } else {
        format!("{}\n", outgoing.body)
    };
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::error_codes;
    use tempfile::tempdir;

    fn server() -> (tempfile::TempDir, McpServer) {
        let dir = tempdir().unwrap();
        let engine = Engine::load(dir.path()).unwrap();
        (dir, McpServer::new(Arc::new(engine)))
    }

    #[test]
    fn test_content_length_header() {
        assert_eq!(content_length("Content-Length: 42"), Some(Ok(42)));
        assert_eq!(content_length("content-length:7"), Some(Ok(7)));
        assert!(matches!(content_length("Content-Length: x"), Some(Err(_))));
        assert_eq!(content_length(r#"{"jsonrpc":"2.0"}"#), None);
    }

    #[tokio::test]
    async fn test_read_message_both_framings() {
        let input = b"Content-Length: 2\r\nContent-Type: application/json\r\n\r\n{}\n{\"a\":1}\n".to_vec();
        let mut reader = BufReader::new(&input[..]);

        let (first, framed) = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(first, "{}");
        assert!(framed);

        let (second, framed) = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(second, "{\"a\":1}");
        assert!(!framed);

        assert!(read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let (_dir, server) = server();

        let init = server
            .handle_message(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
            .await
            .unwrap();
        let result = init.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], "lecoord");
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);

        let list = server
            .handle_message(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
            .await
            .unwrap();
        assert_eq!(list.result.unwrap()["tools"].as_array().unwrap().len(), 14);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let (_dir, server) = server();
        assert!(server
            .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let (_dir, server) = server();

        let parse = server.handle_message("{not json").await.unwrap();
        assert_eq!(parse.error.unwrap().code, error_codes::PARSE_ERROR);

        let unknown = server
            .handle_message(r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#)
            .await
            .unwrap();
        assert_eq!(unknown.error.unwrap().code, error_codes::METHOD_NOT_FOUND);

        let tool = server
            .handle_message(
                r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"no-such-tool"}}"#,
            )
            .await
            .unwrap();
        assert_eq!(tool.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_tool_failure_is_reported_in_result() {
        let (_dir, server) = server();
        let response = server
            .handle_message(
                r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"get-coordination-status","arguments":{"operationId":"op-missing"}}}"#,
            )
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(result["structuredContent"]["success"], false);
        assert_eq!(
            result["structuredContent"]["error"]["kind"],
            "ValidationError"
        );
        assert_eq!(
            result["structuredContent"]["error"]["data"]["ids"]["operationId"],
            "op-missing"
        );
    }

    #[tokio::test]
    async fn test_serve_replies_in_client_framing() {
        let (_dir, server) = server();
        let request = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        let input = format!("Content-Length: {}\r\n\r\n{}", request.len(), request);

        let (client, server_end) = tokio::io::duplex(1 << 16);
        server.serve(input.as_bytes(), server_end).await.unwrap();

        let mut output = String::new();
        let mut client = client;
        client.read_to_string(&mut output).await.unwrap();
        assert!(output.starts_with("Content-Length: "));
        assert!(output.contains(r#""id":1"#));
        assert!(output.contains(r#""result":{}"#));
    }
}

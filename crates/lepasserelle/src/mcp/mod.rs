// MCP (Model Context Protocol) JSON-RPC Server
//
// Exposes the coordination engine as MCP tools over JSON-RPC 2.0 on stdio.
//
// # Example
//
// ```ignore
// use lepasserelle::{engine::Engine, mcp::McpServer};
// use std::sync::Arc;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let engine = Arc::new(Engine::load("/path/to/workspace")?);
//     McpServer::new(engine).run_stdio().await
// }
// ```

pub mod handlers;
pub mod protocol;
mod server;

pub use handlers::ToolHandler;
pub use protocol::{error_codes, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use server::{list_tools_json, McpServer, PROTOCOL_VERSION};

/// MCP server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

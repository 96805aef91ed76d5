// lepasserelle - Tool Gateway
//
// *La Passerelle* (The Bridge) - wires the coordination crates into one engine and
// serves it as MCP tools and a CLI

#![warn(unused_extern_crates)]

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod mcp;

pub use config::EngineConfig;
pub use engine::Engine;
pub use errors::{GatewayError, Result};
pub use mcp::McpServer;

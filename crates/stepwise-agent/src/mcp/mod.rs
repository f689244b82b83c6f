//! Client side of external tool servers (JSON-RPC 2.0 over stdio).

mod client;
mod manager;
mod tool;

pub use client::{MCP_PROTOCOL_VERSION, McpCallResult, McpClient, McpServerSpec, McpToolInfo};
#[cfg(test)]
pub(crate) use client::fake_server_spec;
pub use manager::McpManager;
pub use tool::McpTool;

// ABOUTME: MCP integration — protocol types, the stdio client, the tool adapter, and the manager.
// ABOUTME: External tool servers surface as ordinary tools named mcp__<server>__<tool>.

pub mod adapter;
pub mod client;
pub mod manager;
pub mod protocol;

pub use adapter::{McpToolAdapter, qualified_name};
pub use client::{McpConnection, McpConnector, StdioConnector, StdioMcpClient};
pub use manager::{McpManager, McpServerInfo, ServerStatus};

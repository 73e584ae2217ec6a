// ABOUTME: Tool module — the tool contract and the registry that dispatches by name.
// ABOUTME: Built-in tool bodies live outside this crate; MCP tools plug in through the same trait.

pub mod registry;
pub mod types;

pub use registry::ToolRegistry;
pub use types::{Tool, ToolContext, ToolExecutor, ToolResult};

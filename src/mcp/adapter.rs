// ABOUTME: Wraps one server-advertised MCP tool into the local Tool contract.
// ABOUTME: Names are namespaced as mcp__<server>__<tool> and always require approval.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::client::McpConnection;
use super::protocol::McpToolDefinition;
use crate::permissions::PermissionLevel;
use crate::provider::ToolDefinition;
use crate::tools::{Tool, ToolContext, ToolResult};

pub fn qualified_name(server: &str, tool: &str) -> String {
    format!("mcp__{server}__{tool}")
}

pub struct McpToolAdapter {
    connection: Arc<dyn McpConnection>,
    remote_name: String,
    definition: ToolDefinition,
}

impl McpToolAdapter {
    pub fn new(
        connection: Arc<dyn McpConnection>,
        server_name: &str,
        tool: McpToolDefinition,
    ) -> Self {
        let definition = ToolDefinition {
            name: qualified_name(server_name, &tool.name),
            description: tool
                .description
                .unwrap_or_else(|| format!("MCP tool: {}", tool.name)),
            input_schema: tool
                .input_schema
                .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
        };
        Self {
            connection,
            remote_name: tool.name,
            definition,
        }
    }

    /// Tool name as the server knows it.
    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn permission_level(&self) -> PermissionLevel {
        PermissionLevel::Ask
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let outcome = tokio::select! {
            outcome = self.connection.call_tool(&self.remote_name, input) => outcome,
            _ = ctx.cancellation.cancelled() => return Ok(ToolResult::failure("Cancelled")),
        };

        Ok(match outcome {
            Ok(result) if result.is_error => ToolResult::failure(result.joined_text()),
            Ok(result) => ToolResult::ok(result.joined_text()),
            Err(e) => {
                tracing::debug!(tool = %self.definition.name, error = %e, "MCP call failed");
                ToolResult::failure(format!("MCP tool error: {e:#}"))
            }
        })
    }
}

// ABOUTME: The tool contract: definition, permission level, and async execution.
// ABOUTME: Results are plain data; failures are carried in the result, not raised.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::permissions::PermissionLevel;
use crate::provider::{ContentBlock, ToolCall, ToolDefinition};

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Failure that still carries whatever the tool managed to produce.
    pub fn failure_with_output(error: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
        }
    }

    /// Text fed back to the model for this result.
    pub fn content(&self) -> String {
        if self.success {
            return self.output.clone();
        }
        let error = self.error.as_deref().unwrap_or("Tool failed");
        if self.output.is_empty() {
            error.to_string()
        } else {
            format!("{error}\n{}", self.output)
        }
    }

    pub fn to_block(&self, tool_use_id: &str) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.to_string(),
            content: self.content(),
            is_error: !self.success,
        }
    }
}

/// Ambient data handed to every invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub working_directory: PathBuf,
    pub cancellation: CancellationToken,
}

impl ToolContext {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// Something the model can call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    fn permission_level(&self) -> PermissionLevel;

    /// Run the tool. `Err` is reported to the model as a failed result.
    async fn execute(&self, input: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult>;

    fn name(&self) -> String {
        self.definition().name
    }
}

/// Runs the tool calls the agent loop materializes, one at a time.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolResult;
}

// ABOUTME: Events exchanged between the agent task and its host.
// ABOUTME: AgentEvent flows out of the loop; UserEvent flows into the agent task.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::tools::ToolResult;

/// Events sent from the agent loop to the caller, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Streaming text from the model.
    TextDelta(String),
    /// The model started a tool call.
    ToolCallStart { id: String, name: String },
    /// A tool call's input finished streaming and was parsed.
    ToolCallInput {
        id: String,
        name: String,
        input: Value,
    },
    /// A tool call finished executing.
    ToolCallComplete {
        id: String,
        name: String,
        result: ToolResult,
    },
    /// The model answered without requesting tools.
    TurnComplete,
    /// The turn was aborted.
    Error(String),
    /// Informational message from the agent task (model switched, history compressed).
    Notice(String),
    /// The agent task finished handling a user event and is ready for the next.
    Ready,
}

/// Requests sent from the host to the agent task.
#[derive(Debug, Clone)]
pub enum UserEvent {
    /// Run a turn. Cancelling the token aborts it.
    Message {
        text: String,
        cancel: CancellationToken,
    },
    /// Switch the active model (and its backend).
    SetModel(String),
    /// Flip planning mode.
    TogglePlan,
    /// Summarize older history now.
    Compact,
    /// Drop all history.
    Clear,
    /// Report model, history size, and permission state.
    Status,
    Quit,
}

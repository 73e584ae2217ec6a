// ABOUTME: Agent module — the streaming turn loop, planning mode, and history compaction.
// ABOUTME: Owns conversation history and dispatches tool calls through a ToolExecutor.

pub mod compaction;
pub mod events;
pub mod r#loop;
pub mod planner;

pub use compaction::ConversationCompressor;
pub use events::{AgentEvent, UserEvent};
pub use planner::Planner;
pub use r#loop::{AgentConfig, AgentLoop, LoopState, TurnOutcome};

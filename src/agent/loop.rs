// ABOUTME: Streaming agent loop — drives one conversation between user, model, and tools.
// ABOUTME: Accumulates canonical stream events, dispatches tool calls sequentially, and repeats.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::events::AgentEvent;
use super::planner::Planner;
use crate::provider::{
    ContentBlock, Message, Provider, ProviderOptions, Role, StreamEvent, ToolCall, ToolDefinition,
};
use crate::tools::{ToolExecutor, ToolResult};

pub const CANCELLED: &str = "Cancelled";

/// Where the loop is within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Streaming,
    ToolExecuting,
    Complete,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model produced a final answer after `rounds` stream calls.
    Completed { rounds: usize },
    /// The turn was aborted by a stream error or cancellation.
    Failed { message: String },
}

/// Request parameters for every stream call of the loop.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system_prompt: String,
}

/// A tool call being assembled from streaming events.
struct PendingToolCall {
    id: String,
    name: String,
    json_buf: String,
    input: Option<Value>,
}

/// Text and tool calls collected from one stream.
#[derive(Default)]
struct ResponseAccumulator {
    text: String,
    calls: Vec<PendingToolCall>,
}

impl ResponseAccumulator {
    /// Register a call. Returns false when the id was already started.
    fn start(&mut self, id: &str, name: &str) -> bool {
        if self.calls.iter().any(|c| c.id == id) {
            tracing::debug!(%id, "duplicate tool call start ignored");
            return false;
        }
        self.calls.push(PendingToolCall {
            id: id.to_string(),
            name: name.to_string(),
            json_buf: String::new(),
            input: None,
        });
        true
    }

    fn append(&mut self, id: &str, fragment: &str) {
        match self.calls.iter_mut().find(|c| c.id == id) {
            Some(call) => call.json_buf.push_str(fragment),
            None => tracing::debug!(%id, "tool call delta for unknown id"),
        }
    }

    /// Parse the buffered input. Returns the finalized call.
    fn finish(&mut self, id: &str) -> Option<ToolCall> {
        let call = self.calls.iter_mut().find(|c| c.id == id)?;
        if call.input.is_none() {
            call.input = Some(parse_tool_input(&call.json_buf));
        }
        Some(ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone().unwrap_or_else(empty_object),
        })
    }

    /// Finalized calls in start order.
    fn into_parts(self) -> (String, Vec<ToolCall>) {
        let calls = self
            .calls
            .into_iter()
            .filter_map(|c| match c.input {
                Some(input) => Some(ToolCall {
                    id: c.id,
                    name: c.name,
                    input,
                }),
                None => {
                    tracing::debug!(id = %c.id, "dropping tool call that never ended");
                    None
                }
            })
            .collect();
        (self.text, calls)
    }
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// Parse accumulated tool input, degrading to `{}` when it isn't valid JSON.
pub fn parse_tool_input(buf: &str) -> Value {
    if buf.trim().is_empty() {
        return empty_object();
    }
    match serde_json::from_str(buf) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "tool input is not valid JSON, using {{}}");
            empty_object()
        }
    }
}

/// The assistant message for one response: a text block, then one tool use per call.
fn assistant_message(text: String, calls: &[ToolCall]) -> Option<Message> {
    let mut blocks = Vec::with_capacity(calls.len() + 1);
    if !text.is_empty() {
        blocks.push(ContentBlock::text(text));
    }
    blocks.extend(
        calls
            .iter()
            .map(|c| ContentBlock::tool_use(&c.id, &c.name, c.input.clone())),
    );
    if blocks.is_empty() {
        return None;
    }
    Some(Message::blocks(Role::Assistant, blocks))
}

/// Drives turns for one conversation. Not shared across conversations.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    executor: Arc<dyn ToolExecutor>,
    config: AgentConfig,
    tools: Vec<ToolDefinition>,
    planner: Planner,
    messages: Vec<Message>,
    state: LoopState,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        executor: Arc<dyn ToolExecutor>,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            executor,
            config,
            tools: Vec::new(),
            planner: Planner::default(),
            messages: Vec::new(),
            state: LoopState::Idle,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Start from a previously saved history.
    pub fn with_history(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Swap in a rewritten history, e.g. after compression.
    pub fn replace_history(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub fn clear_messages(&mut self) {
        self.messages.clear();
        self.state = LoopState::Idle;
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn max_tokens(&self) -> u32 {
        self.config.max_tokens
    }

    pub fn set_model(&mut self, model: impl Into<String>, max_tokens: Option<u32>) {
        self.config.model = model.into();
        if let Some(max_tokens) = max_tokens {
            self.config.max_tokens = max_tokens;
        }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn set_provider(&mut self, provider: Arc<dyn Provider>) {
        self.provider = provider;
    }

    pub fn set_tool_definitions(&mut self, tools: Vec<ToolDefinition>) {
        self.tools = tools;
    }

    pub fn plan_mode(&self) -> bool {
        self.planner.is_enabled()
    }

    pub fn set_plan_mode(&mut self, enabled: bool) {
        self.planner.set_enabled(enabled);
    }

    /// Flip plan mode and return the new state.
    pub fn toggle_plan_mode(&mut self) -> bool {
        self.planner.toggle()
    }

    /// Options for the next stream call, with the planning addition applied.
    pub fn provider_options(&self) -> ProviderOptions {
        let system_prompt = self.planner.apply(&self.config.system_prompt);
        ProviderOptions {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system_prompt: (!system_prompt.is_empty()).then_some(system_prompt),
            tools: self.tools.clone(),
        }
    }

    /// Run one user turn to completion, emitting events as they happen.
    ///
    /// A stream error or cancellation ends the turn with an `Error` event.
    /// History committed before that point is kept; the partial response is not.
    pub async fn run_turn(
        &mut self,
        user_text: &str,
        events: &mpsc::Sender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        self.messages.push(Message::user(user_text));
        let mut rounds = 0;

        loop {
            rounds += 1;
            self.state = LoopState::Streaming;

            let (text, calls) = match self.stream_response(events, cancel).await {
                Ok(parts) => parts,
                Err(message) => return self.fail(events, message).await,
            };

            if let Some(message) = assistant_message(text, &calls) {
                self.messages.push(message);
            }

            if calls.is_empty() {
                self.state = LoopState::Complete;
                let _ = events.send(AgentEvent::TurnComplete).await;
                tracing::debug!(rounds, "turn complete");
                return TurnOutcome::Completed { rounds };
            }

            self.state = LoopState::ToolExecuting;
            let mut results = Vec::with_capacity(calls.len());
            let mut cancelled = false;
            for call in &calls {
                // Every tool use still gets a result so the history stays well-formed.
                let result = if cancelled || cancel.is_cancelled() {
                    cancelled = true;
                    ToolResult::failure(CANCELLED)
                } else {
                    self.executor.execute(call, cancel).await
                };
                results.push(result.to_block(&call.id));
                let _ = events
                    .send(AgentEvent::ToolCallComplete {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        result,
                    })
                    .await;
            }
            self.messages.push(Message::tool_results(results));

            if cancelled || cancel.is_cancelled() {
                return self.fail(events, CANCELLED.to_string()).await;
            }
        }
    }

    async fn fail(&mut self, events: &mpsc::Sender<AgentEvent>, message: String) -> TurnOutcome {
        tracing::warn!(error = %message, "turn aborted");
        self.state = LoopState::Complete;
        let _ = events.send(AgentEvent::Error(message.clone())).await;
        TurnOutcome::Failed { message }
    }

    /// Consume one provider stream. `Err` carries the message to report.
    async fn stream_response(
        &self,
        events: &mpsc::Sender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> Result<(String, Vec<ToolCall>), String> {
        let options = self.provider_options();
        let mut stream = self.provider.stream(&self.messages, &options);
        let mut acc = ResponseAccumulator::default();

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CANCELLED.to_string()),
                event = stream.next() => event,
            };

            match event {
                Some(StreamEvent::TextDelta { text }) => {
                    acc.text.push_str(&text);
                    let _ = events.send(AgentEvent::TextDelta(text)).await;
                }
                Some(StreamEvent::ToolCallStart { id, name }) => {
                    if acc.start(&id, &name) {
                        let _ = events.send(AgentEvent::ToolCallStart { id, name }).await;
                    }
                }
                Some(StreamEvent::ToolCallDelta { id, input_fragment }) => {
                    acc.append(&id, &input_fragment);
                }
                Some(StreamEvent::ToolCallEnd { id, .. }) => {
                    if let Some(call) = acc.finish(&id) {
                        let _ = events
                            .send(AgentEvent::ToolCallInput {
                                id: call.id,
                                name: call.name,
                                input: call.input,
                            })
                            .await;
                    }
                }
                Some(StreamEvent::MessageEnd) => return Ok(acc.into_parts()),
                Some(StreamEvent::Error { message }) => return Err(message),
                None => return Err("Provider stream ended unexpectedly".to_string()),
            }
        }
    }
}

// ABOUTME: Ollama chat adapter — NDJSON chunks to canonical events.
// ABOUTME: Whole tool calls are synthesized into the start/delta/end triple with local ids.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::openai::function_tools;
use super::wire::LineBuffer;
use super::{
    ContentBlock, EventStream, Message, MessageContent, Provider, ProviderKind, ProviderOptions,
    Role, StreamEvent, StreamTranslator, drive_stream, http_client, send_json,
};

pub const DEFAULT_HOST: &str = "http://localhost:11434";

/// Adapter for a local Ollama server's `/api/chat`.
#[derive(Clone)]
pub struct OllamaProvider {
    client: reqwest::Client,
    host: String,
}

impl OllamaProvider {
    pub fn new(host: Option<&str>) -> Self {
        Self {
            client: http_client(),
            host: host
                .filter(|h| !h.is_empty())
                .unwrap_or(DEFAULT_HOST)
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/api/chat", self.host))
            .json(body)
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn stream(&self, messages: &[Message], options: &ProviderOptions) -> EventStream {
        let body = build_request(messages, options, true);
        tracing::debug!(model = %options.model, messages = messages.len(), "ollama stream");
        drive_stream(
            ProviderKind::Ollama,
            self.request(&body),
            OllamaTranslator::default(),
        )
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &ProviderOptions,
    ) -> anyhow::Result<Message> {
        let body = build_request(messages, options, false);
        let response = send_json(ProviderKind::Ollama, self.request(&body)).await?;
        let text = response["message"]["content"].as_str().unwrap_or_default();
        Ok(Message::assistant(text))
    }
}

/// Build the JSON request body for `/api/chat`.
pub fn build_request(messages: &[Message], options: &ProviderOptions, stream: bool) -> Value {
    let mut body = json!({
        "model": options.model,
        "messages": convert_messages(messages, options.system_prompt.as_deref()),
        "stream": stream,
        "options": {
            "temperature": options.temperature,
            "num_predict": options.max_tokens,
        },
    });
    if stream && !options.tools.is_empty() {
        body["tools"] = function_tools(&options.tools);
    }
    body
}

fn convert_messages(messages: &[Message], system_prompt: Option<&str>) -> Vec<Value> {
    let mut out = Vec::new();
    if let Some(system) = system_prompt.filter(|s| !s.is_empty()) {
        out.push(json!({ "role": "system", "content": system }));
    }

    for msg in messages {
        let blocks = match &msg.content {
            MessageContent::Text(text) => {
                out.push(json!({ "role": msg.role.as_str(), "content": text }));
                continue;
            }
            MessageContent::Blocks(blocks) => blocks,
        };

        let text = msg.text();
        let tool_calls: Vec<Value> = msg
            .tool_uses()
            .into_iter()
            .map(|(_, name, input)| json!({ "function": { "name": name, "arguments": input } }))
            .collect();

        if msg.role == Role::Assistant && !tool_calls.is_empty() {
            out.push(json!({ "role": "assistant", "content": text, "tool_calls": tool_calls }));
        } else if !text.is_empty() {
            out.push(json!({ "role": msg.role.as_str(), "content": text }));
        }

        for block in blocks {
            if let ContentBlock::ToolResult { content, .. } = block {
                out.push(json!({ "role": "tool", "content": content }));
            }
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ChunkToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    function: ChunkFunction,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Ollama never echoes call ids, so synthesized ones only need to be unique
/// within the process; a turn can span many streams.
static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(0);

fn next_call_id() -> String {
    format!("ollama-tc-{}", NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed))
}

/// Per-stream state for the NDJSON body.
#[derive(Debug, Default)]
pub struct OllamaTranslator {
    lines: LineBuffer,
}

impl OllamaTranslator {
    fn on_line(&mut self, line: &str) -> Vec<StreamEvent> {
        if line.trim().is_empty() {
            return Vec::new();
        }
        let chunk: ChatChunk = match serde_json::from_str(line) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparseable ollama line");
                return Vec::new();
            }
        };
        if let Some(error) = chunk.error {
            return vec![StreamEvent::error(format!("ollama error: {error}"))];
        }

        let mut events = Vec::new();
        if let Some(message) = chunk.message {
            if !message.content.is_empty() {
                events.push(StreamEvent::TextDelta {
                    text: message.content,
                });
            }
            for call in message.tool_calls {
                let id = next_call_id();
                let arguments = match call.function.arguments {
                    Value::Null => "{}".to_string(),
                    other => other.to_string(),
                };
                events.push(StreamEvent::ToolCallStart {
                    id: id.clone(),
                    name: call.function.name.clone(),
                });
                events.push(StreamEvent::ToolCallDelta {
                    id: id.clone(),
                    input_fragment: arguments,
                });
                events.push(StreamEvent::ToolCallEnd {
                    id,
                    name: call.function.name,
                });
            }
        }
        if chunk.done {
            events.push(StreamEvent::MessageEnd);
        }
        events
    }
}

impl StreamTranslator for OllamaTranslator {
    fn on_chunk(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let lines = self.lines.push(chunk);
        lines.iter().flat_map(|l| self.on_line(l)).collect()
    }

    fn on_eof(&mut self) -> Vec<StreamEvent> {
        match self.lines.finish() {
            Some(line) => self.on_line(&line),
            None => Vec::new(),
        }
    }
}

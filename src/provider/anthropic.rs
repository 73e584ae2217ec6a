// ABOUTME: Anthropic Messages API adapter — SSE content-block events to canonical stream events.
// ABOUTME: Tool-use blocks are correlated by block index; system messages lift into the system field.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::wire::{SseDecoder, SseFrame};
use super::{
    ContentBlock, EventStream, Message, MessageContent, Provider, ProviderKind, ProviderOptions,
    Role, StreamEvent, StreamTranslator, drive_stream, http_client, send_json,
};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Adapter for the Anthropic Messages API.
#[derive(Clone)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn stream(&self, messages: &[Message], options: &ProviderOptions) -> EventStream {
        let body = build_request(messages, options, true);
        tracing::debug!(model = %options.model, messages = messages.len(), "anthropic stream");
        drive_stream(
            ProviderKind::Anthropic,
            self.request(&body),
            AnthropicTranslator::default(),
        )
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &ProviderOptions,
    ) -> anyhow::Result<Message> {
        let body = build_request(messages, options, false);
        let response = send_json(ProviderKind::Anthropic, self.request(&body)).await?;
        let text = response["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "text")
                    .filter_map(|b| b["text"].as_str())
                    .collect::<String>()
            })
            .unwrap_or_default();
        Ok(Message::assistant(text))
    }
}

/// Build the JSON request body for `/v1/messages`.
pub fn build_request(messages: &[Message], options: &ProviderOptions, stream: bool) -> Value {
    let mut system_parts: Vec<String> = options.system_prompt.iter().cloned().collect();
    let mut api_messages = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system_parts.push(msg.text()),
            Role::User | Role::Assistant => {
                let content = match &msg.content {
                    MessageContent::Text(text) => Value::String(text.clone()),
                    MessageContent::Blocks(blocks) => {
                        Value::Array(blocks.iter().map(convert_block).collect())
                    }
                };
                api_messages.push(json!({ "role": msg.role.as_str(), "content": content }));
            }
        }
    }

    let mut body = json!({
        "model": options.model,
        "max_tokens": options.max_tokens,
        "temperature": options.temperature,
        "messages": api_messages,
        "stream": stream,
    });
    let system: Vec<String> = system_parts.into_iter().filter(|s| !s.is_empty()).collect();
    if !system.is_empty() {
        body["system"] = Value::String(system.join("\n\n"));
    }
    if !options.tools.is_empty() {
        body["tools"] = options
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
    }
    body
}

fn convert_block(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
        ContentBlock::ToolUse { id, name, input } => {
            json!({ "type": "tool_use", "id": id, "name": name, "input": input })
        }
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            let mut value = json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content,
            });
            if *is_error {
                value["is_error"] = Value::Bool(true);
            }
            value
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseEvent {
    ContentBlockStart {
        index: usize,
        content_block: SseBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: SseDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageStop,
    Error {
        error: SseError,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseBlock {
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct SseError {
    #[serde(default)]
    message: String,
}

/// Per-stream state: open tool blocks keyed by content-block index.
#[derive(Debug, Default)]
pub struct AnthropicTranslator {
    decoder: SseDecoder,
    open_tools: HashMap<usize, (String, String)>,
}

impl AnthropicTranslator {
    fn on_frame(&mut self, frame: &SseFrame) -> Vec<StreamEvent> {
        let event: SseEvent = match serde_json::from_str(&frame.data) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, event = ?frame.event, "skipping unparseable SSE frame");
                return Vec::new();
            }
        };

        match event {
            SseEvent::ContentBlockStart {
                index,
                content_block: SseBlock::ToolUse { id, name },
            } => {
                self.open_tools.insert(index, (id.clone(), name.clone()));
                vec![StreamEvent::ToolCallStart { id, name }]
            }
            SseEvent::ContentBlockStart { .. } => Vec::new(),
            SseEvent::ContentBlockDelta { index, delta } => match delta {
                SseDelta::TextDelta { text } => vec![StreamEvent::TextDelta { text }],
                SseDelta::InputJsonDelta { partial_json } => match self.open_tools.get(&index) {
                    Some((id, _)) => vec![StreamEvent::ToolCallDelta {
                        id: id.clone(),
                        input_fragment: partial_json,
                    }],
                    None => Vec::new(),
                },
                SseDelta::Other => Vec::new(),
            },
            SseEvent::ContentBlockStop { index } => match self.open_tools.remove(&index) {
                Some((id, name)) => vec![StreamEvent::ToolCallEnd { id, name }],
                None => Vec::new(),
            },
            SseEvent::MessageStop => vec![StreamEvent::MessageEnd],
            SseEvent::Error { error } => vec![StreamEvent::error(format!(
                "anthropic stream error: {}",
                error.message
            ))],
            SseEvent::Other => Vec::new(),
        }
    }
}

impl StreamTranslator for AnthropicTranslator {
    fn on_chunk(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let frames = self.decoder.push(chunk);
        frames.iter().flat_map(|f| self.on_frame(f)).collect()
    }

    fn on_eof(&mut self) -> Vec<StreamEvent> {
        match self.decoder.finish() {
            Some(frame) => self.on_frame(&frame),
            None => Vec::new(),
        }
    }
}

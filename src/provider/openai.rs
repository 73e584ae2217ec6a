// ABOUTME: OpenAI Chat Completions adapter — index-keyed tool_call chunks to canonical events.
// ABOUTME: Tool uses become tool_calls, tool results become role=tool messages on the wire.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::wire::SseDecoder;
use super::{
    ContentBlock, EventStream, Message, MessageContent, Provider, ProviderKind, ProviderOptions,
    Role, StreamEvent, StreamTranslator, ToolDefinition, drive_stream, http_client, send_json,
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Adapter for the OpenAI Chat Completions API.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
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
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn stream(&self, messages: &[Message], options: &ProviderOptions) -> EventStream {
        let body = build_request(messages, options, true);
        tracing::debug!(model = %options.model, messages = messages.len(), "openai stream");
        drive_stream(
            ProviderKind::OpenAi,
            self.request(&body),
            OpenAiTranslator::default(),
        )
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &ProviderOptions,
    ) -> anyhow::Result<Message> {
        let body = build_request(messages, options, false);
        let response = send_json(ProviderKind::OpenAi, self.request(&body)).await?;
        let text = response["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default();
        Ok(Message::assistant(text))
    }
}

/// Function-tool declarations shared by the OpenAI-style backends.
pub(crate) fn function_tools(tools: &[ToolDefinition]) -> Value {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                }
            })
        })
        .collect()
}

/// Build the JSON request body for `/chat/completions`.
pub fn build_request(messages: &[Message], options: &ProviderOptions, stream: bool) -> Value {
    let mut body = json!({
        "model": options.model,
        "max_tokens": options.max_tokens,
        "temperature": options.temperature,
        "messages": convert_messages(messages, options.system_prompt.as_deref()),
        "stream": stream,
    });
    if !options.tools.is_empty() {
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
        match msg.role {
            Role::System => out.push(json!({ "role": "system", "content": text })),
            Role::Assistant => {
                let tool_calls: Vec<Value> = msg
                    .tool_uses()
                    .into_iter()
                    .map(|(id, name, input)| {
                        json!({
                            "id": id,
                            "type": "function",
                            "function": { "name": name, "arguments": input.to_string() },
                        })
                    })
                    .collect();
                if tool_calls.is_empty() {
                    out.push(json!({ "role": "assistant", "content": text }));
                } else {
                    let content = if text.is_empty() {
                        Value::Null
                    } else {
                        Value::String(text)
                    };
                    out.push(json!({
                        "role": "assistant",
                        "content": content,
                        "tool_calls": tool_calls,
                    }));
                }
            }
            Role::User => {
                // Tool messages must directly follow the assistant's tool_calls.
                for block in blocks {
                    if let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } = block
                    {
                        out.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_use_id,
                            "content": content,
                        }));
                    }
                }
                if !text.is_empty() {
                    out.push(json!({ "role": "user", "content": text }));
                }
            }
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChunkToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    #[serde(default)]
    message: String,
}

/// Per-stream state: tool calls opened so far, keyed by their wire index.
#[derive(Debug, Default)]
pub struct OpenAiTranslator {
    decoder: SseDecoder,
    active: BTreeMap<u32, (String, String)>,
}

impl OpenAiTranslator {
    fn close_all(&mut self) -> Vec<StreamEvent> {
        std::mem::take(&mut self.active)
            .into_values()
            .map(|(id, name)| StreamEvent::ToolCallEnd { id, name })
            .collect()
    }

    fn on_data(&mut self, data: &str) -> Vec<StreamEvent> {
        if data.trim() == "[DONE]" {
            let mut events = self.close_all();
            events.push(StreamEvent::MessageEnd);
            return events;
        }

        let chunk: Chunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparseable chunk");
                return Vec::new();
            }
        };
        if let Some(error) = chunk.error {
            return vec![StreamEvent::error(format!(
                "openai stream error: {}",
                error.message
            ))];
        }

        let mut events = Vec::new();
        let Some(choice) = chunk.choices.into_iter().next() else {
            return events;
        };

        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            events.push(StreamEvent::TextDelta { text });
        }

        for call in choice.delta.tool_calls {
            let function = call.function.unwrap_or(ChunkFunction {
                name: None,
                arguments: None,
            });
            if let (Some(id), Some(name)) = (call.id, function.name) {
                self.active.insert(call.index, (id.clone(), name.clone()));
                events.push(StreamEvent::ToolCallStart { id, name });
            }
            if let Some(arguments) = function.arguments.filter(|a| !a.is_empty()) {
                if let Some((id, _)) = self.active.get(&call.index) {
                    events.push(StreamEvent::ToolCallDelta {
                        id: id.clone(),
                        input_fragment: arguments,
                    });
                }
            }
        }

        if choice.finish_reason.is_some() {
            events.extend(self.close_all());
            events.push(StreamEvent::MessageEnd);
        }
        events
    }
}

impl StreamTranslator for OpenAiTranslator {
    fn on_chunk(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let frames = self.decoder.push(chunk);
        frames.iter().flat_map(|f| self.on_data(&f.data)).collect()
    }

    fn on_eof(&mut self) -> Vec<StreamEvent> {
        match self.decoder.finish() {
            Some(frame) => self.on_data(&frame.data),
            None => Vec::new(),
        }
    }
}

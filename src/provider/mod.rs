// ABOUTME: Provider module — the canonical streaming contract and one adapter per backend.
// ABOUTME: Adapters translate native wire protocols into StreamEvent; the registry picks one per model.

pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod registry;
pub mod types;
pub mod wire;

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use registry::{ModelEntry, ProviderError, ProviderRegistry};
pub use types::*;

/// Lazily produced canonical events. Always ends with `MessageEnd` or `Error`.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// A backend reachable through a canonical streaming interface.
///
/// Adapters hold no conversation state: the full history travels with every call.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Which backend this adapter speaks to.
    fn kind(&self) -> ProviderKind;

    /// Stream a response for `messages`.
    fn stream(&self, messages: &[Message], options: &ProviderOptions) -> EventStream;

    /// Request a full response in one round trip. Used for summarization.
    async fn complete(
        &self,
        messages: &[Message],
        options: &ProviderOptions,
    ) -> anyhow::Result<Message>;
}

/// The closed set of supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Anthropic,
        ProviderKind::OpenAi,
        ProviderKind::Ollama,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Ollama => "ollama",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "anthropic" => Ok(ProviderKind::Anthropic),
            "openai" => Ok(ProviderKind::OpenAi),
            "ollama" => Ok(ProviderKind::Ollama),
            other => anyhow::bail!(
                "Unknown LLM provider: '{}'. Expected: anthropic, openai, ollama",
                other
            ),
        }
    }
}

/// Converts raw body chunks of one backend into canonical events.
pub(crate) trait StreamTranslator: Send + 'static {
    fn on_chunk(&mut self, chunk: &[u8]) -> Vec<StreamEvent>;

    /// Called once the body is exhausted.
    fn on_eof(&mut self) -> Vec<StreamEvent>;
}

/// Shared HTTP client: no overall timeout (streams can be long), bounded connect.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(30))
        .build()
        .unwrap_or_default()
}

/// Send `request` and translate its body, enforcing the terminal-event contract.
///
/// Transport failures and non-success statuses become a final `Error` event.
/// Nothing is yielded after the first terminal event.
pub(crate) fn drive_stream<T: StreamTranslator>(
    backend: ProviderKind,
    request: reqwest::RequestBuilder,
    mut translator: T,
) -> EventStream {
    Box::pin(async_stream::stream! {
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(%backend, error = %e, "stream request failed");
                yield StreamEvent::error(format!("{backend} request failed: {e}"));
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%backend, %status, "stream request rejected");
            yield StreamEvent::error(format!("{backend} API error ({status}): {body}"));
            return;
        }

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield StreamEvent::error(format!("{backend} stream error: {e}"));
                    return;
                }
            };
            for event in translator.on_chunk(&chunk) {
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    return;
                }
            }
        }

        for event in translator.on_eof() {
            let terminal = event.is_terminal();
            yield event;
            if terminal {
                return;
            }
        }

        tracing::warn!(%backend, "stream ended without a terminal event");
        yield StreamEvent::error(format!("{backend} stream ended unexpectedly"));
    })
}

/// Send a non-streaming request and decode its JSON body.
pub(crate) async fn send_json(
    backend: ProviderKind,
    request: reqwest::RequestBuilder,
) -> anyhow::Result<serde_json::Value> {
    let response = request
        .send()
        .await
        .with_context(|| format!("{backend} request failed"))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .with_context(|| format!("failed to read {backend} response body"))?;
    if !status.is_success() {
        anyhow::bail!("{backend} API error ({status}): {body}");
    }
    serde_json::from_str(&body).with_context(|| format!("failed to parse {backend} response"))
}

// ABOUTME: Conversation compaction — summarizes older messages when context limits approach.
// ABOUTME: Replaces the history prefix with a summary exchange and keeps recent messages verbatim.

use std::sync::Arc;

use crate::config::CompactionConfig;
use crate::provider::{ContentBlock, Message, MessageContent, Provider, ProviderOptions};

pub const SUMMARY_PREFIX: &str = "[Previous conversation summary]: ";

pub const SUMMARY_ACKNOWLEDGEMENT: &str =
    "Understood. I have the context from our previous conversation. How can I help you?";

pub const SUMMARIZATION_PROMPT: &str = "Summarize the following conversation concisely, preserving key context, decisions, and any important technical details that would be needed to continue the conversation. Focus on what was discussed and decided, not on the exact wording.";

/// Messages kept verbatim after compression.
pub const DEFAULT_KEEP_RECENT: usize = 4;

const SUMMARY_MAX_TOKENS: u32 = 1024;

/// Heuristic token count: bytes / 4.
pub fn approx_token_count(text: &str) -> usize {
    text.len() / 4
}

/// Sum approximate token counts across all content blocks of all messages.
pub fn approx_messages_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|msg| match &msg.content {
            MessageContent::Text(text) => approx_token_count(text),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => approx_token_count(text),
                    ContentBlock::ToolUse { input, .. } => approx_token_count(&input.to_string()),
                    ContentBlock::ToolResult { content, .. } => approx_token_count(content),
                })
                .sum(),
        })
        .sum()
}

/// Return the known context window size for a given model identifier.
pub fn context_window_for_model(model: &str) -> u64 {
    if model.contains("claude") {
        200_000
    } else if model.starts_with("o3") || model.starts_with("o4") || model.starts_with("o1") {
        200_000
    } else if model.contains("gpt-4o") || model.contains("gpt-4.1") {
        128_000
    } else if model.contains("mistral") || model.contains("codellama") {
        32_000
    } else {
        // Covers llama and other local models.
        128_000
    }
}

/// Check whether the current conversation exceeds the compaction threshold.
pub fn needs_compaction(messages: &[Message], model: &str, config: &CompactionConfig) -> bool {
    if !config.enabled || messages.len() <= config.keep_recent {
        return false;
    }
    let limit = (context_window_for_model(model) as f64 * config.threshold_ratio) as u64;
    let current_tokens = approx_messages_tokens(messages) as u64;
    current_tokens > limit
}

/// Render messages as `[ROLE]: text` lines separated by blank lines.
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            format!(
                "[{}]: {}",
                m.role.as_str().to_uppercase(),
                m.text_joined("\n")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Summarizes older history through one non-streaming provider call.
pub struct ConversationCompressor {
    provider: Arc<dyn Provider>,
}

impl ConversationCompressor {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    /// Compress `messages`, keeping the last `keep_recent` unchanged.
    ///
    /// Returns the input unchanged when there is nothing older to summarize.
    /// On provider failure the error is returned and the caller keeps its history.
    pub async fn compress(
        &self,
        messages: &[Message],
        model: &str,
        keep_recent: usize,
    ) -> anyhow::Result<Vec<Message>> {
        if messages.len() <= keep_recent {
            return Ok(messages.to_vec());
        }

        let split = messages.len() - keep_recent;
        let (old, recent) = messages.split_at(split);

        let request = vec![Message::user(format!(
            "{SUMMARIZATION_PROMPT}\n\n---\n\n{}",
            render_transcript(old)
        ))];
        let mut options = ProviderOptions::new(model, SUMMARY_MAX_TOKENS);
        options.temperature = 0.0;

        let summary = self.provider.complete(&request, &options).await?;
        tracing::info!(
            summarized = old.len(),
            kept = recent.len(),
            "conversation compressed"
        );

        let mut compressed = Vec::with_capacity(recent.len() + 2);
        compressed.push(Message::user(format!("{SUMMARY_PREFIX}{}", summary.text())));
        compressed.push(Message::assistant(SUMMARY_ACKNOWLEDGEMENT));
        compressed.extend_from_slice(recent);
        Ok(compressed)
    }
}

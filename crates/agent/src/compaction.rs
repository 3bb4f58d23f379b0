//! Conversation compaction.
//!
//! When a conversation grows past its token budget, everything except the
//! newest messages is summarized by one tool-less model call and replaced
//! by a single `event` message carrying the summary.
//!
//! Token counts are estimated at ~4 characters per token, plus 4 tokens of
//! per-message overhead for role and framing.

use companion_config::CompactionConfig;
use companion_core::{ActOptions, ChatMessage, ToolSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::adapter::ModelAdapter;
use crate::context::Context;

const SUMMARY_PROMPT: &str = "You compress conversations. Summarize the transcript below \
in a few short paragraphs. Keep facts about the user, decisions, commitments and open \
questions. Write in the third person and do not add commentary.";

pub const SUMMARY_PREFIX: &str = "Summary of the earlier conversation:";

/// Estimate the token count for a string. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for one message including overhead.
pub fn estimate_message_tokens(message: &ChatMessage) -> usize {
    4 + estimate_tokens(&message.render_plain())
}

pub fn estimate_conversation_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

pub struct Compactor {
    adapter: Arc<ModelAdapter>,
    max_context_tokens: usize,
    keep_recent: usize,
}

impl Compactor {
    pub fn new(adapter: Arc<ModelAdapter>, max_context_tokens: usize, keep_recent: usize) -> Self {
        Self {
            adapter,
            max_context_tokens,
            keep_recent,
        }
    }

    /// `None` when compaction is disabled.
    pub fn from_config(adapter: Arc<ModelAdapter>, config: &CompactionConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(adapter, config.max_context_tokens, config.keep_recent))
    }

    pub fn needs_compaction(&self, conversation: &[ChatMessage]) -> bool {
        conversation.len() > self.keep_recent
            && estimate_conversation_tokens(conversation) > self.max_context_tokens
    }

    /// Compact `context` if it is over budget. Returns whether the
    /// conversation was replaced; failures leave it untouched.
    pub async fn compact(&self, context: &Context) -> bool {
        let conversation = context.conversation();
        if !self.needs_compaction(&conversation) {
            return false;
        }

        let split = conversation.len() - self.keep_recent;
        let (older, recent) = conversation.split_at(split);
        let transcript = older
            .iter()
            .map(|m| format!("{}: {}", m.kind(), m.render_plain()))
            .collect::<Vec<_>>()
            .join("\n\n");

        let request = [
            ChatMessage::system(SUMMARY_PROMPT),
            ChatMessage::user(transcript),
        ];
        let summary = match self
            .adapter
            .act(&request, &ToolSet::empty(), &ActOptions::default(), &|_: &ChatMessage| {})
            .await
        {
            Ok(reply) => reply.text(),
            Err(e) => {
                warn!(error = %e, "Conversation summary failed, keeping full history");
                return false;
            }
        };
        if summary.trim().is_empty() {
            warn!("Conversation summary came back empty, keeping full history");
            return false;
        }

        let mut compacted = Vec::with_capacity(recent.len() + 1);
        compacted.push(ChatMessage::event(format!("{SUMMARY_PREFIX}\n{}", summary.trim())));
        compacted.extend_from_slice(recent);

        info!(
            summarized = older.len(),
            kept = recent.len(),
            "Conversation compacted"
        );
        context.replace_conversation(compacted);
        true
    }
}

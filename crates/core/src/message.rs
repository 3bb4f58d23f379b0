//! Chat message and content part domain types.
//!
//! These are the value objects that flow through the entire system:
//! UI sends a message → Agent appends it to its Context → Model Adapter
//! produces an assistant message → Context notifies observers.
//!
//! A message's variant never changes after creation. Content is append-only
//! while an assistant turn streams, except for a tool part's `tool_output`,
//! which is filled in exactly once after the call resolves.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Token usage statistics accumulated across a single `act` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, input_tokens: u64, output_tokens: u64) {
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// An issued or completed tool call.
///
/// A part with no `tool_output` is a call in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPart {
    /// Stable call id (matches the model's tool_call id)
    pub id: String,

    /// Name of the tool the model asked for
    pub tool: String,

    /// Serialized JSON arguments, exactly as the model sent them
    pub tool_input: String,

    /// Textual outcome, set once the call resolves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<String>,

    /// Optional structured result returned by the tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_data: Option<serde_json::Value>,
}

impl ToolPart {
    pub fn new(
        id: impl Into<String>,
        tool: impl Into<String>,
        tool_input: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            tool_input: tool_input.into(),
            tool_output: None,
            tool_data: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.tool_output.is_some()
    }

    /// Record the outcome of the call. Returns `false` (and changes nothing)
    /// if the part was already resolved.
    pub fn resolve(&mut self, output: impl Into<String>, data: Option<serde_json::Value>) -> bool {
        if self.tool_output.is_some() {
            return false;
        }
        self.tool_output = Some(output.into());
        self.tool_data = data;
        true
    }
}

/// A single piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    /// Displayable prose
    Text { text: String },

    /// The model's reasoning trace, kept apart from `Text` for display
    Thinking { thinking: String },

    /// A tool call issued by the model
    Tool(ToolPart),
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn thinking(thinking: impl Into<String>) -> Self {
        Self::Thinking {
            thinking: thinking.into(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool(&self) -> Option<&ToolPart> {
        match self {
            Self::Tool(part) => Some(part),
            _ => None,
        }
    }
}

/// Lazily regenerates the content of an `interactive_system` message.
#[derive(Clone)]
pub struct PartsRenderer(Arc<dyn Fn() -> Vec<MessagePart> + Send + Sync>);

impl PartsRenderer {
    pub fn new(render: impl Fn() -> Vec<MessagePart> + Send + Sync + 'static) -> Self {
        Self(Arc::new(render))
    }

    pub fn render(&self) -> Vec<MessagePart> {
        (self.0)()
    }
}

impl Default for PartsRenderer {
    fn default() -> Self {
        Self::new(Vec::new)
    }
}

impl std::fmt::Debug for PartsRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PartsRenderer(..)")
    }
}

/// A message in an agent's context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatMessage {
    /// System instructions
    System { content: Vec<MessagePart> },

    /// Human input
    User { content: Vec<MessagePart> },

    /// Model output for one `act` call
    Assistant {
        content: Vec<MessagePart>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
    },

    /// Agent-generated notification; shown apart from user input but sent
    /// to the model as user input
    Event { content: Vec<MessagePart> },

    /// System content regenerated at send time
    InteractiveSystem {
        #[serde(skip)]
        render: PartsRenderer,
        /// Used when the message is displayed or was restored from storage
        fallback: Vec<MessagePart>,
    },
}

impl ChatMessage {
    /// Create a system message with a single text part.
    pub fn system(text: impl Into<String>) -> Self {
        Self::System {
            content: vec![MessagePart::text(text)],
        }
    }

    /// Create a user message with a single text part.
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            content: vec![MessagePart::text(text)],
        }
    }

    /// Create an event message with a single text part.
    pub fn event(text: impl Into<String>) -> Self {
        Self::Event {
            content: vec![MessagePart::text(text)],
        }
    }

    /// Create an empty assistant message ready to accumulate parts.
    pub fn assistant() -> Self {
        Self::Assistant {
            content: Vec::new(),
            usage: None,
        }
    }

    /// Create an assistant message with a single text part.
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::Assistant {
            content: vec![MessagePart::text(text)],
            usage: None,
        }
    }

    /// Create an interactive system message whose content is produced by
    /// `render` each time the message is sent.
    pub fn interactive(
        render: impl Fn() -> Vec<MessagePart> + Send + Sync + 'static,
        fallback: Vec<MessagePart>,
    ) -> Self {
        Self::InteractiveSystem {
            render: PartsRenderer::new(render),
            fallback,
        }
    }

    /// The wire-independent type tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::Event { .. } => "event",
            Self::InteractiveSystem { .. } => "interactive_system",
        }
    }

    /// Static content. For interactive messages this is the fallback.
    pub fn content(&self) -> &[MessagePart] {
        match self {
            Self::System { content }
            | Self::User { content }
            | Self::Assistant { content, .. }
            | Self::Event { content } => content,
            Self::InteractiveSystem { fallback, .. } => fallback,
        }
    }

    /// Content as it should be sent right now. Interactive messages are
    /// re-rendered; an empty rendering falls back to the static content.
    pub fn resolved_content(&self) -> Vec<MessagePart> {
        match self {
            Self::InteractiveSystem { render, fallback } => {
                let parts = render.render();
                if parts.is_empty() {
                    fallback.clone()
                } else {
                    parts
                }
            }
            other => other.content().to_vec(),
        }
    }

    /// Append a part. Interactive messages are immutable and ignore pushes.
    pub fn push_part(&mut self, part: MessagePart) {
        match self {
            Self::System { content }
            | Self::User { content }
            | Self::Assistant { content, .. }
            | Self::Event { content } => content.push(part),
            Self::InteractiveSystem { .. } => {}
        }
    }

    /// The most recent tool part, if the message ends with one.
    pub fn last_tool_part_mut(&mut self) -> Option<&mut ToolPart> {
        match self {
            Self::Assistant { content, .. } => match content.last_mut() {
                Some(MessagePart::Tool(part)) => Some(part),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn usage(&self) -> Option<TokenUsage> {
        match self {
            Self::Assistant { usage, .. } => *usage,
            _ => None,
        }
    }

    pub fn set_usage(&mut self, new_usage: TokenUsage) {
        if let Self::Assistant { usage, .. } = self {
            *usage = Some(new_usage);
        }
    }

    /// Text parts joined by newlines. Thinking and tool parts are skipped.
    pub fn text(&self) -> String {
        self.content()
            .iter()
            .filter_map(MessagePart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// All tool parts, in order.
    pub fn tool_parts(&self) -> impl Iterator<Item = &ToolPart> {
        self.content().iter().filter_map(MessagePart::as_tool)
    }

    /// Plain-text rendering of every part, used for debug traces and
    /// summarization prompts.
    pub fn render_plain(&self) -> String {
        self.content()
            .iter()
            .map(|part| match part {
                MessagePart::Text { text } => text.clone(),
                MessagePart::Thinking { thinking } => format!("(thinking) {thinking}"),
                MessagePart::Tool(call) => format!(
                    "[{}({}) -> {}]",
                    call.tool,
                    call.tool_input,
                    call.tool_output.as_deref().unwrap_or("pending")
                ),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

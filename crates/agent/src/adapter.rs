//! The Model Adapter: the iterative tool-calling loop.
//!
//! One `act` call turns a history plus a tool set into exactly one final
//! assistant message:
//!
//! 1. **Translate** the history to wire messages
//! 2. **Send** it to the remote endpoint with the tool definitions
//! 3. **Record** reasoning and text from the response as parts
//! 4. **If tool calls**: run each one in order, record the outcome, append
//!    a tool-result wire message, loop back to step 2
//! 5. **Otherwise**: return the accumulated message
//!
//! Tool failures never escape as errors; they become the call's
//! `tool_output`. Only transport failures and a missing connection do.

use companion_core::{
    ActOptions, ChatMessage, Error, MessagePart, Provider, ProviderRequest, Result, TokenUsage,
    ToolArgs, ToolError, ToolPart, ToolSet, WireMessage, WireToolCall,
};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// Progress callback, invoked with the accumulating assistant message
/// after every change.
pub type ProgressFn<'a> = &'a (dyn Fn(&ChatMessage) + Send + Sync);

/// Drives a remote model through the tool-calling protocol.
///
/// Holds no per-call state, so one adapter is shared by many agents.
pub struct ModelAdapter {
    client: RwLock<Option<Arc<dyn Provider>>>,
    model: String,
    defaults: ActOptions,
    max_rounds: usize,
}

impl ModelAdapter {
    /// Create an adapter for `model`. The connection is assigned later with
    /// [`ModelAdapter::set_client`].
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: RwLock::new(None),
            model: model.into(),
            defaults: ActOptions::default(),
            max_rounds: 25,
        }
    }

    pub fn with_client(self, client: Arc<dyn Provider>) -> Self {
        self.set_client(client);
        self
    }

    /// Options used for any field a call leaves unset.
    pub fn with_defaults(mut self, defaults: ActOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Upper bound on model round trips per `act` call.
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    /// Assign the remote connection.
    pub fn set_client(&self, client: Arc<dyn Provider>) {
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = Some(client);
    }

    pub fn has_client(&self) -> bool {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> Result<Arc<dyn Provider>> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::NotConfigured("remote model connection has not been set".into()))
    }

    /// Run the tool-calling loop over `history` and return the final
    /// assistant message.
    pub async fn act(
        &self,
        history: &[ChatMessage],
        tools: &ToolSet,
        options: &ActOptions,
        on_progress: ProgressFn<'_>,
    ) -> Result<ChatMessage> {
        let client = self.client()?;
        let options = options.clone().or(&self.defaults);
        let definitions = tools.definitions();

        let mut wire = to_wire(history);
        let mut result = ChatMessage::assistant();
        let mut usage = TokenUsage::default();

        for round in 1..=self.max_rounds {
            let request = ProviderRequest {
                model: self.model.clone(),
                messages: wire.clone(),
                tools: definitions.clone(),
                max_tokens: options.max_tokens,
                temperature: options.temperature,
                top_p: options.top_p,
                reasoning: options.reasoning,
            };

            debug!(
                provider = %client.name(),
                round,
                messages = request.messages.len(),
                "Model round trip"
            );
            let response = client.complete(request).await?;

            if let Some(u) = response.usage {
                usage.add(u.prompt_tokens as u64, u.completion_tokens as u64);
                result.set_usage(usage);
            }
            if let Some(reasoning) = &response.reasoning {
                result.push_part(MessagePart::thinking(reasoning.clone()));
                on_progress(&result);
            }
            if let Some(text) = &response.content {
                result.push_part(MessagePart::text(text.clone()));
                on_progress(&result);
            }

            if !response.requests_tools() {
                debug!(rounds = round, "Model finished without tool calls");
                return Ok(result);
            }

            wire.push(WireMessage::Assistant {
                content: response.content.clone(),
                tool_calls: response.tool_calls.clone(),
            });

            for call in &response.tool_calls {
                result.push_part(MessagePart::Tool(ToolPart::new(
                    &call.id,
                    &call.name,
                    &call.arguments,
                )));
                on_progress(&result);

                let (output, data) = run_tool(tools, call).await;

                if let Some(part) = result.last_tool_part_mut() {
                    part.resolve(output.clone(), data);
                }
                on_progress(&result);

                wire.push(WireMessage::Tool {
                    tool_call_id: call.id.clone(),
                    content: output,
                });
            }
        }

        warn!(
            max_rounds = self.max_rounds,
            "Tool round limit reached, returning the turn as it stands"
        );
        Ok(result)
    }
}

impl std::fmt::Debug for ModelAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelAdapter")
            .field("model", &self.model)
            .field("connected", &self.has_client())
            .field("max_rounds", &self.max_rounds)
            .finish()
    }
}

/// Look up, validate and run one tool call. Every failure is rendered to
/// text for the model.
async fn run_tool(tools: &ToolSet, call: &WireToolCall) -> (String, Option<serde_json::Value>) {
    let Some(tool) = tools.find(&call.name) else {
        warn!(tool = %call.name, "Model requested an unknown tool");
        return (ToolError::NotFound(call.name.clone()).to_string(), None);
    };

    let args = match ToolArgs::parse(&call.name, &tool.params(), &call.arguments) {
        Ok(args) => args,
        Err(e) => {
            warn!(tool = %call.name, error = %e, "Tool arguments rejected");
            return (e.to_output(&call.name), None);
        }
    };

    match tool.call(args).await {
        Ok(result) => {
            debug!(tool = %call.name, "Tool call succeeded");
            (result.output, result.data)
        }
        Err(e) => {
            warn!(tool = %call.name, error = %e, "Tool call failed");
            (e.to_output(&call.name), None)
        }
    }
}

/// Translate an internal history to wire messages.
///
/// `event` messages are sent as user input. `interactive_system` content is
/// rendered now. An assistant message is split back into the rounds that
/// produced it: each group of resolved tool calls becomes an assistant
/// message carrying the calls plus one tool-result message per call.
/// Unresolved tool parts cannot be represented and are dropped.
pub fn to_wire(history: &[ChatMessage]) -> Vec<WireMessage> {
    let mut wire = Vec::with_capacity(history.len());

    for message in history {
        match message {
            ChatMessage::System { content } => wire.push(WireMessage::System {
                content: join_text(content),
            }),
            ChatMessage::InteractiveSystem { .. } => wire.push(WireMessage::System {
                content: join_text(&message.resolved_content()),
            }),
            ChatMessage::User { content } | ChatMessage::Event { content } => {
                wire.push(WireMessage::User {
                    content: join_text(content),
                })
            }
            ChatMessage::Assistant { content, .. } => push_assistant(&mut wire, content),
        }
    }

    wire
}

fn join_text(parts: &[MessagePart]) -> String {
    parts
        .iter()
        .filter_map(MessagePart::as_text)
        .collect::<Vec<_>>()
        .join("\n")
}

fn push_assistant(wire: &mut Vec<WireMessage>, parts: &[MessagePart]) {
    let mut text: Vec<&str> = Vec::new();
    let mut calls: Vec<&ToolPart> = Vec::new();

    for part in parts {
        match part {
            MessagePart::Text { text: t } => {
                // Text after tool calls belongs to the next round.
                if !calls.is_empty() {
                    flush_round(wire, &mut text, &mut calls);
                }
                text.push(t);
            }
            MessagePart::Thinking { .. } => {}
            MessagePart::Tool(call) => {
                if call.is_resolved() {
                    calls.push(call);
                } else {
                    warn!(
                        tool = %call.tool,
                        id = %call.id,
                        "Dropping unresolved tool call from history"
                    );
                }
            }
        }
    }

    flush_round(wire, &mut text, &mut calls);
}

fn flush_round(wire: &mut Vec<WireMessage>, text: &mut Vec<&str>, calls: &mut Vec<&ToolPart>) {
    if text.is_empty() && calls.is_empty() {
        return;
    }

    let content = if text.is_empty() {
        None
    } else {
        Some(text.join("\n"))
    };
    wire.push(WireMessage::Assistant {
        content,
        tool_calls: calls
            .iter()
            .map(|c| WireToolCall {
                id: c.id.clone(),
                name: c.tool.clone(),
                arguments: c.tool_input.clone(),
            })
            .collect(),
    });
    for call in calls.iter() {
        wire.push(WireMessage::Tool {
            tool_call_id: call.id.clone(),
            content: call.tool_output.clone().unwrap_or_default(),
        });
    }

    text.clear();
    calls.clear();
}

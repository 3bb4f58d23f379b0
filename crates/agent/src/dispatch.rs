//! Sub-agent dispatch: expose an [`Agent`] as a tool of another agent.
//!
//! Every dispatch clears the target's conversation before it runs, so a
//! sub-agent never sees a previous invocation's turns. Its system messages
//! (prompt and memory) are left alone.

use async_trait::async_trait;
use companion_core::{
    ActOptions, ChatMessage, ParamSpec, ReasoningEffort, Tool, ToolArgs, ToolError, ToolResult,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::agent::Agent;

pub const DISPATCH_TOOL: &str = "call_sub_agent";

/// Run `agent` on a fresh conversation seeded with `prompt` and return the
/// text of its final message.
///
/// An agent that is already on the call stack is not re-entered; the
/// caller gets an explanation instead.
pub async fn dispatch_to(
    agent: &Agent,
    prompt: &str,
    reasoning: Option<ReasoningEffort>,
    tool_name: &str,
) -> Result<ToolResult, ToolError> {
    if agent.is_running() {
        warn!(agent = %agent.name(), "Refusing recursive sub-agent dispatch");
        return Ok(ToolResult::text(format!(
            "Sub-agent {} is already running and cannot be invoked recursively",
            agent.name()
        )));
    }

    agent.context().clear_conversation();
    info!(agent = %agent.name(), "Dispatching to sub-agent");

    let options = ActOptions {
        reasoning,
        ..ActOptions::default()
    };
    agent
        .act(ChatMessage::user(prompt), options)
        .await
        .map_err(|e| ToolError::failed(tool_name, e.to_string()))?;

    let answer = agent
        .context()
        .last_message()
        .map(|m| m.text())
        .unwrap_or_default();
    Ok(ToolResult::text(answer))
}

/// One fixed sub-agent under its own tool name.
pub struct SubAgentTool {
    name: String,
    description: String,
    agent: Arc<Agent>,
    reasoning: Option<ReasoningEffort>,
}

impl SubAgentTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        agent: Arc<Agent>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            agent,
            reasoning: None,
        }
    }

    pub fn with_reasoning(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning = Some(effort);
        self
    }
}

#[async_trait]
impl Tool for SubAgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::string("prompt", "The request for the sub-agent")]
    }

    async fn call(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let prompt = args.require_str("prompt")?;
        dispatch_to(&self.agent, prompt, self.reasoning, &self.name).await
    }
}

/// An entry in the dispatch registry.
#[derive(Clone)]
pub struct SubAgent {
    pub name: String,
    pub description: String,
    pub agent: Arc<Agent>,
    pub reasoning: Option<ReasoningEffort>,
}

impl SubAgent {
    pub fn new(name: impl Into<String>, description: impl Into<String>, agent: Arc<Agent>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            agent,
            reasoning: None,
        }
    }

    pub fn with_reasoning(mut self, effort: Option<ReasoningEffort>) -> Self {
        self.reasoning = effort;
        self
    }
}

impl std::fmt::Debug for SubAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubAgent")
            .field("name", &self.name)
            .field("reasoning", &self.reasoning)
            .finish()
    }
}

/// `call_sub_agent`: invoke one of a fixed list of sub-agents by name.
pub struct SubAgentDispatchTool {
    sub_agents: Vec<SubAgent>,
    description: String,
}

impl SubAgentDispatchTool {
    pub fn new(sub_agents: Vec<SubAgent>) -> Self {
        let listing = sub_agents
            .iter()
            .map(|s| format!("- {}: {}", s.name, s.description))
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            description: format!(
                "Delegate a task to a specialised sub-agent and get its answer. \
                 Each call starts the sub-agent fresh, so include everything it needs \
                 in the prompt. Available sub-agents:\n{listing}"
            ),
            sub_agents,
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.sub_agents.iter().map(|s| s.name.as_str()).collect()
    }
}

#[async_trait]
impl Tool for SubAgentDispatchTool {
    fn name(&self) -> &str {
        DISPATCH_TOOL
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::string("name", "Name of the sub-agent to call"),
            ParamSpec::string("prompt", "The request for the sub-agent"),
        ]
    }

    async fn call(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let name = args.require_str("name")?;
        let prompt = args.require_str("prompt")?;

        let Some(sub_agent) = self.sub_agents.iter().find(|s| s.name == name) else {
            return Ok(ToolResult::text(format!(
                "No sub-agent named '{name}'. Valid names are: {}",
                self.names().join(", ")
            )));
        };

        dispatch_to(&sub_agent.agent, prompt, sub_agent.reasoning, DISPATCH_TOOL).await
    }
}

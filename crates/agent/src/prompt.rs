//! `ask_user`: a tool that blocks on a single free-text answer.

use async_trait::async_trait;
use companion_core::{ParamSpec, Tool, ToolArgs, ToolError, ToolResult};
use std::sync::Arc;
use tracing::info;

use crate::side_channel::SideChannel;

pub const PROMPT_TOOL: &str = "ask_user";

/// Asks the human a question through a [`SideChannel`] and returns the
/// answer. A cancelled or superseded request becomes a failed tool call.
pub struct PromptTool {
    channel: Arc<SideChannel>,
}

impl PromptTool {
    pub fn new(channel: Arc<SideChannel>) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &Arc<SideChannel> {
        &self.channel
    }
}

#[async_trait]
impl Tool for PromptTool {
    fn name(&self) -> &str {
        PROMPT_TOOL
    }

    fn description(&self) -> &str {
        "Ask the user a short question and wait for their answer. \
         Use this when you need information only the user has."
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::string("question", "The question to show the user")]
    }

    async fn call(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let question = args.require_str("question")?;
        info!(question = %question, "Asking the user");

        self.channel
            .start(question)
            .await
            .map(ToolResult::text)
            .map_err(|e| ToolError::failed(PROMPT_TOOL, e.to_string()))
    }
}

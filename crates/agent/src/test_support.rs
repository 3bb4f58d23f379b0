//! Shared test doubles for the agent crate's unit tests.

use async_trait::async_trait;
use companion_core::{
    ParamSpec, Provider, ProviderError, ProviderRequest, ProviderResponse, Tool, ToolArgs,
    ToolError, ToolResult, WireToolCall,
};
use std::collections::VecDeque;
use std::sync::Mutex;

/// A provider that returns scripted responses in order and records every
/// request it receives.
///
/// Panics if more calls are made than responses provided.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider whose next call fails with `error`.
    pub fn failing(error: ProviderError) -> Self {
        let provider = Self::new(vec![]);
        provider.push_error(error);
        provider
    }

    pub fn push_error(&self, error: ProviderError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedProvider: no more responses (call #{call})"))
    }
}

/// A tool call with JSON arguments.
pub fn tool_call(id: &str, name: &str, args: serde_json::Value) -> WireToolCall {
    raw_tool_call(id, name, &args.to_string())
}

/// A tool call with arguments passed through verbatim.
pub fn raw_tool_call(id: &str, name: &str, arguments: &str) -> WireToolCall {
    WireToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    }
}

/// Echoes its `text` argument and remembers every call.
#[derive(Default)]
pub struct EchoTool {
    calls: Mutex<Vec<String>>,
}

impl EchoTool {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes back the input"
    }
    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::string("text", "Text to echo")]
    }
    async fn call(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let text = args.require_str("text")?.to_string();
        self.calls.lock().unwrap().push(text.clone());
        Ok(ToolResult::text(text))
    }
}

/// Always fails with the given message.
pub struct FailingTool {
    name: String,
    message: String,
}

impl FailingTool {
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn params(&self) -> Vec<ParamSpec> {
        vec![]
    }
    async fn call(&self, _args: ToolArgs) -> Result<ToolResult, ToolError> {
        Err(ToolError::failed(&self.name, &self.message))
    }
}

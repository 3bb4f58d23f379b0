#![allow(dead_code)]

use async_trait::async_trait;
use companion_agent::{ModelAdapter, Orchestrator, OrchestratorBuilder, OrchestratorSettings};
use companion_core::{
    KeyValueStore, ParamSpec, Provider, ProviderError, ProviderRequest, ProviderResponse, Tool,
    ToolArgs, ToolError, ToolResult, WireToolCall,
};
use companion_store::InMemoryStore;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const ROOT_PROMPT: &str = "ROOT PROMPT";
pub const PLANNER_PROMPT: &str = "PLANNER PROMPT";
pub const INTERVIEW_PROMPT: &str = "INTERVIEWER PROMPT";

/// Returns queued responses in order and records every request.
/// Panics when it runs out.
#[derive(Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, response: ProviderResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
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

    pub fn last_request(&self) -> ProviderRequest {
        self.requests.lock().unwrap().last().cloned().expect("no requests")
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedProvider: no more responses")
    }
}

/// Picks the response queue by a marker found in the request's first
/// (system) message, so agents running concurrently each get their own
/// script.
#[derive(Default)]
pub struct RoutedProvider {
    routes: Mutex<Vec<(String, VecDeque<ProviderResponse>)>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl RoutedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, marker: &str, responses: Vec<ProviderResponse>) {
        self.routes
            .lock()
            .unwrap()
            .push((marker.to_string(), responses.into()));
    }

    pub fn requests_for(&self, marker: &str) -> Vec<ProviderRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| system_of(r).contains(marker))
            .cloned()
            .collect()
    }
}

fn system_of(request: &ProviderRequest) -> String {
    request
        .messages
        .first()
        .and_then(|m| m.content())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Provider for RoutedProvider {
    fn name(&self) -> &str {
        "routed"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let system = system_of(&request);
        self.requests.lock().unwrap().push(request);
        let mut routes = self.routes.lock().unwrap();
        let (marker, queue) = routes
            .iter_mut()
            .find(|(marker, _)| system.contains(marker.as_str()))
            .unwrap_or_else(|| panic!("RoutedProvider: no route for system prompt {system:?}"));
        Ok(queue
            .pop_front()
            .unwrap_or_else(|| panic!("RoutedProvider: route {marker} exhausted")))
    }
}

pub fn tool_call(id: &str, name: &str, args: serde_json::Value) -> WireToolCall {
    WireToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}

pub fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        base_prompt: ROOT_PROMPT.into(),
        planner_prompt: PLANNER_PROMPT.into(),
        interview_prompt: INTERVIEW_PROMPT.into(),
        ..OrchestratorSettings::default()
    }
}

pub fn builder(store: Arc<dyn KeyValueStore>) -> OrchestratorBuilder {
    Orchestrator::builder(Arc::new(ModelAdapter::new("mock-model")), store)
        .with_settings(settings())
}

pub fn empty_store() -> Arc<dyn KeyValueStore> {
    Arc::new(InMemoryStore::new())
}

/// A store that already holds a plan, so bootstrap skips planning.
pub fn planned_store(plan: &str) -> Arc<dyn KeyValueStore> {
    Arc::new(InMemoryStore::with_slots([("main_plan", plan)]))
}

/// A `search` tool that always throws `boom`.
pub struct BrokenSearch;

#[async_trait]
impl Tool for BrokenSearch {
    fn name(&self) -> &str {
        "search"
    }
    fn description(&self) -> &str {
        "Searches the journal"
    }
    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::string("query", "What to look for")]
    }
    async fn call(&self, _args: ToolArgs) -> Result<ToolResult, ToolError> {
        Err(ToolError::failed("search", "boom"))
    }
}

/// Echoes `text` back.
pub struct Echo;

#[async_trait]
impl Tool for Echo {
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
        Ok(ToolResult::text(args.require_str("text")?))
    }
}

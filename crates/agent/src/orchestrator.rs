//! The main orchestrator: root agent, planner, sub-agents and the event
//! queue, wired together and bootstrapped once.
//!
//! ```text
//!   init(provider)
//!     ├─ connect the shared adapter
//!     ├─ load conversation + previous plan from the store
//!     ├─ run the planner (no plan yet, or resuming mid-conversation)
//!     ├─ load sub-agent memories
//!     ├─ root system = base prompt + plan
//!     └─ mirror the root conversation back into the store
//! ```
//!
//! Background notifications go through [`Orchestrator::push_event`] and
//! reach the root agent as one batched `event` message per
//! [`Orchestrator::act_events`] drain.

use companion_config::{AppConfig, OrchestratorConfig, SubAgentConfig};
use companion_core::{
    ActOptions, ChatMessage, Error, KeyValueStore, Provider, ReasoningEffort, Result, ToolSet,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::adapter::ModelAdapter;
use crate::agent::Agent;
use crate::compaction::Compactor;
use crate::context::lock;
use crate::dispatch::{SubAgent, SubAgentDispatchTool};
use crate::interview::{Interview, InterviewTool};
use crate::persistence::{ConversationPersistence, load_conversation};
use crate::prompt::PromptTool;
use crate::side_channel::SideChannel;
use crate::status::{SetMoodTool, StatusSource, StoreStatus};
use crate::workflow_log::WorkflowLog;

pub const PLANNER_WORKFLOW: &str = "planner";
pub const ROOT_WORKFLOW: &str = "root";

/// Prompts and store slots used by the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub base_prompt: String,
    pub planner_prompt: String,
    pub interview_prompt: String,
    pub conversation_key: String,
    pub plan_key: String,
    pub planner_reasoning: Option<ReasoningEffort>,
}

impl From<&OrchestratorConfig> for OrchestratorSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            base_prompt: config.base_prompt.clone(),
            planner_prompt: config.planner_prompt.clone(),
            interview_prompt: config.interview_prompt.clone(),
            conversation_key: config.conversation_key.clone(),
            plan_key: config.plan_key.clone(),
            planner_reasoning: config.planner_reasoning,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

/// Definition of a sub-agent the root can delegate to.
#[derive(Debug, Clone)]
pub struct SubAgentSpec {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub reasoning: Option<ReasoningEffort>,
    /// Store slot appended to the system prompt
    pub memory_key: Option<String>,
}

impl SubAgentSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            system_prompt: system_prompt.into(),
            reasoning: None,
            memory_key: None,
        }
    }

    pub fn with_reasoning(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning = Some(effort);
        self
    }

    pub fn with_memory_key(mut self, key: impl Into<String>) -> Self {
        self.memory_key = Some(key.into());
        self
    }
}

impl From<&SubAgentConfig> for SubAgentSpec {
    fn from(config: &SubAgentConfig) -> Self {
        Self {
            name: config.name.clone(),
            description: config.description.clone(),
            system_prompt: config.system_prompt.clone(),
            reasoning: config.reasoning,
            memory_key: config.memory_key.clone(),
        }
    }
}

struct ManagedSubAgent {
    spec: SubAgentSpec,
    agent: Arc<Agent>,
}

pub struct OrchestratorBuilder {
    adapter: Arc<ModelAdapter>,
    store: Arc<dyn KeyValueStore>,
    settings: OrchestratorSettings,
    status: Option<Arc<dyn StatusSource>>,
    sub_agents: Vec<SubAgentSpec>,
    domain_tools: ToolSet,
    compactor: Option<Compactor>,
    workflow_log: Option<Arc<WorkflowLog>>,
}

impl OrchestratorBuilder {
    pub fn new(adapter: Arc<ModelAdapter>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            adapter,
            store,
            settings: OrchestratorSettings::default(),
            status: None,
            sub_agents: Vec::new(),
            domain_tools: ToolSet::empty(),
            compactor: None,
            workflow_log: None,
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Defaults to reading status slots from the store.
    pub fn with_status(mut self, status: Arc<dyn StatusSource>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_sub_agent(mut self, spec: SubAgentSpec) -> Self {
        self.sub_agents.push(spec);
        self
    }

    /// Tools given to the root agent and every sub-agent.
    pub fn with_domain_tools(mut self, tools: ToolSet) -> Self {
        self.domain_tools.extend(tools);
        self
    }

    pub fn with_compactor(mut self, compactor: Compactor) -> Self {
        self.compactor = Some(compactor);
        self
    }

    pub fn with_workflow_log(mut self, log: Arc<WorkflowLog>) -> Self {
        self.workflow_log = Some(log);
        self
    }

    pub fn build(self) -> Orchestrator {
        let workflow_log = self.workflow_log.unwrap_or_default();
        let status = self
            .status
            .unwrap_or_else(|| Arc::new(StoreStatus::new(self.store.clone())));

        let sub_agents: Vec<ManagedSubAgent> = self
            .sub_agents
            .into_iter()
            .map(|spec| {
                let agent = Agent::new(&spec.name, self.adapter.clone(), self.domain_tools.clone())
                    .with_system_prompt(&spec.system_prompt)
                    .with_workflow_log(workflow_log.clone());
                ManagedSubAgent {
                    spec,
                    agent: Arc::new(agent),
                }
            })
            .collect();

        let planner = Arc::new(
            Agent::new(PLANNER_WORKFLOW, self.adapter.clone(), ToolSet::empty())
                .with_system_prompt(&self.settings.planner_prompt)
                .with_workflow_log(workflow_log.clone()),
        );

        let prompt = Arc::new(SideChannel::new("prompt"));
        let interview = Arc::new(Interview::new(
            self.adapter.clone(),
            &self.settings.interview_prompt,
        ));

        let mut root_tools = ToolSet::empty()
            .with(Arc::new(SetMoodTool::new(self.store.clone())))
            .with(Arc::new(PromptTool::new(prompt.clone())))
            .with(Arc::new(InterviewTool::new(interview.clone())));
        if !sub_agents.is_empty() {
            root_tools.push(Arc::new(SubAgentDispatchTool::new(
                sub_agents
                    .iter()
                    .map(|s| {
                        SubAgent::new(&s.spec.name, &s.spec.description, s.agent.clone())
                            .with_reasoning(s.spec.reasoning)
                    })
                    .collect(),
            )));
        }
        root_tools.extend(self.domain_tools);

        let root = Arc::new(
            Agent::new(ROOT_WORKFLOW, self.adapter.clone(), root_tools)
                .with_system_prompt(&self.settings.base_prompt)
                .with_workflow_log(workflow_log.clone()),
        );

        Orchestrator {
            adapter: self.adapter,
            settings: self.settings,
            root,
            planner,
            sub_agents,
            prompt,
            interview,
            store: self.store,
            status,
            compactor: self.compactor,
            workflow_log,
            events: Mutex::new(Vec::new()),
            plan: Mutex::new(None),
            initialized: AtomicBool::new(false),
            init_lock: tokio::sync::Mutex::new(()),
            persistence: Mutex::new(None),
        }
    }
}

pub struct Orchestrator {
    adapter: Arc<ModelAdapter>,
    settings: OrchestratorSettings,
    root: Arc<Agent>,
    planner: Arc<Agent>,
    sub_agents: Vec<ManagedSubAgent>,
    prompt: Arc<SideChannel>,
    interview: Arc<Interview>,
    store: Arc<dyn KeyValueStore>,
    status: Arc<dyn StatusSource>,
    compactor: Option<Compactor>,
    workflow_log: Arc<WorkflowLog>,
    events: Mutex<Vec<String>>,
    plan: Mutex<Option<String>>,
    initialized: AtomicBool,
    init_lock: tokio::sync::Mutex<()>,
    persistence: Mutex<Option<ConversationPersistence>>,
}

impl Orchestrator {
    pub fn builder(
        adapter: Arc<ModelAdapter>,
        store: Arc<dyn KeyValueStore>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder::new(adapter, store)
    }

    /// Build an orchestrator from application configuration. The remote
    /// connection is supplied later, to [`Orchestrator::init`].
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn KeyValueStore>,
        domain_tools: ToolSet,
    ) -> Self {
        let defaults = ActOptions {
            max_tokens: config.max_tokens,
            temperature: Some(config.temperature),
            top_p: config.top_p,
            ..ActOptions::default()
        };
        let adapter = Arc::new(
            ModelAdapter::new(&config.model)
                .with_defaults(defaults)
                .with_max_rounds(config.max_tool_rounds),
        );

        let mut builder = OrchestratorBuilder::new(adapter.clone(), store)
            .with_settings(OrchestratorSettings::from(&config.orchestrator))
            .with_domain_tools(domain_tools);
        for sub_agent in &config.sub_agents {
            builder = builder.with_sub_agent(sub_agent.into());
        }
        if let Some(compactor) = Compactor::from_config(adapter, &config.compaction) {
            builder = builder.with_compactor(compactor);
        }
        builder.build()
    }

    /// One-time bootstrap. Later calls return immediately.
    ///
    /// If any step fails the orchestrator stays uninitialized and `init`
    /// may be retried.
    pub async fn init(&self, client: Arc<dyn Provider>) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if self.is_initialized() {
            return Ok(());
        }

        info!(provider = client.name(), model = self.adapter.model(), "Initializing orchestrator");
        self.adapter.set_client(client);

        let restored =
            load_conversation(self.store.as_ref(), &self.settings.conversation_key).await?;
        let previous_plan = self.store.get(&self.settings.plan_key).await?;

        let plan = match previous_plan {
            Some(plan) if restored.is_empty() => {
                debug!("Reusing the stored plan");
                plan
            }
            previous => {
                let plan = self.run_planner(previous.as_deref(), &restored).await?;
                self.store
                    .set(&self.settings.plan_key, plan.clone())
                    .await?;
                plan
            }
        };

        self.refresh_memory().await?;

        let root = self.root.context();
        root.replace_conversation(restored);
        root.set_system(vec![ChatMessage::system(compose_system(
            &self.settings.base_prompt,
            &plan,
        ))]);
        *lock(&self.plan) = Some(plan);

        *lock(&self.persistence) = Some(ConversationPersistence::attach(
            self.root.clone(),
            self.store.clone(),
            &self.settings.conversation_key,
        ));

        self.initialized.store(true, Ordering::SeqCst);
        info!(
            restored_messages = root.conversation_len(),
            sub_agents = self.sub_agents.len(),
            "Orchestrator initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Re-read every sub-agent's memory slot into its system prompt.
    pub async fn refresh_memory(&self) -> Result<()> {
        for sub_agent in &self.sub_agents {
            let Some(key) = &sub_agent.spec.memory_key else {
                continue;
            };
            let system = match self.store.get(key).await? {
                Some(memory) if !memory.trim().is_empty() => {
                    format!("{}\n\n{}", sub_agent.spec.system_prompt, memory.trim())
                }
                _ => sub_agent.spec.system_prompt.clone(),
            };
            sub_agent
                .agent
                .context()
                .set_system(vec![ChatMessage::system(system)]);
        }
        Ok(())
    }

    /// Run the planner on a synthesized status block and return its plan.
    /// The planner's own conversation is discarded either way.
    pub async fn run_planner(
        &self,
        previous_plan: Option<&str>,
        last_conversation: &[ChatMessage],
    ) -> Result<String> {
        let status = self.status.status().await?;
        let block = planning_context(
            status.phase.as_deref(),
            status.mood.as_deref(),
            status.recent_activity.as_deref(),
            previous_plan,
            last_conversation,
        );

        let mut options = ActOptions::new().with_workflow_name(PLANNER_WORKFLOW);
        options.reasoning = self.settings.planner_reasoning;

        self.planner.context().clear_conversation();
        let outcome = self.planner.act(ChatMessage::user(block), options).await;
        self.planner.context().clear_conversation();

        let plan = outcome?.text();
        info!(chars = plan.len(), "Plan computed");
        Ok(plan)
    }

    /// Send a message to the root agent.
    pub async fn act(&self, message: ChatMessage) -> Result<ChatMessage> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }
        if let Some(compactor) = &self.compactor {
            compactor.compact(self.root.context()).await;
        }
        self.root
            .act(message, ActOptions::new().with_workflow_name(ROOT_WORKFLOW))
            .await
    }

    /// Queue a background notification for the next drain.
    pub fn push_event(&self, text: impl Into<String>) {
        let text = text.into();
        debug!(event = %text, "Event queued");
        lock(&self.events).push(text);
    }

    pub fn pending_events(&self) -> Vec<String> {
        lock(&self.events).clone()
    }

    /// Send every queued event to the root agent as one `event` message.
    ///
    /// The queue is emptied before the call is made; an empty queue makes
    /// no call and returns `None`.
    pub async fn act_events(&self) -> Result<Option<ChatMessage>> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }
        let batch = std::mem::take(&mut *lock(&self.events));
        if batch.is_empty() {
            return Ok(None);
        }

        info!(events = batch.len(), "Draining event queue");
        self.act(ChatMessage::event(batch.join("\n"))).await.map(Some)
    }

    pub fn current_plan(&self) -> Option<String> {
        lock(&self.plan).clone()
    }

    pub fn root(&self) -> &Arc<Agent> {
        &self.root
    }

    pub fn planner(&self) -> &Arc<Agent> {
        &self.planner
    }

    pub fn sub_agent(&self, name: &str) -> Option<&Arc<Agent>> {
        self.sub_agents
            .iter()
            .find(|s| s.spec.name == name)
            .map(|s| &s.agent)
    }

    pub fn sub_agent_names(&self) -> Vec<&str> {
        self.sub_agents.iter().map(|s| s.spec.name.as_str()).collect()
    }

    /// The `ask_user` side channel.
    pub fn prompt(&self) -> &Arc<SideChannel> {
        &self.prompt
    }

    pub fn interview(&self) -> &Arc<Interview> {
        &self.interview
    }

    pub fn adapter(&self) -> &Arc<ModelAdapter> {
        &self.adapter
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn workflow_log(&self) -> &Arc<WorkflowLog> {
        &self.workflow_log
    }

    /// Stop persisting and wait for pending writes.
    pub async fn shutdown(&self) {
        let persistence = lock(&self.persistence).take();
        if let Some(persistence) = persistence {
            persistence.detach().await;
        }
        info!("Orchestrator shut down");
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("initialized", &self.is_initialized())
            .field("sub_agents", &self.sub_agent_names())
            .field("pending_events", &lock(&self.events).len())
            .finish()
    }
}

fn compose_system(base_prompt: &str, plan: &str) -> String {
    if plan.trim().is_empty() {
        base_prompt.to_string()
    } else {
        format!("{base_prompt}\n\n## Plan for this session\n{}", plan.trim())
    }
}

fn planning_context(
    phase: Option<&str>,
    mood: Option<&str>,
    recent_activity: Option<&str>,
    last_plan: Option<&str>,
    last_conversation: &[ChatMessage],
) -> String {
    let conversation = if last_conversation.is_empty() {
        "(none)".to_string()
    } else {
        last_conversation
            .iter()
            .map(|m| format!("{}: {}", m.kind(), m.render_plain()))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "## Current phase\n{}\n\n## Current mood\n{}\n\n## Recent activity\n{}\n\n\
         ## Last plan\n{}\n\n## Last conversation\n{}",
        phase.unwrap_or("unknown"),
        mood.unwrap_or("unknown"),
        recent_activity.unwrap_or("(none)"),
        last_plan.unwrap_or("(none)"),
        conversation,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_appends_the_plan() {
        assert_eq!(compose_system("base", "  "), "base");
        assert_eq!(
            compose_system("base", "Focus on sleep"),
            "base\n\n## Plan for this session\nFocus on sleep"
        );
    }

    #[test]
    fn planning_context_lists_every_section() {
        let block = planning_context(
            Some("foundation"),
            None,
            Some("Skipped the morning ritual"),
            Some("old plan"),
            &[ChatMessage::user("hi"), ChatMessage::assistant_text("hello")],
        );
        assert!(block.contains("## Current phase\nfoundation"));
        assert!(block.contains("## Current mood\nunknown"));
        assert!(block.contains("## Recent activity\nSkipped the morning ritual"));
        assert!(block.contains("## Last plan\nold plan"));
        assert!(block.contains("## Last conversation\nuser: hi\nassistant: hello"));
    }

    #[test]
    fn settings_follow_config() {
        let config = OrchestratorConfig {
            plan_key: "plan_v2".into(),
            planner_reasoning: Some(ReasoningEffort::High),
            ..OrchestratorConfig::default()
        };
        let settings = OrchestratorSettings::from(&config);
        assert_eq!(settings.plan_key, "plan_v2");
        assert_eq!(settings.conversation_key, "main_conversation");
        assert_eq!(settings.planner_reasoning, Some(ReasoningEffort::High));
    }
}

//! Configuration loading, validation, and management for Companion.
//!
//! Loads configuration from `~/.companion/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use companion_core::ReasoningEffort;

/// The root configuration structure.
///
/// Maps directly to `~/.companion/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the chat-completions endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model shared by every agent
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Upper bound on model round trips inside one `act` call
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub compaction: CompactionConfig,

    /// Named sub-agents reachable through `call_sub_agent`
    #[serde(default)]
    pub sub_agents: Vec<SubAgentConfig>,
}

fn default_api_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tool_rounds() -> usize {
    25
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("top_p", &self.top_p)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .field("storage", &self.storage)
            .field("orchestrator", &self.orchestrator)
            .field("compaction", &self.compaction)
            .field("sub_agents", &self.sub_agents)
            .finish()
    }
}

/// Where conversation, plan and memory slots are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,

    /// JSON file for the `file` backend. Defaults to `~/.companion/store.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::File
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: None,
        }
    }
}

impl StorageConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("store.json"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Root agent instructions; the current plan is appended at startup
    #[serde(default = "default_base_prompt")]
    pub base_prompt: String,

    /// Instructions for the planning sub-agent
    #[serde(default = "default_planner_prompt")]
    pub planner_prompt: String,

    /// Instructions for the nested interview agent
    #[serde(default = "default_interview_prompt")]
    pub interview_prompt: String,

    #[serde(default = "default_conversation_key")]
    pub conversation_key: String,

    #[serde(default = "default_plan_key")]
    pub plan_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planner_reasoning: Option<ReasoningEffort>,
}

fn default_base_prompt() -> String {
    "You are a warm, direct self-improvement companion. You help the user keep their \
     rituals, honour their rules and reflect on their progress. Use ask_user for a quick \
     clarification, interview_user when you need a longer conversation, set_mood when the \
     user's mood becomes clear, and call_sub_agent to delegate specialised work."
        .into()
}
fn default_planner_prompt() -> String {
    "You plan the companion's next session. Read the status and the previous conversation, \
     then write a short plan: what to focus on, what to ask, and what to avoid. Reply with \
     the plan only."
        .into()
}
fn default_interview_prompt() -> String {
    "You are conducting a short interview with the user about the topic below. Ask one \
     question at a time. When you have enough, call done with a concise summary of what \
     you learned."
        .into()
}
fn default_conversation_key() -> String {
    "main_conversation".into()
}
fn default_plan_key() -> String {
    "main_plan".into()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            base_prompt: default_base_prompt(),
            planner_prompt: default_planner_prompt(),
            interview_prompt: default_interview_prompt(),
            conversation_key: default_conversation_key(),
            plan_key: default_plan_key(),
            planner_reasoning: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Estimated token count above which the root conversation is summarized
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Newest messages kept verbatim after a summary
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
}

fn default_true() -> bool {
    true
}
fn default_max_context_tokens() -> usize {
    24_000
}
fn default_keep_recent() -> usize {
    10
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_context_tokens: default_max_context_tokens(),
            keep_recent: default_keep_recent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentConfig {
    pub name: String,

    /// Shown to the root model in the `call_sub_agent` description
    pub description: String,

    pub system_prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningEffort>,

    /// Store slot whose contents are appended to the sub-agent's system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_key: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.companion/config.toml).
    ///
    /// Also checks environment variables:
    /// - `COMPANION_API_KEY` (highest priority), then `OPENROUTER_API_KEY`,
    ///   then `OPENAI_API_KEY`
    /// - `COMPANION_MODEL`
    /// - `COMPANION_API_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(key) = std::env::var("COMPANION_API_KEY")
            .ok()
            .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
        {
            self.api_key = Some(key);
        }

        if let Ok(model) = std::env::var("COMPANION_MODEL") {
            self.model = model;
        }

        if let Ok(url) = std::env::var("COMPANION_API_URL") {
            self.api_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".companion")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if let Some(top_p) = self.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err(ConfigError::ValidationError(
                    "top_p must be between 0.0 and 1.0".into(),
                ));
            }
        }

        if self.max_tool_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "max_tool_rounds must be at least 1".into(),
            ));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".into()));
        }

        if self.orchestrator.conversation_key == self.orchestrator.plan_key {
            return Err(ConfigError::ValidationError(
                "orchestrator.conversation_key and orchestrator.plan_key must differ".into(),
            ));
        }

        for (i, sub) in self.sub_agents.iter().enumerate() {
            if sub.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "sub_agents[{i}].name must not be empty"
                )));
            }
            if self.sub_agents[..i].iter().any(|s| s.name == sub.name) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate sub-agent name '{}'",
                    sub.name
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
            top_p: None,
            max_tool_rounds: default_max_tool_rounds(),
            storage: StorageConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            compaction: CompactionConfig::default(),
            sub_agents: Vec::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for companion_core::Error {
    fn from(err: ConfigError) -> Self {
        companion_core::Error::Config {
            message: err.to_string(),
        }
    }
}

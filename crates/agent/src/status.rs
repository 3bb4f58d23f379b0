//! Where the planner learns the user's current phase, mood and activity.

use async_trait::async_trait;
use companion_core::{KeyValueStore, ParamSpec, Result, Tool, ToolArgs, ToolError, ToolResult};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

pub const PHASE_KEY: &str = "phase";
pub const MOOD_KEY: &str = "mood";
pub const RECENT_ACTIVITY_KEY: &str = "recent_activity";

pub const SET_MOOD_TOOL: &str = "set_mood";

/// A point-in-time view of the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub phase: Option<String>,
    pub mood: Option<String>,
    pub recent_activity: Option<String>,
}

#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn status(&self) -> Result<Status>;
}

/// Reads the status slots straight out of the key-value store.
pub struct StoreStatus {
    store: Arc<dyn KeyValueStore>,
}

impl StoreStatus {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StatusSource for StoreStatus {
    async fn status(&self) -> Result<Status> {
        Ok(Status {
            phase: self.store.get(PHASE_KEY).await?,
            mood: self.store.get(MOOD_KEY).await?,
            recent_activity: self.store.get(RECENT_ACTIVITY_KEY).await?,
        })
    }
}

/// `set_mood`: record how the user says they feel.
pub struct SetMoodTool {
    store: Arc<dyn KeyValueStore>,
}

impl SetMoodTool {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SetMoodTool {
    fn name(&self) -> &str {
        SET_MOOD_TOOL
    }

    fn description(&self) -> &str {
        "Record the user's current mood in a few words."
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::string("mood", "The user's mood, e.g. 'tired but hopeful'")]
    }

    async fn call(&self, args: ToolArgs) -> std::result::Result<ToolResult, ToolError> {
        let mood = args.require_str("mood")?.trim();
        if mood.is_empty() {
            return Err(ToolError::failed(SET_MOOD_TOOL, "mood must not be empty"));
        }

        self.store
            .set(MOOD_KEY, mood.to_string())
            .await
            .map_err(|e| ToolError::failed(SET_MOOD_TOOL, e.to_string()))?;

        info!(mood = %mood, "Mood updated");
        Ok(ToolResult::text(format!("Mood set to '{mood}'")).with_data(json!({ "mood": mood })))
    }
}

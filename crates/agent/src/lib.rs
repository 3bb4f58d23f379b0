//! The Companion agent runtime.
//!
//! An [`Agent`] binds a [`Context`] (its conversation state), a shared
//! [`ModelAdapter`] (the tool-calling loop) and a fixed tool set:
//!
//! 1. **Append** the incoming message to the conversation
//! 2. **Run** the model loop over system + conversation, executing any
//!    requested tools in order and feeding their outcomes back
//! 3. **Commit** the final assistant message
//!
//! On top of that sit sub-agent dispatch, the human-in-the-loop side
//! channels (`ask_user`, `interview_user`), conversation persistence and
//! compaction, and the [`Orchestrator`] that bootstraps all of it.

pub mod adapter;
pub mod agent;
pub mod compaction;
pub mod context;
pub mod dispatch;
pub mod interview;
pub mod orchestrator;
pub mod persistence;
pub mod prompt;
pub mod side_channel;
pub mod status;
pub mod workflow_log;

#[cfg(test)]
mod test_support;

pub use adapter::ModelAdapter;
pub use agent::Agent;
pub use compaction::Compactor;
pub use context::{Context, ContextSnapshot, Listener, ListenerId};
pub use dispatch::{SubAgent, SubAgentDispatchTool, SubAgentTool, dispatch_to};
pub use interview::{Interview, InterviewTool};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, OrchestratorSettings, SubAgentSpec};
pub use persistence::{ConversationPersistence, load_conversation, restore};
pub use prompt::PromptTool;
pub use side_channel::{
    PendingAnswer, RequestId, SideChannel, SideChannelError, SideChannelState,
};
pub use status::{SetMoodTool, Status, StatusSource, StoreStatus};
pub use workflow_log::{WorkflowEntry, WorkflowLog};

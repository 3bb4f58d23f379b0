//! Agent: a Context, a shared Model Adapter and a fixed tool set.

use companion_core::{ActOptions, ChatMessage, Result, ToolSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

use crate::adapter::ModelAdapter;
use crate::context::Context;
use crate::workflow_log::{WorkflowEntry, WorkflowLog};

pub struct Agent {
    name: String,
    context: Context,
    adapter: Arc<ModelAdapter>,
    tools: ToolSet,
    workflow_log: Option<Arc<WorkflowLog>>,
    /// Number of `act` calls currently on the stack
    active: AtomicUsize,
}

impl Agent {
    pub fn new(name: impl Into<String>, adapter: Arc<ModelAdapter>, tools: ToolSet) -> Self {
        Self {
            name: name.into(),
            context: Context::new(),
            adapter,
            tools,
            workflow_log: None,
            active: AtomicUsize::new(0),
        }
    }

    /// Set a single system message.
    pub fn with_system_prompt(self, prompt: impl Into<String>) -> Self {
        self.context.set_system(vec![ChatMessage::system(prompt)]);
        self
    }

    /// Replace the context, e.g. with one restored from storage.
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn with_workflow_log(mut self, log: Arc<WorkflowLog>) -> Self {
        self.workflow_log = Some(log);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn adapter(&self) -> &Arc<ModelAdapter> {
        &self.adapter
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Whether an `act` call on this agent is in flight.
    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }

    /// Append `message`, run the model loop, and commit its final message.
    ///
    /// The input is recorded before the model is called, so it survives a
    /// failed turn. `in_progress` tracks the accumulating reply and is
    /// always cleared when this returns.
    pub async fn act(&self, message: ChatMessage, options: ActOptions) -> Result<ChatMessage> {
        let _active = ActiveGuard::enter(&self.active);
        info!(agent = %self.name, kind = message.kind(), "Agent turn started");

        self.context.push(message.clone());
        let history = self.context.history();

        let _in_progress = InProgressGuard(&self.context);
        let progress = |partial: &ChatMessage| self.context.set_in_progress(Some(partial.clone()));

        let reply = match self
            .adapter
            .act(&history, &self.tools, &options, &progress)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(agent = %self.name, error = %e, "Agent turn failed");
                return Err(e);
            }
        };

        self.context.commit(reply.clone());

        if let (Some(name), Some(log)) = (&options.workflow_name, &self.workflow_log) {
            log.record(WorkflowEntry::new(
                name,
                &self.name,
                &self.context.system(),
                &message,
                &reply,
            ));
        }

        info!(
            agent = %self.name,
            tool_calls = reply.tool_parts().count(),
            "Agent turn finished"
        );
        Ok(reply)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("tools", &self.tools)
            .field("context", &self.context)
            .finish()
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Clears `in_progress` on every exit path, including cancellation of the
/// enclosing future.
struct InProgressGuard<'a>(&'a Context);

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.set_in_progress(None);
    }
}

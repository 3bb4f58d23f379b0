//! Interview: a full nested conversation with the human, run as a tool.
//!
//! Each interview gets a fresh [`Agent`] seeded with the triggering prompt.
//! That agent talks to the human through [`Interview::respond`] and owns a
//! `done` tool; calling it settles the interview with a summary, which is
//! what the calling tool returns.

use async_trait::async_trait;
use companion_core::{
    ActOptions, ChatMessage, Error, ParamSpec, Result, Tool, ToolArgs, ToolError, ToolResult,
    ToolSet,
};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::adapter::ModelAdapter;
use crate::agent::Agent;
use crate::context::lock;
use crate::side_channel::{RequestId, SideChannel, SideChannelError};

pub const INTERVIEW_TOOL: &str = "interview_user";
pub const DONE_TOOL: &str = "done";

const DONE_INSTRUCTIONS: &str = "When you have gathered what you need, call the `done` tool \
with a concise summary of the user's answers. Ask one question at a time.";

pub struct Interview {
    channel: Arc<SideChannel>,
    adapter: Arc<ModelAdapter>,
    system_prompt: String,
    session: Mutex<Option<Arc<Agent>>>,
    replies: watch::Sender<Option<String>>,
}

impl Interview {
    pub fn new(adapter: Arc<ModelAdapter>, system_prompt: impl Into<String>) -> Self {
        let (replies, _) = watch::channel(None);
        Self {
            channel: Arc::new(SideChannel::new("interview")),
            adapter,
            system_prompt: system_prompt.into(),
            session: Mutex::new(None),
            replies,
        }
    }

    pub fn channel(&self) -> &Arc<SideChannel> {
        &self.channel
    }

    /// The nested agent of the running interview.
    pub fn session(&self) -> Option<Arc<Agent>> {
        lock(&self.session).clone()
    }

    /// The latest message the interviewer said to the human.
    pub fn subscribe_replies(&self) -> watch::Receiver<Option<String>> {
        self.replies.subscribe()
    }

    /// Run an interview to completion and return its summary.
    ///
    /// Settles when the nested agent calls `done`, the human cancels, or a
    /// newer interview supersedes this one.
    pub async fn run(&self, prompt: &str) -> std::result::Result<String, SideChannelError> {
        let done = Arc::new(DoneTool {
            channel: self.channel.clone(),
            request: OnceLock::new(),
        });
        let agent = Arc::new(
            Agent::new("interview", self.adapter.clone(), ToolSet::empty().with(done.clone()))
                .with_system_prompt(format!("{}\n\n{DONE_INSTRUCTIONS}", self.system_prompt)),
        );
        *lock(&self.session) = Some(agent.clone());
        self.replies.send_replace(None);

        let pending = self.channel.start(prompt);
        let request = pending.id();
        let _ = done.request.set(request);
        info!(prompt = %prompt, request, "Interview started");

        match agent
            .act(ChatMessage::user(prompt), ActOptions::default())
            .await
        {
            Ok(reply) => self.publish(&reply),
            Err(e) => {
                warn!(error = %e, "Interview agent failed on its first turn");
                self.channel.reject(request, SideChannelError::Closed(e.to_string()));
            }
        }

        let outcome = pending.await;
        {
            let mut session = lock(&self.session);
            if session.as_ref().is_some_and(|s| Arc::ptr_eq(s, &agent)) {
                *session = None;
            }
        }
        info!(completed = outcome.is_ok(), "Interview settled");
        outcome
    }

    /// Send the human's next line to the running interview.
    pub async fn respond(&self, text: &str) -> Result<ChatMessage> {
        let agent = self
            .session()
            .ok_or_else(|| Error::SideChannel("No interview in progress".into()))?;
        let reply = agent
            .act(ChatMessage::user(text), ActOptions::default())
            .await?;
        self.publish(&reply);
        Ok(reply)
    }

    /// Abandon the running interview.
    pub fn cancel(&self) -> bool {
        self.channel.cancel()
    }

    fn publish(&self, reply: &ChatMessage) {
        let text = reply.text();
        if !text.is_empty() {
            self.replies.send_replace(Some(text));
        }
    }
}

impl std::fmt::Debug for Interview {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interview")
            .field("channel", &self.channel)
            .field("active", &self.session().is_some())
            .finish()
    }
}

/// Settles the interview; only the nested agent sees it. It can only
/// settle the request its own session opened.
struct DoneTool {
    channel: Arc<SideChannel>,
    request: OnceLock<RequestId>,
}

#[async_trait]
impl Tool for DoneTool {
    fn name(&self) -> &str {
        DONE_TOOL
    }

    fn description(&self) -> &str {
        "Finish the interview and hand back a summary of what the user said."
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::string("summary", "Summary of the interview")]
    }

    async fn call(&self, args: ToolArgs) -> std::result::Result<ToolResult, ToolError> {
        let summary = args.require_str("summary")?;
        let settled = self
            .request
            .get()
            .is_some_and(|id| self.channel.submit_to(*id, summary));
        if settled {
            Ok(ToolResult::text("Interview finished."))
        } else {
            Ok(ToolResult::text("No interview is open."))
        }
    }
}

/// Runs an [`Interview`] on behalf of the calling model.
pub struct InterviewTool {
    interview: Arc<Interview>,
}

impl InterviewTool {
    pub fn new(interview: Arc<Interview>) -> Self {
        Self { interview }
    }
}

#[async_trait]
impl Tool for InterviewTool {
    fn name(&self) -> &str {
        INTERVIEW_TOOL
    }

    fn description(&self) -> &str {
        "Hold a short back-and-forth interview with the user about a topic \
         and get back a summary of their answers."
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::string(
            "prompt",
            "What the interview should find out, phrased as the opening question",
        )]
    }

    async fn call(&self, args: ToolArgs) -> std::result::Result<ToolResult, ToolError> {
        let prompt = args.require_str("prompt")?;
        self.interview
            .run(prompt)
            .await
            .map(ToolResult::text)
            .map_err(|e| ToolError::failed(INTERVIEW_TOOL, e.to_string()))
    }
}

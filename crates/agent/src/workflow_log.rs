//! Debug trace of named agent turns.
//!
//! When `ActOptions::workflow_name` is set, an agent records what it was
//! asked and what it answered here. The log is bounded; the oldest entries
//! are dropped first. Recording is best-effort and never affects the turn.

use chrono::{DateTime, Utc};
use companion_core::ChatMessage;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

/// Default number of entries kept.
pub const DEFAULT_CAPACITY: usize = 200;

/// One tool call as seen in a recorded turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallSummary {
    pub tool: String,
    pub input: String,
    pub output: Option<String>,
}

/// A recorded turn.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowEntry {
    pub id: Uuid,
    pub name: String,
    pub agent: String,
    /// Flattened system messages
    pub system: String,
    /// The message that started the turn
    pub input: String,
    /// Text of the final assistant message
    pub output: String,
    pub tool_calls: Vec<ToolCallSummary>,
    pub recorded_at: DateTime<Utc>,
}

impl WorkflowEntry {
    pub fn new(
        name: &str,
        agent: &str,
        system: &[ChatMessage],
        input: &ChatMessage,
        output: &ChatMessage,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            agent: agent.to_string(),
            system: system
                .iter()
                .map(|m| m.render_plain())
                .collect::<Vec<_>>()
                .join("\n\n"),
            input: input.render_plain(),
            output: output.text(),
            tool_calls: output
                .tool_parts()
                .map(|p| ToolCallSummary {
                    tool: p.tool.clone(),
                    input: p.tool_input.clone(),
                    output: p.tool_output.clone(),
                })
                .collect(),
            recorded_at: Utc::now(),
        }
    }
}

/// Bounded in-memory log of [`WorkflowEntry`] values, most recent last.
pub struct WorkflowLog {
    entries: RwLock<VecDeque<WorkflowEntry>>,
    capacity: usize,
}

impl WorkflowLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, entry: WorkflowEntry) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        tracing::debug!(workflow = %entry.name, agent = %entry.agent, "Recorded workflow entry");
        entries.push_back(entry);
    }

    pub fn entries(&self) -> Vec<WorkflowEntry> {
        self.read().iter().cloned().collect()
    }

    /// The `n` most recent entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<WorkflowEntry> {
        let entries = self.read();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn by_name(&self, name: &str) -> Vec<WorkflowEntry> {
        self.read().iter().filter(|e| e.name == name).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, VecDeque<WorkflowEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for WorkflowLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use companion_core::{MessagePart, ToolPart};

    fn entry(name: &str) -> WorkflowEntry {
        WorkflowEntry::new(
            name,
            "root",
            &[ChatMessage::system("sys")],
            &ChatMessage::user("in"),
            &ChatMessage::assistant_text("out"),
        )
    }

    #[test]
    fn oldest_entries_are_dropped() {
        let log = WorkflowLog::new(2);
        log.record(entry("a"));
        log.record(entry("b"));
        log.record(entry("c"));

        let names: Vec<_> = log.entries().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn entry_flattens_messages_and_tool_calls() {
        let mut output = ChatMessage::assistant();
        let mut call = ToolPart::new("c1", "search", r#"{"query":"x"}"#);
        call.resolve("3 results", None);
        output.push_part(MessagePart::Tool(call));
        output.push_part(MessagePart::text("Found them."));

        let e = WorkflowEntry::new(
            "planner",
            "planner",
            &[ChatMessage::system("plan well")],
            &ChatMessage::user("status"),
            &output,
        );
        assert_eq!(e.system, "plan well");
        assert_eq!(e.input, "status");
        assert_eq!(e.output, "Found them.");
        assert_eq!(e.tool_calls[0].tool, "search");
        assert_eq!(e.tool_calls[0].output.as_deref(), Some("3 results"));
    }

    #[test]
    fn recent_and_by_name() {
        let log = WorkflowLog::default();
        log.record(entry("planner"));
        log.record(entry("root"));
        log.record(entry("planner"));

        assert_eq!(log.by_name("planner").len(), 2);
        assert_eq!(log.recent(1)[0].name, "planner");
        log.clear();
        assert!(log.is_empty());
    }
}

//! Conversation persistence through a key-value store.
//!
//! A [`ConversationPersistence`] subscribes to an agent's Context and
//! writes the full conversation (as JSON) to one slot after every change.
//! Writes happen on a background task; bursts of changes are coalesced and
//! only the newest snapshot is written.

use companion_core::{ChatMessage, KeyValueStore, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::agent::Agent;
use crate::context::{Context, ContextSnapshot, ListenerId};

/// Read a persisted conversation. A missing or unreadable slot yields an
/// empty conversation.
pub async fn load_conversation(store: &dyn KeyValueStore, key: &str) -> Result<Vec<ChatMessage>> {
    let Some(raw) = store.get(key).await? else {
        return Ok(Vec::new());
    };

    match serde_json::from_str(&raw) {
        Ok(messages) => Ok(messages),
        Err(e) => {
            warn!(key = %key, error = %e, "Stored conversation is corrupt, starting fresh");
            Ok(Vec::new())
        }
    }
}

/// Load the slot into `context`, replacing its conversation. Returns the
/// number of restored messages.
pub async fn restore(context: &Context, store: &dyn KeyValueStore, key: &str) -> Result<usize> {
    let messages = load_conversation(store, key).await?;
    let count = messages.len();
    context.replace_conversation(messages);
    debug!(key = %key, messages = count, "Conversation restored");
    Ok(count)
}

/// Keeps one agent's conversation mirrored into a store slot.
///
/// Must be attached from inside a tokio runtime.
pub struct ConversationPersistence {
    agent: Arc<Agent>,
    key: String,
    listener: ListenerId,
    writer: JoinHandle<()>,
}

impl ConversationPersistence {
    pub fn attach(
        agent: Arc<Agent>,
        store: Arc<dyn KeyValueStore>,
        key: impl Into<String>,
    ) -> Self {
        let key = key.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let listener_key = key.clone();
        let listener = agent
            .context()
            .subscribe(Arc::new(move |snapshot: &ContextSnapshot| {
                match serde_json::to_string(&snapshot.conversation) {
                    Ok(json) => {
                        let _ = tx.send(json);
                    }
                    Err(e) => {
                        warn!(key = %listener_key, error = %e, "Failed to serialize conversation")
                    }
                }
            }));

        let writer_key = key.clone();
        let writer = tokio::spawn(async move {
            let mut last_written: Option<String> = None;
            while let Some(mut json) = rx.recv().await {
                while let Ok(newer) = rx.try_recv() {
                    json = newer;
                }
                if last_written.as_deref() == Some(json.as_str()) {
                    continue;
                }
                match store.set(&writer_key, json.clone()).await {
                    Ok(()) => last_written = Some(json),
                    Err(e) => {
                        warn!(key = %writer_key, error = %e, "Failed to persist conversation")
                    }
                }
            }
            debug!(key = %writer_key, "Persistence writer stopped");
        });

        debug!(agent = %agent.name(), key = %key, "Conversation persistence attached");
        Self {
            agent,
            key,
            listener,
            writer,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stop listening and wait until every queued snapshot is written.
    pub async fn detach(self) {
        self.agent.context().unsubscribe(self.listener);
        if let Err(e) = self.writer.await {
            warn!(key = %self.key, error = %e, "Persistence writer ended abnormally");
        }
    }
}

impl std::fmt::Debug for ConversationPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationPersistence")
            .field("agent", &self.agent.name())
            .field("key", &self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ModelAdapter;
    use crate::test_support::ScriptedProvider;
    use companion_core::{ActOptions, ProviderResponse, ToolSet};
    use companion_store::InMemoryStore;

    #[tokio::test]
    async fn conversation_survives_a_restart() {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(ScriptedProvider::new(vec![ProviderResponse::text("Hello!")]));
        let adapter = Arc::new(ModelAdapter::new("mock-model").with_client(provider));
        let agent = Arc::new(Agent::new("root", adapter, ToolSet::empty()));

        let persistence = ConversationPersistence::attach(agent.clone(), store.clone(), "main");
        agent
            .act(ChatMessage::user("Hi"), ActOptions::default())
            .await
            .unwrap();
        persistence.detach().await;
        assert_eq!(agent.context().listener_count(), 0);

        let fresh = Context::new();
        let restored = restore(&fresh, store.as_ref(), "main").await.unwrap();
        assert_eq!(restored, 2);
        let conversation = fresh.conversation();
        assert_eq!(conversation[0].text(), "Hi");
        assert_eq!(conversation[1].text(), "Hello!");
    }

    #[tokio::test]
    async fn missing_and_corrupt_slots_load_empty() {
        let store = InMemoryStore::with_slots([("bad", "{not json")]);
        assert!(load_conversation(&store, "absent").await.unwrap().is_empty());
        assert!(load_conversation(&store, "bad").await.unwrap().is_empty());
    }
}

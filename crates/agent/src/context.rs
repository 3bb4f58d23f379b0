//! Per-agent conversation state with change notification.
//!
//! A [`Context`] holds three things:
//!
//! - `system`: system messages, replaced wholesale
//! - `conversation`: committed history, appended through [`Context::push`]
//! - `in_progress`: the assistant turn currently streaming, if any
//!
//! Every mutation publishes a full [`ContextSnapshot`] to each registered
//! listener. Listeners run after the state lock is released, so a listener
//! may read the context again without deadlocking.

use companion_core::ChatMessage;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle returned by [`Context::subscribe`].
pub type ListenerId = u64;

/// Callback invoked with the full state after every mutation.
pub type Listener = Arc<dyn Fn(&ContextSnapshot) + Send + Sync>;

/// A full copy of a context's state.
#[derive(Debug, Clone, Default)]
pub struct ContextSnapshot {
    pub system: Vec<ChatMessage>,
    pub conversation: Vec<ChatMessage>,
    pub in_progress: Option<ChatMessage>,
}

impl ContextSnapshot {
    /// System messages followed by the conversation.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.system
            .iter()
            .chain(self.conversation.iter())
            .cloned()
            .collect()
    }
}

#[derive(Default)]
pub struct Context {
    state: Mutex<ContextSnapshot>,
    listeners: Mutex<BTreeMap<ListenerId, Listener>>,
    next_listener: AtomicU64,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context with the given system messages.
    pub fn with_system(system: Vec<ChatMessage>) -> Self {
        let context = Self::new();
        lock(&context.state).system = system;
        context
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        lock(&self.state).clone()
    }

    pub fn system(&self) -> Vec<ChatMessage> {
        lock(&self.state).system.clone()
    }

    pub fn conversation(&self) -> Vec<ChatMessage> {
        lock(&self.state).conversation.clone()
    }

    pub fn conversation_len(&self) -> usize {
        lock(&self.state).conversation.len()
    }

    pub fn last_message(&self) -> Option<ChatMessage> {
        lock(&self.state).conversation.last().cloned()
    }

    pub fn in_progress(&self) -> Option<ChatMessage> {
        lock(&self.state).in_progress.clone()
    }

    /// System messages followed by the conversation, as sent to the model.
    pub fn history(&self) -> Vec<ChatMessage> {
        lock(&self.state).history()
    }

    pub fn set_system(&self, system: Vec<ChatMessage>) {
        self.mutate(|state| {
            state.system = system;
            true
        });
    }

    /// Append one message to the conversation.
    pub fn push(&self, message: ChatMessage) {
        self.mutate(|state| {
            state.conversation.push(message);
            true
        });
    }

    /// Append the final message of a turn and clear `in_progress` with a
    /// single notification.
    pub fn commit(&self, message: ChatMessage) {
        self.mutate(|state| {
            state.conversation.push(message);
            state.in_progress = None;
            true
        });
    }

    pub fn replace_conversation(&self, conversation: Vec<ChatMessage>) {
        self.mutate(|state| {
            state.conversation = conversation;
            true
        });
    }

    pub fn clear_conversation(&self) {
        self.mutate(|state| {
            if state.conversation.is_empty() {
                return false;
            }
            state.conversation.clear();
            true
        });
    }

    pub fn set_in_progress(&self, message: Option<ChatMessage>) {
        self.mutate(|state| {
            if message.is_none() && state.in_progress.is_none() {
                return false;
            }
            state.in_progress = message;
            true
        });
    }

    /// Register a listener. It is not called for the current state, only
    /// for later mutations.
    pub fn subscribe(&self, listener: Listener) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).insert(id, listener);
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        lock(&self.listeners).remove(&id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Apply `change` under the lock; notify if it reports a change.
    fn mutate(&self, change: impl FnOnce(&mut ContextSnapshot) -> bool) {
        let snapshot = {
            let mut state = lock(&self.state);
            if !change(&mut state) {
                return;
            }
            state.clone()
        };

        let listeners: Vec<Listener> = lock(&self.listeners).values().cloned().collect();
        for listener in listeners {
            listener(&snapshot);
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Context")
            .field("system", &state.system.len())
            .field("conversation", &state.conversation.len())
            .field("in_progress", &state.in_progress.is_some())
            .field("listeners", &lock(&self.listeners).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_listener(counter: Arc<AtomicUsize>) -> Listener {
        Arc::new(move |_: &ContextSnapshot| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn history_is_system_then_conversation() {
        let context = Context::with_system(vec![ChatMessage::system("be kind")]);
        context.push(ChatMessage::user("hi"));
        let history = context.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind(), "system");
        assert_eq!(history[1].kind(), "user");
    }

    #[test]
    fn listeners_receive_full_snapshots() {
        let context = Context::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        context.subscribe(Arc::new(move |snapshot: &ContextSnapshot| {
            lock(&sink).push(snapshot.conversation.len());
        }));

        context.push(ChatMessage::user("one"));
        context.push(ChatMessage::user("two"));
        context.replace_conversation(vec![]);

        assert_eq!(*lock(&seen), vec![1, 2, 0]);
    }

    #[test]
    fn unchanged_state_does_not_notify() {
        let context = Context::new();
        let counter = Arc::new(AtomicUsize::new(0));
        context.subscribe(counting_listener(counter.clone()));

        context.clear_conversation();
        context.set_in_progress(None);
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        context.set_in_progress(Some(ChatMessage::assistant()));
        context.commit(ChatMessage::assistant_text("done"));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(context.in_progress().is_none());
        assert_eq!(context.conversation_len(), 1);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let context = Context::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = context.subscribe(counting_listener(counter.clone()));

        context.push(ChatMessage::user("a"));
        assert!(context.unsubscribe(id));
        assert!(!context.unsubscribe(id));
        context.push(ChatMessage::user("b"));

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(context.listener_count(), 0);
    }

    #[test]
    fn listener_may_read_context() {
        let context = Arc::new(Context::new());
        let reader = Arc::downgrade(&context);
        let observed = Arc::new(AtomicUsize::new(0));
        let sink = observed.clone();
        context.subscribe(Arc::new(move |_: &ContextSnapshot| {
            if let Some(ctx) = reader.upgrade() {
                sink.store(ctx.conversation_len(), Ordering::SeqCst);
            }
        }));

        context.push(ChatMessage::user("hello"));
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }
}

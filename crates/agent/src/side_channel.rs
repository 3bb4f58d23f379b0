//! Single-slot human-in-the-loop request channel.
//!
//! A [`SideChannel`] is either **Idle** or **Open** with exactly one
//! pending request. A tool awaits [`SideChannel::start`]; the UI watches
//! [`SideChannel::subscribe`] and settles the request with
//! [`SideChannel::submit`] or [`SideChannel::cancel`].
//!
//! Starting a request while another is open rejects the older one with
//! [`SideChannelError::Superseded`] before the new one is installed.
//!
//! Every request has a [`RequestId`]. Code that belongs to one request,
//! such as an interview's `done` tool, settles it with
//! [`SideChannel::submit_to`] or [`SideChannel::reject`] and cannot touch
//! a newer request by mistake.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use crate::context::lock;

/// Why a request settled without an answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SideChannelError {
    #[error("superseded by a newer request")]
    Superseded,

    #[error("cancelled by user")]
    Cancelled,

    #[error("side channel closed: {0}")]
    Closed(String),
}

/// What observers see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideChannelState {
    pub is_open: bool,
    pub message: Option<String>,
}

type Outcome = Result<String, SideChannelError>;

/// Identifies one request opened on a [`SideChannel`].
pub type RequestId = u64;

struct Pending {
    id: RequestId,
    message: String,
    tx: oneshot::Sender<Outcome>,
}

struct Slot {
    next_id: RequestId,
    pending: Option<Pending>,
}

struct Inner {
    label: String,
    slot: Mutex<Slot>,
    state: watch::Sender<SideChannelState>,
}

impl Inner {
    /// Settle the open request, or only request `id` when given.
    fn settle(&self, id: Option<RequestId>, outcome: Outcome) -> bool {
        let pending = {
            let mut slot = lock(&self.slot);
            let current = slot
                .pending
                .as_ref()
                .is_some_and(|p| id.is_none_or(|id| id == p.id));
            if current { slot.pending.take() } else { None }
        };
        let Some(pending) = pending else {
            return false;
        };

        debug!(
            channel = %self.label,
            request = pending.id,
            answered = outcome.is_ok(),
            "Request settled"
        );
        let _ = pending.tx.send(outcome);
        self.state.send_replace(SideChannelState::default());
        true
    }
}

/// Future returned by [`SideChannel::start`].
///
/// Dropping it before it settles closes its request, so the channel never
/// stays open with nobody waiting.
#[must_use = "the request stays open until settled; await this to get the answer"]
pub struct PendingAnswer {
    id: RequestId,
    rx: oneshot::Receiver<Outcome>,
    channel: Weak<Inner>,
}

impl PendingAnswer {
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Future for PendingAnswer {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Outcome> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| Err(SideChannelError::Closed("request dropped".into())))
        })
    }
}

impl Drop for PendingAnswer {
    fn drop(&mut self) {
        if let Some(inner) = self.channel.upgrade() {
            if inner.settle(
                Some(self.id),
                Err(SideChannelError::Closed("nobody is waiting".into())),
            ) {
                warn!(channel = %inner.label, request = self.id, "Open request abandoned");
            }
        }
    }
}

pub struct SideChannel {
    inner: Arc<Inner>,
}

impl SideChannel {
    pub fn new(label: impl Into<String>) -> Self {
        let (state, _) = watch::channel(SideChannelState::default());
        Self {
            inner: Arc::new(Inner {
                label: label.into(),
                slot: Mutex::new(Slot {
                    next_id: 1,
                    pending: None,
                }),
                state,
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Open a request and return a future that settles when it is
    /// answered, cancelled, superseded or the channel is dropped.
    ///
    /// The request is installed before this returns, not when the future
    /// is first polled.
    pub fn start(&self, message: impl Into<String>) -> PendingAnswer {
        let message = message.into();
        let (tx, rx) = oneshot::channel();

        let id = {
            let mut slot = lock(&self.inner.slot);
            if let Some(previous) = slot.pending.take() {
                warn!(
                    channel = %self.inner.label,
                    previous = %previous.message,
                    "Superseding an open request"
                );
                let _ = previous.tx.send(Err(SideChannelError::Superseded));
            }
            let id = slot.next_id;
            slot.next_id += 1;
            slot.pending = Some(Pending {
                id,
                message: message.clone(),
                tx,
            });
            id
        };

        debug!(channel = %self.inner.label, request = id, "Request opened");
        self.inner.state.send_replace(SideChannelState {
            is_open: true,
            message: Some(message),
        });

        PendingAnswer {
            id,
            rx,
            channel: Arc::downgrade(&self.inner),
        }
    }

    /// Answer the open request. Returns `false` (and does nothing) when idle.
    pub fn submit(&self, response: impl Into<String>) -> bool {
        self.inner.settle(None, Ok(response.into()))
    }

    /// Answer request `id` only. Returns `false` when it is no longer open.
    pub fn submit_to(&self, id: RequestId, response: impl Into<String>) -> bool {
        self.inner.settle(Some(id), Ok(response.into()))
    }

    /// Cancel the open request. Returns `false` (and does nothing) when idle.
    pub fn cancel(&self) -> bool {
        self.inner.settle(None, Err(SideChannelError::Cancelled))
    }

    /// Reject request `id` with an arbitrary reason. Returns `false` when it
    /// is no longer open.
    pub fn reject(&self, id: RequestId, reason: SideChannelError) -> bool {
        self.inner.settle(Some(id), Err(reason))
    }

    pub fn is_open(&self) -> bool {
        lock(&self.inner.slot).pending.is_some()
    }

    /// The message of the open request, if any.
    pub fn current_message(&self) -> Option<String> {
        lock(&self.inner.slot)
            .pending
            .as_ref()
            .map(|p| p.message.clone())
    }

    /// Observe state changes. The receiver starts at the current state.
    pub fn subscribe(&self) -> watch::Receiver<SideChannelState> {
        self.inner.state.subscribe()
    }
}

impl std::fmt::Debug for SideChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SideChannel")
            .field("label", &self.inner.label)
            .field("open", &self.is_open())
            .finish()
    }
}

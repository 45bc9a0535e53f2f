//! Event dispatch to application observers
//!
//! Backed by a bounded broadcast channel: every observer sees every event
//! unless it falls behind, in which case it loses the oldest ones.

use crate::application::session::SessionHandle;
use crate::domain::message::Message;
use crate::domain::registration::RegistrationState;
use crate::domain::session::{EndReason, SessionState};
use crate::domain::shared::SessionId;
use futures::stream::{self, Stream};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum PhoneEvent {
    /// A remote party is calling. `call_waiting` is set when another session
    /// already holds the current slot; the application decides what to do.
    IncomingInvitation {
        session: SessionHandle,
        call_waiting: bool,
    },
    IncomingMessage(Message),
    SessionStateChanged {
        session: SessionHandle,
        state: SessionState,
        /// Set when `state` is Terminated
        reason: Option<EndReason>,
    },
    RegistrationStateChanged(RegistrationState),
    MessageFailed {
        message: Message,
        reason: String,
    },
    /// An engine operation issued by a control operation failed
    OperationFailed {
        session_id: SessionId,
        operation: &'static str,
        reason: String,
    },
}

impl PhoneEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PhoneEvent::IncomingInvitation { .. } => "incoming_invitation",
            PhoneEvent::IncomingMessage(_) => "incoming_message",
            PhoneEvent::SessionStateChanged { .. } => "session_state_changed",
            PhoneEvent::RegistrationStateChanged(_) => "registration_state_changed",
            PhoneEvent::MessageFailed { .. } => "message_failed",
            PhoneEvent::OperationFailed { .. } => "operation_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventDispatcher {
    tx: broadcast::Sender<PhoneEvent>,
}

impl EventDispatcher {
    /// Create new dispatcher; capacity is clamped to at least one event
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Deliver to current observers, never waiting on them
    pub fn dispatch(&self, event: PhoneEvent) {
        if self.tx.receiver_count() == 0 {
            debug!("No observers, dropping {} event", event.kind());
            return;
        }

        if let Err(e) = self.tx.send(event) {
            debug!("Observers went away, dropping {} event", e.0.kind());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// One observer's view of the event stream
pub struct EventSubscription {
    rx: broadcast::Receiver<PhoneEvent>,
}

impl EventSubscription {
    /// Next event; `None` once the dispatcher is gone
    pub async fn next(&mut self) -> Option<PhoneEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event observer lagged, {} events lost", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already queued
    pub fn try_next(&mut self) -> Option<PhoneEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("Event observer lagged, {} events lost", skipped);
                }
                Err(_) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = PhoneEvent> {
        stream::unfold(self, |mut subscription| async move {
            subscription
                .next()
                .await
                .map(|event| (event, subscription))
        })
    }
}

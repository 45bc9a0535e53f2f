//! Session domain events

use crate::domain::session::value_object::{Direction, EndReason, SessionState};
use crate::domain::shared::events::{DomainEvent, EventMetadata};
use crate::domain::shared::value_objects::{SessionId, SipAddress};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session created event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreated {
    pub metadata: EventMetadata,
    pub session_id: SessionId,
    pub direction: Direction,
    pub remote: SipAddress,
}

impl DomainEvent for SessionCreated {
    fn event_type(&self) -> &'static str {
        "session.created"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.metadata.occurred_at
    }
}

/// Lifecycle transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStateChanged {
    pub metadata: EventMetadata,
    pub session_id: SessionId,
    pub from: SessionState,
    pub to: SessionState,
    pub reason: Option<EndReason>,
}

impl DomainEvent for SessionStateChanged {
    fn event_type(&self) -> &'static str {
        "session.state_changed"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.metadata.occurred_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    Created(SessionCreated),
    StateChanged(SessionStateChanged),
}

impl SessionEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            SessionEvent::Created(e) => &e.session_id,
            SessionEvent::StateChanged(e) => &e.session_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::Created(e) => e.event_type(),
            SessionEvent::StateChanged(e) => e.event_type(),
        }
    }
}

//! Session aggregate root

use crate::domain::session::event::{SessionCreated, SessionEvent, SessionStateChanged};
use crate::domain::session::value_object::{Direction, EndReason, MediaConstraints, SessionState};
use crate::domain::shared::error::PhoneError;
use crate::domain::shared::events::EventMetadata;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{SessionId, SipAddress};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session aggregate root
///
/// One call attempt or active call. Enforces the lifecycle state machine and
/// records a domain event for every change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    direction: Direction,
    /// The other party
    remote: SipAddress,
    constraints: MediaConstraints,
    state: SessionState,
    /// Set once Terminated
    end_reason: Option<EndReason>,
    created_at: DateTime<Utc>,
    established_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    events: Vec<SessionEvent>,
}

impl Session {
    pub fn new(
        id: SessionId,
        direction: Direction,
        remote: SipAddress,
        constraints: MediaConstraints,
    ) -> Self {
        let mut session = Self {
            id,
            direction,
            remote: remote.clone(),
            constraints,
            state: SessionState::Initial,
            end_reason: None,
            created_at: Utc::now(),
            established_at: None,
            ended_at: None,
            events: Vec::new(),
        };

        session.record_event(SessionEvent::Created(SessionCreated {
            metadata: EventMetadata::new("session.created"),
            session_id: id,
            direction,
            remote,
        }));

        session
    }

    pub fn outbound(id: SessionId, remote: SipAddress, constraints: MediaConstraints) -> Self {
        Self::new(id, Direction::Outbound, remote, constraints)
    }

    pub fn inbound(id: SessionId, remote: SipAddress, constraints: MediaConstraints) -> Self {
        Self::new(id, Direction::Inbound, remote, constraints)
    }

    /// Replace the requested media; only before anything was negotiated
    pub fn update_constraints(&mut self, constraints: MediaConstraints) -> Result<()> {
        if self.state != SessionState::Initial {
            return Err(PhoneError::InvalidStateTransition(format!(
                "cannot change media constraints in {} state",
                self.state
            )));
        }

        self.constraints = constraints;
        Ok(())
    }

    /// Move to `next`; `reason` is kept only when `next` is Terminated
    pub fn transition(&mut self, next: SessionState, reason: Option<EndReason>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(PhoneError::InvalidStateTransition(format!(
                "Cannot transition from {} to {}",
                self.state, next
            )));
        }

        let from = self.state;
        self.state = next;

        let reason = match next {
            SessionState::Established => {
                self.established_at = Some(Utc::now());
                None
            }
            SessionState::Terminated => {
                self.ended_at = Some(Utc::now());
                self.end_reason = reason.clone();
                reason
            }
            _ => None,
        };

        self.record_event(SessionEvent::StateChanged(SessionStateChanged {
            metadata: EventMetadata::new("session.state_changed"),
            session_id: self.id,
            from,
            to: next,
            reason,
        }));

        Ok(())
    }

    fn record_event(&mut self, event: SessionEvent) {
        self.events.push(event);
    }

    /// Take all pending events
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    // Getters
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn remote(&self) -> &SipAddress {
        &self.remote
    }

    pub fn constraints(&self) -> MediaConstraints {
        self.constraints
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn end_reason(&self) -> Option<&EndReason> {
        self.end_reason.as_ref()
    }

    pub fn created_at(&self) -> &DateTime<Utc> {
        &self.created_at
    }

    pub fn established_at(&self) -> Option<&DateTime<Utc>> {
        self.established_at.as_ref()
    }

    pub fn ended_at(&self) -> Option<&DateTime<Utc>> {
        self.ended_at.as_ref()
    }

    /// Talk time, once the session has both been established and ended
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.established_at
            .and_then(|established| self.ended_at.map(|ended| ended - established))
    }
}

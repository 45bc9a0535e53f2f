//! Protocol engine seam
//!
//! The SIP stack (parsing, transactions, dialogs) and the WebRTC stack (SDP,
//! ICE, codecs) live outside this crate. The application layer drives them
//! through the traits below and consumes what they report as [`EngineEvent`]s
//! on a single bounded queue.

pub mod loopback;

use crate::domain::identity::{Credential, Identity, TransportEndpoint};
use crate::domain::session::{MediaConstraints, MediaTrack, SessionState};
use crate::domain::shared::{SessionId, SipAddress};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub use loopback::{LoopbackConfig, LoopbackConnector, LoopbackEngine, LoopbackSession};

/// Failures reported by the engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(String),

    /// Final negative response from the server or the remote party
    #[error("{0}")]
    Rejected(String),

    #[error("operation not valid in state {0}")]
    InvalidState(SessionState),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// What the engine needs to construct its agent
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub address: SipAddress,
    pub transport: TransportEndpoint,
    pub authorization_username: String,
    pub authorization_password: Credential,
}

impl AgentOptions {
    pub fn from_identity(identity: &Identity) -> Self {
        Self {
            address: identity.address().clone(),
            transport: identity.transport().clone(),
            authorization_username: identity.authorization_username().to_string(),
            authorization_password: identity.credential().clone(),
        }
    }
}

/// Everything the engine raises asynchronously
pub enum EngineEvent {
    /// A remote party sent us an INVITE
    Invitation(Arc<dyn EngineSession>),
    /// Incoming MESSAGE
    Message { from: String, body: String },
    /// A session object changed state; `reason` carries the final response or BYE cause
    SessionStateChanged {
        session_id: SessionId,
        state: SessionState,
        reason: Option<String>,
    },
}

impl fmt::Debug for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::Invitation(session) => f
                .debug_struct("Invitation")
                .field("session_id", &session.id())
                .finish(),
            EngineEvent::Message { from, body } => f
                .debug_struct("Message")
                .field("from", from)
                .field("body_len", &body.len())
                .finish(),
            EngineEvent::SessionStateChanged {
                session_id,
                state,
                reason,
            } => f
                .debug_struct("SessionStateChanged")
                .field("session_id", session_id)
                .field("state", state)
                .field("reason", reason)
                .finish(),
        }
    }
}

pub type EngineEventSender = mpsc::Sender<EngineEvent>;
pub type EngineEventReceiver = mpsc::Receiver<EngineEvent>;

/// Builds an engine agent for one identity
#[cfg_attr(test, mockall::automock)]
pub trait EngineConnector: Send + Sync {
    /// Construct (but do not start) the agent. Events go to `events`.
    fn create_agent(
        &self,
        options: AgentOptions,
        events: EngineEventSender,
    ) -> Result<Arc<dyn SipEngine>, EngineError>;
}

/// The engine's user agent
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SipEngine: Send + Sync {
    /// Open the WebSocket transport
    async fn start(&self) -> Result<(), EngineError>;

    async fn stop(&self) -> Result<(), EngineError>;

    /// Send REGISTER and wait for the final response
    async fn register(&self) -> Result<(), EngineError>;

    async fn unregister(&self) -> Result<(), EngineError>;

    /// Construct an outbound session object; nothing is sent until `invite`
    fn create_inviter(
        &self,
        target: &SipAddress,
        constraints: MediaConstraints,
    ) -> Result<Arc<dyn EngineSession>, EngineError>;

    /// Send a MESSAGE and wait for the final response
    async fn send_message(&self, target: &SipAddress, body: &str) -> Result<(), EngineError>;
}

/// An engine session object, inviter or invitation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EngineSession: Send + Sync {
    fn id(&self) -> SessionId;

    fn remote_identity(&self) -> SipAddress;

    fn state(&self) -> SessionState;

    /// Present once negotiation has started
    fn negotiation(&self) -> Option<Arc<dyn NegotiationHandle>>;

    async fn invite(&self) -> Result<(), EngineError>;

    async fn accept(&self, constraints: MediaConstraints) -> Result<(), EngineError>;

    async fn reject(&self) -> Result<(), EngineError>;

    async fn cancel(&self) -> Result<(), EngineError>;

    async fn bye(&self) -> Result<(), EngineError>;

    async fn refer(&self, target: &SipAddress) -> Result<(), EngineError>;
}

/// Media side of a session: the peer connection's senders and receivers
#[cfg_attr(test, mockall::automock)]
pub trait NegotiationHandle: Send + Sync {
    fn senders(&self) -> Vec<MediaTrack>;

    fn receivers(&self) -> Vec<MediaTrack>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_options_from_identity() {
        let identity =
            Identity::new("sip:alice@example.com", "secret", "wss://sip.example.com/ws").unwrap();
        let options = AgentOptions::from_identity(&identity);

        assert_eq!(options.address.to_string(), "sip:alice@example.com");
        assert_eq!(options.authorization_username, "alice");
        assert_eq!(options.authorization_password.expose(), "secret");
        assert_eq!(options.transport.host(), "sip.example.com");
    }

    #[test]
    fn test_engine_error_display() {
        assert_eq!(EngineError::Rejected("403 Forbidden".into()).to_string(), "403 Forbidden");
        assert_eq!(
            EngineError::InvalidState(SessionState::Terminated).to_string(),
            "operation not valid in state Terminated"
        );
    }

    #[test]
    fn test_event_debug_hides_body() {
        let event = EngineEvent::Message {
            from: "sip:bob@example.com".into(),
            body: "secret plans".into(),
        };
        let printed = format!("{:?}", event);
        assert!(printed.contains("body_len"));
        assert!(!printed.contains("secret plans"));
    }
}

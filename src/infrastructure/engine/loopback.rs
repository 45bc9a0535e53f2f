//! Loopback engine
//!
//! In-process stand-in for the SIP server, the remote parties and the WebRTC
//! stack. Local operations behave like the real engine (state changes are
//! reported on the event queue), and the remote side is driven explicitly
//! through hooks such as [`LoopbackEngine::answer`] and
//! [`LoopbackEngine::incoming_call`].

use super::{
    AgentOptions, EngineConnector, EngineError, EngineEvent, EngineEventSender, EngineSession,
    NegotiationHandle, SipEngine,
};
use crate::domain::session::{Direction, MediaConstraints, MediaTrack, SessionState, TrackKind};
use crate::domain::shared::{SessionId, SipAddress};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Behaviour of the simulated server and remote parties
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    /// When false, `start` fails as if the WebSocket server could not be reached
    pub reachable: bool,
    /// Final response returned to REGISTER, e.g. "403 Forbidden"
    pub reject_registration: Option<String>,
    /// Remote parties answer outbound calls immediately
    pub auto_answer: bool,
    /// Final response returned to MESSAGE
    pub reject_messages: Option<String>,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            reachable: true,
            reject_registration: None,
            auto_answer: false,
            reject_messages: None,
        }
    }
}

/// Hands out loopback engines and keeps the last one for inspection
#[derive(Default)]
pub struct LoopbackConnector {
    config: LoopbackConfig,
    engine: Mutex<Option<Arc<LoopbackEngine>>>,
}

impl LoopbackConnector {
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            config,
            engine: Mutex::new(None),
        }
    }

    /// The engine built by the last `create_agent` call
    pub fn engine(&self) -> Option<Arc<LoopbackEngine>> {
        self.engine.lock().clone()
    }
}

impl EngineConnector for LoopbackConnector {
    fn create_agent(
        &self,
        options: AgentOptions,
        events: EngineEventSender,
    ) -> Result<Arc<dyn SipEngine>, EngineError> {
        let engine = Arc::new(LoopbackEngine::new(options, self.config.clone(), events));
        *self.engine.lock() = Some(engine.clone());
        Ok(engine)
    }
}

/// A message accepted by the simulated server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub target: SipAddress,
    pub body: String,
}

pub struct LoopbackEngine {
    options: AgentOptions,
    config: LoopbackConfig,
    events: EngineEventSender,
    started: AtomicBool,
    registered: AtomicBool,
    sessions: RwLock<HashMap<SessionId, Arc<LoopbackSession>>>,
    sent_messages: Mutex<Vec<SentMessage>>,
}

impl LoopbackEngine {
    pub fn new(options: AgentOptions, config: LoopbackConfig, events: EngineEventSender) -> Self {
        Self {
            options,
            config,
            events,
            started: AtomicBool::new(false),
            registered: AtomicBool::new(false),
            sessions: RwLock::new(HashMap::new()),
            sent_messages: Mutex::new(Vec::new()),
        }
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn session(&self, id: SessionId) -> Option<Arc<LoopbackSession>> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent_messages.lock().clone()
    }

    fn ensure_started(&self) -> Result<(), EngineError> {
        if self.is_started() {
            Ok(())
        } else {
            Err(EngineError::Transport("transport not connected".to_string()))
        }
    }

    fn require_session(&self, id: SessionId) -> Result<Arc<LoopbackSession>, EngineError> {
        self.session(id)
            .ok_or_else(|| EngineError::Transport(format!("unknown session {}", id)))
    }

    fn insert_session(&self, session: Arc<LoopbackSession>) {
        self.sessions.write().insert(session.id, session);
    }

    /// Remote party answers our INVITE (200 OK)
    pub async fn answer(&self, id: SessionId) -> Result<(), EngineError> {
        let session = self.require_session(id)?;
        let state = session.current_state();
        if session.direction != Direction::Outbound || state != SessionState::Establishing {
            return Err(EngineError::InvalidState(state));
        }

        session.negotiate();
        session.set_state(SessionState::Established, None).await;
        Ok(())
    }

    /// Remote party sends BYE, or abandons an invitation it sent us
    pub async fn remote_hang_up(&self, id: SessionId) -> Result<(), EngineError> {
        let session = self.require_session(id)?;
        let state = session.current_state();
        let reason = match state {
            SessionState::Established | SessionState::Establishing => "BYE",
            SessionState::Initial if session.direction == Direction::Inbound => "CANCEL",
            _ => return Err(EngineError::InvalidState(state)),
        };

        session.set_state(SessionState::Terminated, Some(reason.to_string())).await;
        Ok(())
    }

    /// Remote party declines our INVITE with a final response
    pub async fn remote_reject(&self, id: SessionId, reason: &str) -> Result<(), EngineError> {
        let session = self.require_session(id)?;
        let state = session.current_state();
        if session.direction != Direction::Outbound || state != SessionState::Establishing {
            return Err(EngineError::InvalidState(state));
        }

        session.set_state(SessionState::Terminated, Some(reason.to_string())).await;
        Ok(())
    }

    /// A remote party calls us
    pub async fn incoming_call(&self, from: &str, video: bool) -> Result<SessionId, EngineError> {
        self.ensure_started()?;
        let remote = SipAddress::parse(from)
            .map_err(|e| EngineError::Transport(format!("bad From header: {}", e)))?;

        let session = Arc::new(LoopbackSession::new(
            Direction::Inbound,
            remote,
            MediaConstraints::with_video(video),
            self.events.clone(),
            false,
        ));
        let id = session.id;
        self.insert_session(session.clone());

        info!("Loopback: incoming call {} from {}", id, from);
        self.emit(EngineEvent::Invitation(session)).await;
        Ok(id)
    }

    /// A remote party sends us a MESSAGE
    pub async fn incoming_message(&self, from: &str, body: &str) -> Result<(), EngineError> {
        self.ensure_started()?;
        self.emit(EngineEvent::Message {
            from: from.to_string(),
            body: body.to_string(),
        })
        .await;
        Ok(())
    }

    async fn emit(&self, event: EngineEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Loopback: event queue closed");
        }
    }
}

#[async_trait]
impl SipEngine for LoopbackEngine {
    async fn start(&self) -> Result<(), EngineError> {
        if !self.config.reachable {
            return Err(EngineError::Transport(format!(
                "cannot reach {}",
                self.options.transport
            )));
        }

        self.started.store(true, Ordering::SeqCst);
        info!(
            "Loopback: connected to {} as {}",
            self.options.transport, self.options.address
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.started.store(false, Ordering::SeqCst);
        self.registered.store(false, Ordering::SeqCst);
        info!("Loopback: transport closed");
        Ok(())
    }

    async fn register(&self) -> Result<(), EngineError> {
        self.ensure_started()?;
        if let Some(reason) = &self.config.reject_registration {
            return Err(EngineError::Rejected(reason.clone()));
        }

        self.registered.store(true, Ordering::SeqCst);
        info!(
            "Loopback: registered {} (auth user {})",
            self.options.address, self.options.authorization_username
        );
        Ok(())
    }

    async fn unregister(&self) -> Result<(), EngineError> {
        self.ensure_started()?;
        self.registered.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn create_inviter(
        &self,
        target: &SipAddress,
        constraints: MediaConstraints,
    ) -> Result<Arc<dyn EngineSession>, EngineError> {
        self.ensure_started()?;

        let session = Arc::new(LoopbackSession::new(
            Direction::Outbound,
            target.clone(),
            constraints,
            self.events.clone(),
            self.config.auto_answer,
        ));
        self.insert_session(session.clone());
        Ok(session)
    }

    async fn send_message(&self, target: &SipAddress, body: &str) -> Result<(), EngineError> {
        self.ensure_started()?;
        if let Some(reason) = &self.config.reject_messages {
            return Err(EngineError::Delivery(reason.clone()));
        }

        self.sent_messages.lock().push(SentMessage {
            target: target.clone(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Simulated peer connection
pub struct LoopbackNegotiation {
    senders: Vec<MediaTrack>,
    receivers: Vec<MediaTrack>,
}

impl LoopbackNegotiation {
    fn new(id: SessionId, constraints: MediaConstraints) -> Self {
        let tracks = |side: &str| {
            let mut tracks = Vec::new();
            if constraints.audio {
                tracks.push(MediaTrack::new(format!("{}-{}-audio", id, side), TrackKind::Audio));
            }
            if constraints.video {
                tracks.push(MediaTrack::new(format!("{}-{}-video", id, side), TrackKind::Video));
            }
            tracks
        };

        Self {
            senders: tracks("local"),
            receivers: tracks("remote"),
        }
    }

    fn stop(&self) {
        for track in self.senders.iter().chain(self.receivers.iter()) {
            track.stop();
        }
    }
}

impl NegotiationHandle for LoopbackNegotiation {
    fn senders(&self) -> Vec<MediaTrack> {
        self.senders.clone()
    }

    fn receivers(&self) -> Vec<MediaTrack> {
        self.receivers.clone()
    }
}

pub struct LoopbackSession {
    id: SessionId,
    direction: Direction,
    remote: SipAddress,
    constraints: Mutex<MediaConstraints>,
    state: Mutex<SessionState>,
    negotiation: Mutex<Option<Arc<LoopbackNegotiation>>>,
    operations: Mutex<Vec<&'static str>>,
    referred_to: Mutex<Option<SipAddress>>,
    events: EngineEventSender,
    auto_answer: bool,
}

impl LoopbackSession {
    fn new(
        direction: Direction,
        remote: SipAddress,
        constraints: MediaConstraints,
        events: EngineEventSender,
        auto_answer: bool,
    ) -> Self {
        Self {
            id: SessionId::new(),
            direction,
            remote,
            constraints: Mutex::new(constraints),
            state: Mutex::new(SessionState::Initial),
            negotiation: Mutex::new(None),
            operations: Mutex::new(Vec::new()),
            referred_to: Mutex::new(None),
            events,
            auto_answer,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn constraints(&self) -> MediaConstraints {
        *self.constraints.lock()
    }

    /// Local operations invoked on this session, in call order
    pub fn operations(&self) -> Vec<&'static str> {
        self.operations.lock().clone()
    }

    pub fn referred_to(&self) -> Option<SipAddress> {
        self.referred_to.lock().clone()
    }

    fn current_state(&self) -> SessionState {
        *self.state.lock()
    }

    fn record(&self, operation: &'static str) {
        self.operations.lock().push(operation);
    }

    /// Check the current state against `allowed`
    fn guard(&self, allowed: &[SessionState]) -> Result<(), EngineError> {
        let state = self.current_state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(EngineError::InvalidState(state))
        }
    }

    fn negotiate(&self) {
        let negotiation = LoopbackNegotiation::new(self.id, self.constraints());
        *self.negotiation.lock() = Some(Arc::new(negotiation));
    }

    async fn set_state(&self, state: SessionState, reason: Option<String>) {
        *self.state.lock() = state;
        if state == SessionState::Terminated {
            let negotiation = self.negotiation.lock().clone();
            if let Some(negotiation) = negotiation {
                negotiation.stop();
            }
        }

        debug!("Loopback: session {} -> {}", self.id, state);
        let event = EngineEvent::SessionStateChanged {
            session_id: self.id,
            state,
            reason,
        };
        if self.events.send(event).await.is_err() {
            debug!("Loopback: event queue closed");
        }
    }
}

#[async_trait]
impl EngineSession for LoopbackSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn remote_identity(&self) -> SipAddress {
        self.remote.clone()
    }

    fn state(&self) -> SessionState {
        self.current_state()
    }

    fn negotiation(&self) -> Option<Arc<dyn NegotiationHandle>> {
        self.negotiation
            .lock()
            .clone()
            .map(|negotiation| negotiation as Arc<dyn NegotiationHandle>)
    }

    async fn invite(&self) -> Result<(), EngineError> {
        self.record("invite");
        if self.direction != Direction::Outbound {
            return Err(EngineError::InvalidState(self.current_state()));
        }
        self.guard(&[SessionState::Initial])?;

        self.set_state(SessionState::Establishing, None).await;
        if self.auto_answer {
            self.negotiate();
            self.set_state(SessionState::Established, None).await;
        }
        Ok(())
    }

    async fn accept(&self, constraints: MediaConstraints) -> Result<(), EngineError> {
        self.record("accept");
        if self.direction != Direction::Inbound {
            return Err(EngineError::InvalidState(self.current_state()));
        }
        self.guard(&[SessionState::Initial])?;

        *self.constraints.lock() = constraints;
        self.set_state(SessionState::Establishing, None).await;
        self.negotiate();
        self.set_state(SessionState::Established, None).await;
        Ok(())
    }

    async fn reject(&self) -> Result<(), EngineError> {
        self.record("reject");
        if self.direction != Direction::Inbound {
            return Err(EngineError::InvalidState(self.current_state()));
        }
        self.guard(&[SessionState::Initial])?;

        self.set_state(SessionState::Terminated, Some("603 Decline".to_string()))
            .await;
        Ok(())
    }

    async fn cancel(&self) -> Result<(), EngineError> {
        self.record("cancel");
        if self.direction != Direction::Outbound {
            return Err(EngineError::InvalidState(self.current_state()));
        }
        self.guard(&[SessionState::Initial, SessionState::Establishing])?;

        self.set_state(
            SessionState::Terminated,
            Some("487 Request Terminated".to_string()),
        )
        .await;
        Ok(())
    }

    async fn bye(&self) -> Result<(), EngineError> {
        self.record("bye");
        self.guard(&[SessionState::Establishing, SessionState::Established])?;

        self.set_state(SessionState::Terminating, None).await;
        self.set_state(SessionState::Terminated, Some("BYE".to_string()))
            .await;
        Ok(())
    }

    async fn refer(&self, target: &SipAddress) -> Result<(), EngineError> {
        self.record("refer");
        self.guard(&[SessionState::Established])?;

        *self.referred_to.lock() = Some(target.clone());
        info!("Loopback: session {} referred to {}", self.id, target);
        Ok(())
    }
}

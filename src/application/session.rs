//! Session control
//!
//! [`SessionController`] owns the single "current session" slot and is the
//! only writer of session lifecycle state. Control operations check and latch
//! under the slot lock, then hand the engine call to a spawned task so no lock
//! is ever held across engine I/O. Engine-reported state changes arrive through
//! [`SessionController::on_state_change`], called from the event pump.

use crate::application::dispatch::{EventDispatcher, PhoneEvent};
use crate::domain::session::{
    Direction, EndReason, MediaConstraints, MediaStream, MediaStreamPair, Session, SessionEvent,
    SessionState, TerminationAction, TrackKind,
};
use crate::domain::shared::{PhoneError, Result, SessionId, SipAddress};
use crate::infrastructure::engine::{EngineEvent, EngineEventSender, EngineSession, SipEngine};
use crate::infrastructure::telemetry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

/// Why a control operation did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No session holds the current slot
    NoActiveSession,
    /// The session given is not the current one
    NotCurrentSession,
    /// The session's state does not allow the operation
    NotPermitted(SessionState),
    /// The same operation was already issued for this session
    AlreadyRequested,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::NoActiveSession => "no_active_session",
            SkipReason::NotCurrentSession => "not_current_session",
            SkipReason::NotPermitted(_) => "not_permitted",
            SkipReason::AlreadyRequested => "already_requested",
        }
    }
}

/// Result of a control operation. Skips are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Applied,
    Skipped(SkipReason),
}

impl ControlOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ControlOutcome::Applied)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ControlOutcome::Applied => "applied",
            ControlOutcome::Skipped(reason) => reason.label(),
        }
    }

    /// Surface the staleness skips as errors, for callers that want them
    pub fn into_result(self) -> Result<ControlOutcome> {
        match self {
            ControlOutcome::Skipped(SkipReason::NoActiveSession) => {
                Err(PhoneError::NoActiveSession)
            }
            ControlOutcome::Skipped(SkipReason::NotCurrentSession) => {
                Err(PhoneError::NotCurrentSession)
            }
            other => Ok(other),
        }
    }
}

/// Engine operation issued by a control operation
enum EngineOp {
    Accept(MediaConstraints),
    Terminate(TerminationAction),
    Refer(SipAddress),
}

impl EngineOp {
    fn name(&self) -> &'static str {
        match self {
            EngineOp::Accept(_) => "accept",
            EngineOp::Terminate(action) => action.name(),
            EngineOp::Refer(_) => "refer",
        }
    }
}

struct SessionInner {
    id: SessionId,
    direction: Direction,
    session: Mutex<Session>,
    history: Mutex<Vec<SessionEvent>>,
    engine: Arc<dyn EngineSession>,
    state_tx: watch::Sender<SessionState>,
    accept_requested: AtomicBool,
    termination: Mutex<Option<TerminationAction>>,
}

/// Shared handle to one session
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl SessionHandle {
    fn new(mut session: Session, engine: Arc<dyn EngineSession>) -> Self {
        let history = session.take_events();
        let (state_tx, _) = watch::channel(session.state());
        Self {
            inner: Arc::new(SessionInner {
                id: *session.id(),
                direction: session.direction(),
                session: Mutex::new(session),
                history: Mutex::new(history),
                engine,
                state_tx,
                accept_requested: AtomicBool::new(false),
                termination: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    pub fn remote(&self) -> SipAddress {
        self.inner.session.lock().remote().clone()
    }

    pub fn constraints(&self) -> MediaConstraints {
        self.inner.session.lock().constraints()
    }

    pub fn state(&self) -> SessionState {
        self.inner.session.lock().state()
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.inner.session.lock().end_reason().cloned()
    }

    /// Copy of the aggregate, e.g. for display or serialization
    pub fn snapshot(&self) -> Session {
        self.inner.session.lock().clone()
    }

    /// Domain events recorded so far, oldest first
    pub fn history(&self) -> Vec<SessionEvent> {
        self.inner.history.lock().clone()
    }

    /// Receives a state once the controller has fully applied it
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Wait until `target` is reached; returns early with Terminated
    pub async fn wait_for_state(&self, target: SessionState) -> SessionState {
        let mut rx = self.inner.state_tx.subscribe();
        let reached = rx
            .wait_for(|state| *state == target || state.is_terminal())
            .await
            .map(|state| *state);

        reached.unwrap_or_else(|_| self.state())
    }

    pub(crate) fn engine_session(&self) -> Arc<dyn EngineSession> {
        self.inner.engine.clone()
    }

    /// An accepted inbound session counts as Establishing before the engine says so
    fn effective_state(&self) -> SessionState {
        let state = self.state();
        if state == SessionState::Initial
            && self.inner.direction == Direction::Inbound
            && self.inner.accept_requested.load(Ordering::SeqCst)
        {
            SessionState::Establishing
        } else {
            state
        }
    }

    fn termination_requested(&self) -> Option<TerminationAction> {
        *self.inner.termination.lock()
    }

    fn latch_termination(&self, action: TerminationAction) -> bool {
        let mut termination = self.inner.termination.lock();
        if termination.is_some() {
            return false;
        }
        *termination = Some(action);
        true
    }

    fn latch_accept(&self) -> bool {
        !self.inner.accept_requested.swap(true, Ordering::SeqCst)
    }

    /// Undo the latch taken for `op` so the session can be controlled again
    fn release(&self, op: &EngineOp) {
        match op {
            EngineOp::Accept(_) => self.inner.accept_requested.store(false, Ordering::SeqCst),
            EngineOp::Terminate(action) => {
                let mut termination = self.inner.termination.lock();
                if *termination == Some(*action) {
                    *termination = None;
                }
            }
            EngineOp::Refer(_) => {}
        }
    }

    fn accept_requested(&self) -> bool {
        self.inner.accept_requested.load(Ordering::SeqCst)
    }

    fn end_reason_for(&self, engine_reason: Option<String>) -> EndReason {
        match self.termination_requested() {
            Some(TerminationAction::Cancel) => return EndReason::Canceled,
            Some(TerminationAction::Reject) => return EndReason::Rejected,
            Some(TerminationAction::Bye) => return EndReason::LocalHangup,
            None => {}
        }

        match (self.inner.direction, self.state()) {
            (_, SessionState::Established | SessionState::Terminating) => EndReason::RemoteHangup,
            (Direction::Inbound, SessionState::Initial) => EndReason::Canceled,
            _ => EndReason::NegotiationFailed(
                engine_reason.unwrap_or_else(|| "session failed".to_string()),
            ),
        }
    }

    fn update_constraints(&self, constraints: MediaConstraints) -> Result<()> {
        self.inner.session.lock().update_constraints(constraints)
    }

    fn apply(&self, next: SessionState, reason: Option<EndReason>) -> Result<()> {
        let events = {
            let mut session = self.inner.session.lock();
            session.transition(next, reason)?;
            session.take_events()
        };

        for event in &events {
            debug!("Session {} recorded {}", event.session_id(), event.event_type());
        }
        self.inner.history.lock().extend(events);
        Ok(())
    }

    fn notify(&self, state: SessionState) {
        self.inner.state_tx.send_replace(state);
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SessionHandle {}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = self.inner.session.lock();
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .field("direction", &self.inner.direction)
            .field("remote", session.remote())
            .field("state", &session.state())
            .finish()
    }
}

struct ControllerInner {
    engine: Arc<dyn SipEngine>,
    home_domain: String,
    // lock order: current, then live
    current: RwLock<Option<SessionHandle>>,
    live: RwLock<HashMap<SessionId, SessionHandle>>,
    media_tx: watch::Sender<MediaStreamPair>,
    muted: AtomicBool,
    dispatcher: EventDispatcher,
    events: EngineEventSender,
}

#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    /// `events` is the engine event queue; failed invites are fed back into it
    pub fn new(
        engine: Arc<dyn SipEngine>,
        home_domain: impl Into<String>,
        dispatcher: EventDispatcher,
        events: EngineEventSender,
    ) -> Self {
        let (media_tx, _) = watch::channel(MediaStreamPair::empty());
        Self {
            inner: Arc::new(ControllerInner {
                engine,
                home_domain: home_domain.into(),
                current: RwLock::new(None),
                live: RwLock::new(HashMap::new()),
                media_tx,
                muted: AtomicBool::new(false),
                dispatcher,
                events,
            }),
        }
    }

    /// Start an outbound call. The session is current before the INVITE goes out.
    pub async fn place_call(&self, target: &str, video: bool) -> Result<SessionHandle> {
        let remote = SipAddress::resolve(target, &self.inner.home_domain)?;
        let constraints = MediaConstraints::with_video(video);

        let mut current = self.inner.current.write().await;
        if let Some(existing) = current.as_ref() {
            if !existing.state().is_terminal() {
                debug!("place_call refused, session {} in progress", existing.id());
                return Err(PhoneError::SessionInProgress);
            }
        }

        let engine_session = self
            .inner
            .engine
            .create_inviter(&remote, constraints)
            .map_err(|e| PhoneError::TransportUnavailable(e.to_string()))?;

        let handle = SessionHandle::new(
            Session::outbound(engine_session.id(), remote, constraints),
            engine_session,
        );
        *current = Some(handle.clone());
        self.inner
            .live
            .write()
            .await
            .insert(handle.id(), handle.clone());
        drop(current);

        telemetry::record_call(Direction::Outbound);
        telemetry::set_current_session(true);
        info!(
            "Calling {} (session {}, video={})",
            handle.remote(),
            handle.id(),
            video
        );

        let engine_session = handle.engine_session();
        let events = self.inner.events.clone();
        let session_id = handle.id();
        tokio::spawn(async move {
            if let Err(e) = engine_session.invite().await {
                warn!("INVITE for session {} failed: {}", session_id, e);
                let failed = EngineEvent::SessionStateChanged {
                    session_id,
                    state: SessionState::Terminated,
                    reason: Some(e.to_string()),
                };
                if events.send(failed).await.is_err() {
                    debug!("Engine event queue closed");
                }
            }
        });

        Ok(handle)
    }

    /// Track an invitation; it becomes current only if the slot is free
    pub async fn handle_inbound_invitation(
        &self,
        engine_session: Arc<dyn EngineSession>,
    ) -> SessionHandle {
        let handle = SessionHandle::new(
            Session::inbound(
                engine_session.id(),
                engine_session.remote_identity(),
                MediaConstraints::audio_only(),
            ),
            engine_session,
        );

        let mut current = self.inner.current.write().await;
        let call_waiting = current
            .as_ref()
            .is_some_and(|existing| !existing.state().is_terminal());
        if !call_waiting {
            *current = Some(handle.clone());
        }
        self.inner
            .live
            .write()
            .await
            .insert(handle.id(), handle.clone());
        drop(current);

        telemetry::record_call(Direction::Inbound);
        if call_waiting {
            info!(
                "Invitation from {} while busy (session {})",
                handle.remote(),
                handle.id()
            );
        } else {
            telemetry::set_current_session(true);
            info!("Invitation from {} (session {})", handle.remote(), handle.id());
        }

        self.inner.dispatcher.dispatch(PhoneEvent::IncomingInvitation {
            session: handle.clone(),
            call_waiting,
        });
        handle
    }

    /// Answer the current inbound invitation
    pub async fn accept(&self, session: &SessionHandle, video: bool) -> ControlOutcome {
        let constraints = MediaConstraints::with_video(video);
        let current = self.inner.current.read().await;

        let outcome = match current.as_ref() {
            Some(handle) if handle == session => {
                let state = handle.state();
                if handle.direction() != Direction::Inbound || state != SessionState::Initial {
                    ControlOutcome::Skipped(SkipReason::NotPermitted(state))
                } else if handle.termination_requested().is_some() || !handle.latch_accept() {
                    ControlOutcome::Skipped(SkipReason::AlreadyRequested)
                } else {
                    match handle.update_constraints(constraints) {
                        Ok(()) => {
                            self.issue(handle, EngineOp::Accept(constraints));
                            ControlOutcome::Applied
                        }
                        Err(e) => {
                            warn!("Accept on session {}: {}", handle.id(), e);
                            ControlOutcome::Skipped(SkipReason::NotPermitted(state))
                        }
                    }
                }
            }
            _ => ControlOutcome::Skipped(SkipReason::NotCurrentSession),
        };
        drop(current);

        self.finish("accept", session.id(), outcome)
    }

    /// Decline `session`. The current session is terminated per the
    /// termination table; a waiting invitation is rejected without touching it.
    pub async fn reject(&self, session: &SessionHandle) -> ControlOutcome {
        let current = self.inner.current.read().await;

        let outcome = match current.as_ref() {
            Some(handle) if handle == session => self.terminate(handle),
            other => {
                let waiting = self.inner.live.read().await.contains_key(&session.id())
                    && session.direction() == Direction::Inbound
                    && session.state() == SessionState::Initial
                    && !session.accept_requested();
                if waiting {
                    self.terminate(session)
                } else if other.is_none() {
                    ControlOutcome::Skipped(SkipReason::NoActiveSession)
                } else {
                    ControlOutcome::Skipped(SkipReason::NotCurrentSession)
                }
            }
        };
        drop(current);

        self.finish("reject", session.id(), outcome)
    }

    /// End the current session, whatever its state
    pub async fn hang_up(&self) -> ControlOutcome {
        let current = self.inner.current.read().await;
        let Some(handle) = current.as_ref() else {
            return self.skipped("hang_up", SkipReason::NoActiveSession);
        };

        let outcome = self.terminate(handle);
        let session_id = handle.id();
        drop(current);

        self.finish("hang_up", session_id, outcome)
    }

    fn terminate(&self, handle: &SessionHandle) -> ControlOutcome {
        if handle.termination_requested().is_some() {
            return ControlOutcome::Skipped(SkipReason::AlreadyRequested);
        }

        let state = handle.effective_state();
        let Some(action) = TerminationAction::select(handle.direction(), state) else {
            return ControlOutcome::Skipped(SkipReason::NotPermitted(state));
        };

        if !handle.latch_termination(action) {
            return ControlOutcome::Skipped(SkipReason::AlreadyRequested);
        }

        debug!(
            "Terminating session {} ({:?}, {}) with {}",
            handle.id(),
            handle.direction(),
            state,
            action.name()
        );
        self.issue(handle, EngineOp::Terminate(action));
        ControlOutcome::Applied
    }

    /// Enable or disable every local audio track of the current session.
    ///
    /// Returns false when there is no current session or no negotiation yet.
    pub async fn set_mute(&self, muted: bool) -> bool {
        let current = self.inner.current.read().await;
        let Some(handle) = current.as_ref() else {
            self.skipped("mute", SkipReason::NoActiveSession);
            return false;
        };

        let Some(negotiation) = handle.engine_session().negotiation() else {
            let outcome = ControlOutcome::Skipped(SkipReason::NotPermitted(handle.state()));
            self.finish("mute", handle.id(), outcome);
            return false;
        };

        let tracks: Vec<_> = negotiation
            .senders()
            .into_iter()
            .filter(|track| track.kind() == TrackKind::Audio)
            .collect();
        for track in &tracks {
            track.set_enabled(!muted);
        }
        self.inner.muted.store(muted, Ordering::SeqCst);

        info!(
            "Session {} {} ({} audio tracks)",
            handle.id(),
            if muted { "muted" } else { "unmuted" },
            tracks.len()
        );
        self.finish("mute", handle.id(), ControlOutcome::Applied);
        true
    }

    /// Last successful mute request on the current session
    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::SeqCst)
    }

    /// REFER the current established outbound session to `target`
    pub async fn transfer(&self, target: &str) -> Result<ControlOutcome> {
        let target = SipAddress::resolve(target, &self.inner.home_domain)?;

        let current = self.inner.current.read().await;
        let Some(handle) = current.as_ref() else {
            return Ok(self.skipped("transfer", SkipReason::NoActiveSession));
        };

        let state = handle.state();
        let outcome = if handle.direction() != Direction::Outbound
            || state != SessionState::Established
            || handle.termination_requested().is_some()
        {
            ControlOutcome::Skipped(SkipReason::NotPermitted(state))
        } else {
            info!("Transferring session {} to {}", handle.id(), target);
            self.issue(handle, EngineOp::Refer(target));
            ControlOutcome::Applied
        };
        let session_id = handle.id();
        drop(current);

        Ok(self.finish("transfer", session_id, outcome))
    }

    /// Mirror an engine state change into the session and publish it
    pub async fn on_state_change(
        &self,
        session_id: SessionId,
        state: SessionState,
        engine_reason: Option<String>,
    ) {
        let handle = self.inner.live.read().await.get(&session_id).cloned();
        let Some(handle) = handle else {
            debug!("State {} for unknown session {}, ignoring", state, session_id);
            return;
        };

        let reason = (state == SessionState::Terminated).then(|| handle.end_reason_for(engine_reason));
        if let Err(e) = handle.apply(state, reason.clone()) {
            warn!("Ignoring engine report for session {}: {}", session_id, e);
            return;
        }

        match state {
            SessionState::Established => {
                let is_current = self
                    .inner
                    .current
                    .read()
                    .await
                    .as_ref()
                    .is_some_and(|current| *current == handle);
                if is_current {
                    self.publish_media(&handle);
                }
                info!("Session {} established with {}", session_id, handle.remote());
            }
            SessionState::Terminated => {
                let mut current = self.inner.current.write().await;
                if current.as_ref().is_some_and(|current| *current == handle) {
                    *current = None;
                    self.inner.media_tx.send_replace(MediaStreamPair::empty());
                    self.inner.muted.store(false, Ordering::SeqCst);
                    telemetry::set_current_session(false);
                }
                self.inner.live.write().await.remove(&session_id);
                drop(current);

                telemetry::record_session_ended(reason.as_ref());
                info!(
                    "Session {} terminated ({})",
                    session_id,
                    reason.as_ref().map_or("unknown", EndReason::label)
                );
            }
            _ => debug!("Session {} -> {}", session_id, state),
        }

        self.inner.dispatcher.dispatch(PhoneEvent::SessionStateChanged {
            session: handle.clone(),
            state,
            reason,
        });
        handle.notify(state);
    }

    pub async fn current_session(&self) -> Option<SessionHandle> {
        self.inner.current.read().await.clone()
    }

    /// Live session by id, current or waiting
    pub async fn session(&self, id: SessionId) -> Option<SessionHandle> {
        self.inner.live.read().await.get(&id).cloned()
    }

    pub async fn live_sessions(&self) -> Vec<SessionHandle> {
        self.inner.live.read().await.values().cloned().collect()
    }

    pub fn media_streams(&self) -> watch::Receiver<MediaStreamPair> {
        self.inner.media_tx.subscribe()
    }

    pub fn current_media(&self) -> MediaStreamPair {
        self.inner.media_tx.borrow().clone()
    }

    fn publish_media(&self, handle: &SessionHandle) {
        let pair = handle
            .engine_session()
            .negotiation()
            .map(|negotiation| MediaStreamPair {
                local: MediaStream::from_tracks(
                    negotiation.senders().into_iter().filter(|track| track.is_live()),
                ),
                remote: MediaStream::from_tracks(
                    negotiation.receivers().into_iter().filter(|track| track.is_live()),
                ),
            })
            .unwrap_or_default();

        debug!(
            "Session {} media: {} local, {} remote tracks",
            handle.id(),
            pair.local.len(),
            pair.remote.len()
        );
        self.inner.media_tx.send_replace(pair);
    }

    /// Run `op` on the engine. A failed operation releases its latch.
    fn issue(&self, handle: &SessionHandle, op: EngineOp) {
        let handle = handle.clone();
        let dispatcher = self.inner.dispatcher.clone();

        tokio::spawn(async move {
            let engine_session = handle.engine_session();
            let session_id = handle.id();
            let operation = op.name();
            let result = match &op {
                EngineOp::Accept(constraints) => engine_session.accept(*constraints).await,
                EngineOp::Terminate(TerminationAction::Cancel) => engine_session.cancel().await,
                EngineOp::Terminate(TerminationAction::Reject) => engine_session.reject().await,
                EngineOp::Terminate(TerminationAction::Bye) => engine_session.bye().await,
                EngineOp::Refer(target) => engine_session.refer(target).await,
            };

            if let Err(e) = result {
                warn!("Engine {} on session {} failed: {}", operation, session_id, e);
                handle.release(&op);
                dispatcher.dispatch(PhoneEvent::OperationFailed {
                    session_id,
                    operation,
                    reason: e.to_string(),
                });
            }
        });
    }

    fn skipped(&self, operation: &'static str, reason: SkipReason) -> ControlOutcome {
        debug!("{} skipped: {:?}", operation, reason);
        telemetry::record_control(operation, reason.label());
        ControlOutcome::Skipped(reason)
    }

    fn finish(
        &self,
        operation: &'static str,
        session_id: SessionId,
        outcome: ControlOutcome,
    ) -> ControlOutcome {
        match outcome {
            ControlOutcome::Applied => debug!("{} applied to session {}", operation, session_id),
            ControlOutcome::Skipped(reason) => {
                debug!("{} on session {} skipped: {:?}", operation, session_id, reason)
            }
        }
        telemetry::record_control(operation, outcome.label());
        outcome
    }
}

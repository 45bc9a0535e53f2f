//! Registration against the bound identity

use crate::application::dispatch::{EventDispatcher, PhoneEvent};
use crate::application::user_agent::UserAgent;
use crate::domain::registration::RegistrationState;
use crate::domain::shared::{PhoneError, Result};
use crate::infrastructure::telemetry;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

struct RegistererInner {
    agent: UserAgent,
    dispatcher: EventDispatcher,
    state_tx: watch::Sender<RegistrationState>,
}

/// Owns the registration state. Refresh is left to the engine.
#[derive(Clone)]
pub struct Registerer {
    inner: Arc<RegistererInner>,
}

impl Registerer {
    pub fn new(agent: UserAgent, dispatcher: EventDispatcher) -> Self {
        let (state_tx, _) = watch::channel(RegistrationState::Unregistered);
        Self {
            inner: Arc::new(RegistererInner {
                agent,
                dispatcher,
                state_tx,
            }),
        }
    }

    /// Start an attempt, or join the one in flight.
    ///
    /// Returns immediately; the attempt waits for the transport first.
    pub fn register(&self) -> RegistrationWatch {
        let started = self.transition(RegistrationState::Registering);
        let watch = RegistrationWatch {
            rx: self.inner.state_tx.subscribe(),
        };

        if started {
            let registerer = self.clone();
            tokio::spawn(async move { registerer.run_attempt().await });
        } else {
            debug!("Registration already in flight, joining");
        }

        watch
    }

    async fn run_attempt(&self) {
        let outcome = match self.inner.agent.ready().await {
            Err(PhoneError::TransportUnavailable(reason)) => {
                RegistrationState::Failed(format!("transport unavailable: {}", reason))
            }
            Err(other) => RegistrationState::Failed(other.to_string()),
            Ok(()) => match self.inner.agent.engine().register().await {
                Ok(()) => RegistrationState::Registered,
                Err(e) => RegistrationState::Failed(e.to_string()),
            },
        };

        self.transition(outcome);
    }

    /// Send the un-REGISTER; a no-op unless registered
    pub async fn unregister(&self) -> Result<()> {
        if !self.state().is_registered() {
            debug!("Unregister skipped, state is {}", self.state());
            return Ok(());
        }

        self.inner
            .agent
            .engine()
            .unregister()
            .await
            .map_err(|e| PhoneError::TransportUnavailable(e.to_string()))?;

        self.transition(RegistrationState::Unregistered);
        Ok(())
    }

    pub fn state(&self) -> RegistrationState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn watch(&self) -> RegistrationWatch {
        RegistrationWatch {
            rx: self.inner.state_tx.subscribe(),
        }
    }

    /// Apply `next` if the state machine allows it, then publish
    fn transition(&self, next: RegistrationState) -> bool {
        let mut from = RegistrationState::Unregistered;
        let applied = self.inner.state_tx.send_if_modified(|state| {
            if state.can_transition_to(&next) {
                from = std::mem::replace(state, next.clone());
                true
            } else {
                false
            }
        });

        if !applied {
            return false;
        }

        match &next {
            RegistrationState::Failed(reason) => {
                warn!("Registration of {} failed: {}", self.inner.agent.identity().address(), reason)
            }
            _ => info!("Registration: {} -> {}", from, next),
        }

        telemetry::record_registration(&next);
        self.inner
            .dispatcher
            .dispatch(PhoneEvent::RegistrationStateChanged(next));
        true
    }
}

/// Observes one registerer's state
pub struct RegistrationWatch {
    rx: watch::Receiver<RegistrationState>,
}

impl RegistrationWatch {
    pub fn current(&self) -> RegistrationState {
        self.rx.borrow().clone()
    }

    /// Wait for `Registered` or `Failed`
    pub async fn terminal(mut self) -> RegistrationState {
        if self.rx.wait_for(RegistrationState::is_terminal).await.is_err() {
            debug!("Registerer dropped before the attempt settled");
        }
        self.rx.borrow().clone()
    }

    /// Wait for the next change; `None` once the registerer is gone
    pub async fn changed(&mut self) -> Option<RegistrationState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::engine::{EngineError, MockEngineConnector, MockSipEngine, SipEngine};
    use tokio::sync::mpsc;

    fn registerer_with(engine: MockSipEngine) -> (Registerer, EventDispatcher) {
        let engine: Arc<dyn SipEngine> = Arc::new(engine);
        let mut connector = MockEngineConnector::new();
        connector
            .expect_create_agent()
            .returning(move |_, _| Ok(engine.clone()));
        let (tx, _rx) = mpsc::channel(8);
        let agent = UserAgent::bind(
            "alice@example.com",
            "secret",
            "wss://sip.example.com/ws",
            &connector,
            tx,
        )
        .unwrap();

        let dispatcher = EventDispatcher::new(16);
        (Registerer::new(agent, dispatcher.clone()), dispatcher)
    }

    #[tokio::test]
    async fn test_register_success() {
        let mut engine = MockSipEngine::new();
        engine.expect_start().returning(|| Ok(()));
        engine.expect_register().times(1).returning(|| Ok(()));
        engine.expect_unregister().times(1).returning(|| Ok(()));
        let (registerer, dispatcher) = registerer_with(engine);
        let mut events = dispatcher.subscribe();

        let watch = registerer.register();
        assert_eq!(watch.terminal().await, RegistrationState::Registered);

        assert!(matches!(
            events.next().await,
            Some(PhoneEvent::RegistrationStateChanged(RegistrationState::Registering))
        ));
        assert!(matches!(
            events.next().await,
            Some(PhoneEvent::RegistrationStateChanged(RegistrationState::Registered))
        ));

        registerer.unregister().await.unwrap();
        assert_eq!(registerer.state(), RegistrationState::Unregistered);
        // second unregister never reaches the engine
        registerer.unregister().await.unwrap();
    }

    #[tokio::test]
    async fn test_register_rejected() {
        let mut engine = MockSipEngine::new();
        engine.expect_start().returning(|| Ok(()));
        engine
            .expect_register()
            .returning(|| Err(EngineError::Rejected("403 Forbidden".into())));
        let (registerer, _dispatcher) = registerer_with(engine);

        let state = registerer.register().terminal().await;
        assert_eq!(state, RegistrationState::Failed("403 Forbidden".into()));
        assert_eq!(
            state.as_error(),
            Some(PhoneError::RegistrationFailed("403 Forbidden".into()))
        );
    }

    #[tokio::test]
    async fn test_transport_failure_fails_attempt() {
        let mut engine = MockSipEngine::new();
        engine
            .expect_start()
            .returning(|| Err(EngineError::Transport("refused".into())));
        engine.expect_register().never();
        let (registerer, _dispatcher) = registerer_with(engine);

        match registerer.register().terminal().await {
            RegistrationState::Failed(reason) => {
                assert!(reason.starts_with("transport unavailable"), "{}", reason)
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_register_joins_attempt() {
        let mut engine = MockSipEngine::new();
        engine.expect_start().returning(|| Ok(()));
        engine.expect_register().times(1).returning(|| Ok(()));
        let (registerer, _dispatcher) = registerer_with(engine);

        let first = registerer.register();
        let second = registerer.register();
        assert_eq!(second.current(), RegistrationState::Registering);

        assert_eq!(first.terminal().await, RegistrationState::Registered);
        assert_eq!(second.terminal().await, RegistrationState::Registered);
    }

    #[tokio::test]
    async fn test_reregister_after_failure() {
        let mut engine = MockSipEngine::new();
        engine.expect_start().returning(|| Ok(()));
        let mut attempts = 0;
        engine.expect_register().times(2).returning(move || {
            attempts += 1;
            if attempts == 1 {
                Err(EngineError::Rejected("408 Request Timeout".into()))
            } else {
                Ok(())
            }
        });
        let (registerer, _dispatcher) = registerer_with(engine);

        assert!(matches!(
            registerer.register().terminal().await,
            RegistrationState::Failed(_)
        ));
        assert_eq!(
            registerer.register().terminal().await,
            RegistrationState::Registered
        );
    }
}

//! Identity and transport binding
//!
//! A [`UserAgent`] ties one immutable [`Identity`] to one engine agent. The
//! transport is opened in the background; [`UserAgent::ready`] resolves once
//! the engine confirms connectivity.

use crate::domain::identity::Identity;
use crate::domain::shared::{PhoneError, Result};
use crate::infrastructure::engine::{AgentOptions, EngineConnector, EngineEventSender, SipEngine};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    Connecting,
    Connected,
    Failed(String),
    Stopped,
}

struct UserAgentInner {
    identity: Identity,
    engine: Arc<dyn SipEngine>,
    state_tx: watch::Sender<TransportState>,
}

#[derive(Clone)]
pub struct UserAgent {
    inner: Arc<UserAgentInner>,
}

impl UserAgent {
    /// Build the identity and the engine agent, then start the transport.
    ///
    /// Must be called inside a tokio runtime.
    pub fn bind(
        address: &str,
        credential: &str,
        transport_url: &str,
        connector: &dyn EngineConnector,
        events: EngineEventSender,
    ) -> Result<Self> {
        let identity = Identity::new(address, credential, transport_url)?;
        let engine = connector
            .create_agent(AgentOptions::from_identity(&identity), events)
            .map_err(|e| PhoneError::TransportUnavailable(e.to_string()))?;

        let (state_tx, _) = watch::channel(TransportState::Connecting);
        let agent = Self {
            inner: Arc::new(UserAgentInner {
                identity,
                engine,
                state_tx,
            }),
        };

        info!(
            "Binding {} to {}",
            agent.inner.identity.address(),
            agent.inner.identity.transport()
        );

        let starter = agent.clone();
        tokio::spawn(async move { starter.start().await });

        Ok(agent)
    }

    async fn start(&self) {
        let next = match self.inner.engine.start().await {
            Ok(()) => TransportState::Connected,
            Err(e) => {
                warn!("Transport failed to start: {}", e);
                TransportState::Failed(e.to_string())
            }
        };

        // a stop() issued meanwhile wins
        let applied = self.inner.state_tx.send_if_modified(|state| {
            if *state == TransportState::Connecting {
                *state = next.clone();
                true
            } else {
                false
            }
        });

        if applied && next == TransportState::Connected {
            info!("Transport connected: {}", self.inner.identity.transport());
        }
    }

    /// Resolves once the transport is connected
    pub async fn ready(&self) -> Result<()> {
        let mut rx = self.inner.state_tx.subscribe();
        let state = rx
            .wait_for(|state| *state != TransportState::Connecting)
            .await
            .map_err(|_| PhoneError::TransportUnavailable("user agent dropped".to_string()))?
            .clone();

        match state {
            TransportState::Connected => Ok(()),
            TransportState::Failed(reason) => Err(PhoneError::TransportUnavailable(reason)),
            _ => Err(PhoneError::TransportUnavailable(
                "user agent stopped".to_string(),
            )),
        }
    }

    /// Stop the engine agent; idempotent
    pub async fn stop(&self) {
        let previous = self.inner.state_tx.send_replace(TransportState::Stopped);
        if previous == TransportState::Stopped {
            return;
        }

        if let Err(e) = self.inner.engine.stop().await {
            warn!("Engine stop failed: {}", e);
        }
        info!("User agent {} stopped", self.inner.identity.address());
    }

    pub fn transport_state(&self) -> TransportState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn watch_transport(&self) -> watch::Receiver<TransportState> {
        self.inner.state_tx.subscribe()
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn engine(&self) -> Arc<dyn SipEngine> {
        self.inner.engine.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::engine::{EngineError, MockEngineConnector, MockSipEngine};
    use tokio::sync::mpsc;

    fn connector_with(engine: MockSipEngine) -> MockEngineConnector {
        let engine: Arc<dyn SipEngine> = Arc::new(engine);
        let mut connector = MockEngineConnector::new();
        connector
            .expect_create_agent()
            .times(1)
            .returning(move |options, _| {
                assert_eq!(options.authorization_username, "alice");
                Ok(engine.clone())
            });
        connector
    }

    #[tokio::test]
    async fn test_bind_and_ready() {
        let mut engine = MockSipEngine::new();
        engine.expect_start().times(1).returning(|| Ok(()));
        engine.expect_stop().times(1).returning(|| Ok(()));
        let connector = connector_with(engine);
        let (tx, _rx) = mpsc::channel(8);

        let agent = UserAgent::bind(
            "alice@example.com",
            "secret",
            "wss://sip.example.com/ws",
            &connector,
            tx,
        )
        .unwrap();

        agent.ready().await.unwrap();
        assert_eq!(agent.transport_state(), TransportState::Connected);
        assert_eq!(agent.identity().authorization_username(), "alice");

        agent.stop().await;
        agent.stop().await;
        assert_eq!(agent.transport_state(), TransportState::Stopped);
        assert!(matches!(
            agent.ready().await,
            Err(PhoneError::TransportUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_start_failure() {
        let mut engine = MockSipEngine::new();
        engine
            .expect_start()
            .returning(|| Err(EngineError::Transport("connection refused".into())));
        let connector = connector_with(engine);
        let (tx, _rx) = mpsc::channel(8);

        let agent = UserAgent::bind(
            "sip:alice@example.com",
            "secret",
            "ws://127.0.0.1:8088/ws",
            &connector,
            tx,
        )
        .unwrap();

        let err = agent.ready().await.unwrap_err();
        assert_eq!(
            err,
            PhoneError::TransportUnavailable("transport error: connection refused".into())
        );
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_input() {
        let connector = MockEngineConnector::new();
        let (tx, _rx) = mpsc::channel(8);

        let err = UserAgent::bind("alice", "pw", "wss://sip.example.com/ws", &connector, tx.clone())
            .err()
            .unwrap();
        assert!(matches!(err, PhoneError::InvalidAddress(_)));

        let err = UserAgent::bind("alice@example.com", "pw", "https://sip.example.com", &connector, tx)
            .err()
            .unwrap();
        assert!(matches!(err, PhoneError::TransportUnavailable(_)));
    }

    #[tokio::test]
    async fn test_engine_construction_failure() {
        let mut connector = MockEngineConnector::new();
        connector
            .expect_create_agent()
            .returning(|_, _| Err(EngineError::Transport("no engine".into())));
        let (tx, _rx) = mpsc::channel(8);

        let err = UserAgent::bind("alice@example.com", "pw", "wss://sip.example.com/ws", &connector, tx)
            .err()
            .unwrap();
        assert!(matches!(err, PhoneError::TransportUnavailable(_)));
    }
}

//! Instant messaging, independent of any session

use crate::application::dispatch::{EventDispatcher, PhoneEvent};
use crate::application::user_agent::UserAgent;
use crate::domain::message::Message;
use crate::domain::shared::{Result, SipAddress};
use crate::infrastructure::telemetry;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Messenger {
    agent: UserAgent,
    dispatcher: EventDispatcher,
}

impl Messenger {
    pub fn new(agent: UserAgent, dispatcher: EventDispatcher) -> Self {
        Self { agent, dispatcher }
    }

    /// Queue a MESSAGE to `target` and return the outgoing record.
    ///
    /// Only target validation fails here; delivery failures arrive later as
    /// [`PhoneEvent::MessageFailed`].
    pub fn send(&self, target: &str, body: impl Into<String>) -> Result<Message> {
        let identity = self.agent.identity();
        let recipient = SipAddress::resolve(target, identity.domain())?;
        let message = Message::new(identity.address().to_string(), recipient.to_string(), body);

        let agent = self.agent.clone();
        let dispatcher = self.dispatcher.clone();
        let outgoing = message.clone();
        tokio::spawn(async move {
            let delivery = match agent.ready().await {
                Ok(()) => agent
                    .engine()
                    .send_message(&recipient, &outgoing.body)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match delivery {
                Ok(()) => {
                    debug!("Message to {} delivered", recipient);
                    telemetry::record_message("outbound", "sent");
                }
                Err(reason) => {
                    warn!("Message to {} failed: {}", recipient, reason);
                    telemetry::record_message("outbound", "failed");
                    dispatcher.dispatch(PhoneEvent::MessageFailed {
                        message: outgoing,
                        reason,
                    });
                }
            }
        });

        Ok(message)
    }

    /// Turn an engine MESSAGE into an event for observers
    pub fn receive(&self, from: String, body: String) -> Message {
        let message = Message::new(from, self.agent.identity().address().to_string(), body);
        debug!("Message from {}", message.sender);
        telemetry::record_message("inbound", "received");

        self.dispatcher
            .dispatch(PhoneEvent::IncomingMessage(message.clone()));
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::PhoneError;
    use crate::infrastructure::engine::{EngineError, MockEngineConnector, MockSipEngine, SipEngine};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn messenger_with(engine: MockSipEngine) -> (Messenger, EventDispatcher) {
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

        let dispatcher = EventDispatcher::new(8);
        (Messenger::new(agent, dispatcher.clone()), dispatcher)
    }

    #[tokio::test]
    async fn test_send_qualifies_bare_target() {
        let (delivered_tx, mut delivered) = mpsc::unbounded_channel();
        let mut engine = MockSipEngine::new();
        engine.expect_start().returning(|| Ok(()));
        engine
            .expect_send_message()
            .times(1)
            .returning(move |target, body| {
                delivered_tx.send((target.to_string(), body.to_string())).ok();
                Ok(())
            });
        let (messenger, _dispatcher) = messenger_with(engine);

        let message = messenger.send("bob", "hello").unwrap();
        assert_eq!(message.sender, "sip:alice@example.com");
        assert_eq!(message.recipient, "sip:bob@example.com");
        assert_eq!(message.body, "hello");

        let (target, body) = timeout(Duration::from_secs(1), delivered.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(target, "sip:bob@example.com");
        assert_eq!(body, "hello");
    }

    #[tokio::test]
    async fn test_invalid_target_is_synchronous() {
        let mut engine = MockSipEngine::new();
        engine.expect_start().returning(|| Ok(()));
        engine.expect_send_message().never();
        let (messenger, _dispatcher) = messenger_with(engine);

        assert!(matches!(
            messenger.send("sip:", "hello"),
            Err(PhoneError::InvalidTarget(_))
        ));
    }

    #[tokio::test]
    async fn test_delivery_failure_is_dispatched() {
        let mut engine = MockSipEngine::new();
        engine.expect_start().returning(|| Ok(()));
        engine
            .expect_send_message()
            .returning(|_, _| Err(EngineError::Delivery("404 Not Found".into())));
        let (messenger, dispatcher) = messenger_with(engine);
        let mut events = dispatcher.subscribe();

        let sent = messenger.send("sip:ghost@example.com", "anyone?").unwrap();

        match timeout(Duration::from_secs(1), events.next()).await.unwrap() {
            Some(PhoneEvent::MessageFailed { message, reason }) => {
                assert_eq!(message, sent);
                assert_eq!(reason, "delivery failed: 404 Not Found");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_receive_dispatches_message() {
        let mut engine = MockSipEngine::new();
        engine.expect_start().returning(|| Ok(()));
        let (messenger, dispatcher) = messenger_with(engine);
        let mut events = dispatcher.subscribe();

        messenger.receive("sip:bob@example.com".into(), "hi alice".into());

        match events.next().await {
            Some(PhoneEvent::IncomingMessage(message)) => {
                assert_eq!(message.sender_user(), "bob");
                assert_eq!(message.recipient, "sip:alice@example.com");
                assert_eq!(message.body, "hi alice");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}

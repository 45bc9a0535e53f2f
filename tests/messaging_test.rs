//! Messaging integration tests over the loopback engine

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_test::assert_ok;
use webphone::application::{EventSubscription, PhoneEvent, WebPhone};
use webphone::config::Config;
use webphone::domain::session::SessionState;
use webphone::domain::shared::PhoneError;
use webphone::infrastructure::engine::{LoopbackConfig, LoopbackConnector, LoopbackEngine};

const WAIT: Duration = Duration::from_secs(2);

async fn connect(loopback: LoopbackConfig) -> (WebPhone, Arc<LoopbackEngine>, EventSubscription) {
    let mut config = Config::default();
    config.account.password = "secret123".to_string();
    config.phone.register_on_connect = false;

    let connector = LoopbackConnector::new(loopback);
    let phone = assert_ok!(WebPhone::connect(&config, &connector));
    let events = phone.subscribe();
    (phone, connector.engine().unwrap(), events)
}

async fn wait_for_delivery(engine: &LoopbackEngine, count: usize) {
    timeout(WAIT, async {
        while engine.sent_messages().len() < count {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("message was not delivered");
}

#[tokio::test]
async fn test_send_to_bare_user() {
    let (phone, engine, _events) = connect(LoopbackConfig::default()).await;

    let message = assert_ok!(phone.messenger().send("bob", "hello bob"));
    assert_eq!(message.sender, "sip:alice@example.com");
    assert_eq!(message.recipient, "sip:bob@example.com");

    wait_for_delivery(&engine, 1).await;
    let sent = engine.sent_messages();
    assert_eq!(sent[0].target.to_string(), "sip:bob@example.com");
    assert_eq!(sent[0].body, "hello bob");
}

#[tokio::test]
async fn test_invalid_target_fails_synchronously() {
    let (phone, _engine, _events) = connect(LoopbackConfig::default()).await;

    let err = phone.messenger().send("sip:", "hello").unwrap_err();
    assert!(matches!(err, PhoneError::InvalidTarget(_)));
}

#[tokio::test]
async fn test_delivery_failure_is_reported() {
    let (phone, _engine, mut events) = connect(LoopbackConfig {
        reject_messages: Some("480 Temporarily Unavailable".to_string()),
        ..Default::default()
    })
    .await;

    let sent = assert_ok!(phone.messenger().send("sip:bob@example.com", "ping"));

    match timeout(WAIT, events.next()).await.unwrap() {
        Some(PhoneEvent::MessageFailed { message, reason }) => {
            assert_eq!(message, sent);
            assert!(reason.contains("480"), "{}", reason);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_send_while_transport_down_is_reported() {
    let (phone, _engine, mut events) = connect(LoopbackConfig {
        reachable: false,
        ..Default::default()
    })
    .await;

    // still accepted locally
    assert_ok!(phone.messenger().send("bob", "anyone there?"));

    match timeout(WAIT, events.next()).await.unwrap() {
        Some(PhoneEvent::MessageFailed { reason, .. }) => {
            assert!(reason.starts_with("Transport unavailable"), "{}", reason)
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_incoming_message() {
    let (phone, engine, mut events) = connect(LoopbackConfig::default()).await;
    assert_ok!(phone.agent().ready().await);

    assert_ok!(engine.incoming_message("sip:bob@example.com", "lunch?").await);

    match timeout(WAIT, events.next()).await.unwrap() {
        Some(PhoneEvent::IncomingMessage(message)) => {
            assert_eq!(message.sender_user(), "bob");
            assert_eq!(message.recipient, "sip:alice@example.com");
            assert_eq!(message.body, "lunch?");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_messaging_during_call() {
    let (phone, engine, _events) = connect(LoopbackConfig {
        auto_answer: true,
        ..Default::default()
    })
    .await;

    let call = assert_ok!(phone.sessions().place_call("bob", false).await);
    assert_eq!(
        timeout(WAIT, call.wait_for_state(SessionState::Established))
            .await
            .unwrap(),
        SessionState::Established
    );

    assert_ok!(phone.messenger().send("carol", "on a call"));
    wait_for_delivery(&engine, 1).await;
    assert_eq!(call.state(), SessionState::Established);
}

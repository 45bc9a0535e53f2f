//! Registration and binding integration tests over the loopback engine

use std::time::Duration;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};
use webphone::application::{PhoneEvent, TransportState, WebPhone};
use webphone::config::Config;
use webphone::domain::registration::RegistrationState;
use webphone::domain::shared::PhoneError;
use webphone::infrastructure::engine::{LoopbackConfig, LoopbackConnector};

const WAIT: Duration = Duration::from_secs(2);

fn config(register_on_connect: bool) -> Config {
    let mut config = Config::default();
    config.account.address = "sip:alice@example.com".to_string();
    config.account.password = "secret123".to_string();
    config.phone.register_on_connect = register_on_connect;
    config
}

#[tokio::test]
async fn test_register_on_connect() {
    let connector = LoopbackConnector::new(LoopbackConfig::default());
    let phone = assert_ok!(WebPhone::connect(&config(true), &connector));

    let state = timeout(WAIT, phone.registerer().watch().terminal())
        .await
        .expect("registration did not settle");
    assert_eq!(state, RegistrationState::Registered);

    let engine = connector.engine().unwrap();
    assert!(engine.is_registered());
    assert_eq!(engine.options().authorization_username, "alice");
    assert_eq!(engine.options().authorization_password.expose(), "secret123");
}

#[tokio::test]
async fn test_registration_events() {
    let connector = LoopbackConnector::new(LoopbackConfig::default());
    let phone = assert_ok!(WebPhone::connect(&config(false), &connector));
    let mut events = phone.subscribe();
    assert_eq!(phone.registerer().state(), RegistrationState::Unregistered);

    let state = phone.registerer().register().terminal().await;
    assert_eq!(state, RegistrationState::Registered);

    let mut seen = Vec::new();
    while seen.len() < 2 {
        match timeout(WAIT, events.next()).await.unwrap() {
            Some(PhoneEvent::RegistrationStateChanged(state)) => seen.push(state),
            Some(_) => continue,
            None => break,
        }
    }
    assert_eq!(
        seen,
        vec![RegistrationState::Registering, RegistrationState::Registered]
    );
}

#[tokio::test]
async fn test_registration_rejected() {
    let connector = LoopbackConnector::new(LoopbackConfig {
        reject_registration: Some("403 Forbidden".to_string()),
        ..Default::default()
    });
    let phone = assert_ok!(WebPhone::connect(&config(false), &connector));

    let state = phone.registerer().register().terminal().await;
    assert_eq!(state, RegistrationState::Failed("403 Forbidden".to_string()));
    assert_eq!(
        state.as_error(),
        Some(PhoneError::RegistrationFailed("403 Forbidden".to_string()))
    );

    // other operations are not blocked by the failed registration
    assert_ok!(phone.sessions().place_call("bob", false).await);
}

#[tokio::test]
async fn test_unreachable_transport() {
    let connector = LoopbackConnector::new(LoopbackConfig {
        reachable: false,
        ..Default::default()
    });
    let phone = assert_ok!(WebPhone::connect(&config(false), &connector));

    let err = assert_err!(phone.agent().ready().await);
    assert!(matches!(err, PhoneError::TransportUnavailable(_)));
    assert!(matches!(
        phone.agent().transport_state(),
        TransportState::Failed(_)
    ));

    match phone.registerer().register().terminal().await {
        RegistrationState::Failed(reason) => assert!(reason.starts_with("transport unavailable")),
        other => panic!("unexpected state {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_address_fails_connect() {
    let connector = LoopbackConnector::new(LoopbackConfig::default());
    let mut config = config(false);
    config.account.address = "alice".to_string();

    let err = WebPhone::connect(&config, &connector).err();
    assert!(matches!(err, Some(PhoneError::InvalidAddress(_))));
    assert!(connector.engine().is_none());
}

#[tokio::test]
async fn test_shutdown_unregisters_and_stops() {
    let connector = LoopbackConnector::new(LoopbackConfig::default());
    let phone = assert_ok!(WebPhone::connect(&config(false), &connector));
    let engine = connector.engine().unwrap();

    phone.registerer().register().terminal().await;
    assert!(engine.is_registered());

    phone.shutdown().await;
    assert!(!engine.is_registered());
    assert!(!engine.is_started());
    assert_eq!(phone.registerer().state(), RegistrationState::Unregistered);
    assert_eq!(phone.agent().transport_state(), TransportState::Stopped);

    // idempotent
    phone.shutdown().await;
}

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use webphone::application::{PhoneEvent, WebPhone};
use webphone::config::Config;
use webphone::domain::session::SessionState;
use webphone::infrastructure::engine::{LoopbackConnector, LoopbackEngine};
use webphone::infrastructure::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (first argument: optional TOML file)
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("loading configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting webphone");
    info!("Configuration loaded: {:?}", config);

    let prometheus = telemetry::install_prometheus()?;

    let connector = LoopbackConnector::new(config.loopback.clone());
    let phone = WebPhone::connect(&config, &connector)?;
    let engine = connector
        .engine()
        .context("loopback engine was not constructed")?;

    let mut events = phone.subscribe();
    let observer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            log_event(&event);
        }
    });

    phone.agent().ready().await?;

    let registration = phone.registerer().register().terminal().await;
    if let Some(err) = registration.as_error() {
        return Err(err).context("registration");
    }
    info!("Registered as {}", phone.identity().address());

    demo_outbound_call(&phone, &engine, &config).await?;
    demo_inbound_call(&phone, &engine).await?;
    demo_messaging(&phone, &engine).await?;

    phone.shutdown().await;
    observer.abort();

    info!("Metrics snapshot:\n{}", prometheus.render());
    Ok(())
}

/// Call bob, let him answer, toggle mute, hang up
async fn demo_outbound_call(
    phone: &WebPhone,
    engine: &Arc<LoopbackEngine>,
    config: &Config,
) -> anyhow::Result<()> {
    info!("=== Outbound Call Demo ===");

    let call = phone
        .sessions()
        .place_call("bob", config.phone.default_video)
        .await?;
    info!("Calling {} (state {})", call.remote(), call.state());

    if !config.loopback.auto_answer {
        call.wait_for_state(SessionState::Establishing).await;
        engine.answer(call.id()).await?;
    }
    if call.wait_for_state(SessionState::Established).await != SessionState::Established {
        warn!("Call ended before it was answered: {:?}", call.end_reason());
        return Ok(());
    }

    let media = phone.sessions().current_media();
    info!(
        "Media: {} local, {} remote tracks",
        media.local.len(),
        media.remote.len()
    );

    phone.sessions().set_mute(true).await;
    info!("Muted: {}", phone.sessions().is_muted());
    phone.sessions().set_mute(false).await;

    phone.sessions().hang_up().await;
    call.wait_for_state(SessionState::Terminated).await;

    let snapshot = call.snapshot();
    info!(
        "Call ended: {:?}, duration {:?}",
        snapshot.end_reason(),
        snapshot.duration()
    );
    Ok(())
}

/// Carol calls, we answer with audio, she hangs up
async fn demo_inbound_call(phone: &WebPhone, engine: &Arc<LoopbackEngine>) -> anyhow::Result<()> {
    info!("=== Inbound Call Demo ===");

    let id = engine.incoming_call("sip:carol@example.com", false).await?;
    let invitation = loop {
        if let Some(session) = phone.sessions().session(id).await {
            break session;
        }
        tokio::task::yield_now().await;
    };

    phone.sessions().accept(&invitation, false).await;
    invitation.wait_for_state(SessionState::Established).await;

    engine.remote_hang_up(id).await?;
    invitation.wait_for_state(SessionState::Terminated).await;
    info!("Inbound call ended: {:?}", invitation.end_reason());
    Ok(())
}

async fn demo_messaging(phone: &WebPhone, engine: &Arc<LoopbackEngine>) -> anyhow::Result<()> {
    info!("=== Messaging Demo ===");

    let message = phone.messenger().send("bob", "are you still there?")?;
    info!("Sent to {}: {}", message.recipient, message.body);

    engine
        .incoming_message("sip:bob@example.com", "yes, call me later")
        .await?;
    tokio::task::yield_now().await;
    Ok(())
}

fn log_event(event: &PhoneEvent) {
    match event {
        PhoneEvent::IncomingInvitation {
            session,
            call_waiting,
        } => info!(
            "Incoming call from {} (call waiting: {})",
            session.remote(),
            call_waiting
        ),
        PhoneEvent::IncomingMessage(message) => {
            info!("Message from {}: {}", message.sender_user(), message.body)
        }
        PhoneEvent::SessionStateChanged {
            session,
            state,
            reason,
        } => info!("Session {} -> {} {:?}", session.id(), state, reason),
        PhoneEvent::RegistrationStateChanged(state) => info!("Registration: {}", state),
        PhoneEvent::MessageFailed { message, reason } => {
            warn!("Message to {} failed: {}", message.recipient, reason)
        }
        PhoneEvent::OperationFailed {
            session_id,
            operation,
            reason,
        } => warn!("{} on session {} failed: {}", operation, session_id, reason),
    }
}

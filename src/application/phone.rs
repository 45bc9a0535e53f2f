//! WebPhone facade
//!
//! Wires the binding, registerer, session controller and messenger together
//! and runs the engine event pump, the single task that applies
//! engine-originated changes.

use crate::application::dispatch::{EventDispatcher, EventSubscription};
use crate::application::messenger::Messenger;
use crate::application::registerer::Registerer;
use crate::application::session::SessionController;
use crate::application::user_agent::UserAgent;
use crate::config::Config;
use crate::domain::identity::Identity;
use crate::domain::session::SessionState;
use crate::domain::shared::Result;
use crate::infrastructure::engine::{EngineConnector, EngineEvent, EngineEventReceiver};
use crate::infrastructure::telemetry;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How long shutdown waits for the current call to finish terminating
const HANG_UP_GRACE: Duration = Duration::from_secs(5);

pub struct WebPhone {
    agent: UserAgent,
    registerer: Registerer,
    controller: SessionController,
    messenger: Messenger,
    dispatcher: EventDispatcher,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl WebPhone {
    /// Bind the configured account and start the event pump.
    ///
    /// Must be called inside a tokio runtime. Registration starts on its own
    /// when `phone.register_on_connect` is set.
    pub fn connect(config: &Config, connector: &dyn EngineConnector) -> Result<Self> {
        telemetry::describe_metrics();

        let (events_tx, events_rx) = mpsc::channel(config.phone.engine_queue.max(1));
        let dispatcher = EventDispatcher::new(config.phone.event_capacity);

        let agent = UserAgent::bind(
            &config.account.address,
            &config.account.password,
            &config.account.ws_server,
            connector,
            events_tx.clone(),
        )?;
        let registerer = Registerer::new(agent.clone(), dispatcher.clone());
        let controller = SessionController::new(
            agent.engine(),
            agent.identity().domain(),
            dispatcher.clone(),
            events_tx,
        );
        let messenger = Messenger::new(agent.clone(), dispatcher.clone());

        let pump = tokio::spawn(run_event_pump(
            events_rx,
            controller.clone(),
            messenger.clone(),
        ));

        if config.phone.register_on_connect {
            registerer.register();
        }

        info!("WebPhone ready for {}", agent.identity().address());
        Ok(Self {
            agent,
            registerer,
            controller,
            messenger,
            dispatcher,
            pump: Mutex::new(Some(pump)),
        })
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.dispatcher.subscribe()
    }

    pub fn identity(&self) -> &Identity {
        self.agent.identity()
    }

    pub fn agent(&self) -> &UserAgent {
        &self.agent
    }

    pub fn registerer(&self) -> &Registerer {
        &self.registerer
    }

    pub fn sessions(&self) -> &SessionController {
        &self.controller
    }

    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    /// Hang up, unregister and stop the transport.
    ///
    /// The current call is given [`HANG_UP_GRACE`] to reach Terminated before
    /// the transport goes away, so observers still see its final state.
    pub async fn shutdown(&self) {
        if let Some(current) = self.controller.current_session().await {
            let outcome = self.controller.hang_up().await;
            debug!("Shutdown hang-up: {:?}", outcome);

            let ended = timeout(HANG_UP_GRACE, current.wait_for_state(SessionState::Terminated));
            if ended.await.is_err() {
                warn!(
                    "Session {} did not terminate within {:?}",
                    current.id(),
                    HANG_UP_GRACE
                );
            }
        }

        if let Err(e) = self.registerer.unregister().await {
            warn!("Unregister during shutdown failed: {}", e);
        }
        self.agent.stop().await;

        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            pump.abort();
        }
        info!("WebPhone for {} shut down", self.agent.identity().address());
    }
}

async fn run_event_pump(
    mut events: EngineEventReceiver,
    controller: SessionController,
    messenger: Messenger,
) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::Invitation(session) => {
                controller.handle_inbound_invitation(session).await;
            }
            EngineEvent::Message { from, body } => {
                messenger.receive(from, body);
            }
            EngineEvent::SessionStateChanged {
                session_id,
                state,
                reason,
            } => {
                controller.on_state_change(session_id, state, reason).await;
            }
        }
    }

    debug!("Engine event queue closed");
}

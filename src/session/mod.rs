//! Update session: the connection state machine and its handle.
//!
//! [`UpdateSession::spawn`] starts an actor task that owns the session
//! state. The handle sends it commands; state changes and update events
//! come back on channels.
//!
//! # Example
//!
//! ```ignore
//! let session = UpdateSession::spawn(config, store, channel, platform, downloader, applier);
//! let mut events = session.subscribe();
//! session.start().await?;
//! while let Ok(event) = events.recv().await {
//!     if let UpdateEvent::Available(record) = event {
//!         session.retrieve_update(&record).await?;
//!     }
//! }
//! ```

mod command;
pub mod events;
mod machine;
pub mod state;

pub use events::{EventBus, StateTransition, UpdateEvent, EVENT_CAPACITY};
pub use state::SessionState;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::apply::Applier;
use crate::download::Downloader;
use crate::error::{OtaError, OtaResult};
use crate::models::UpdateRecord;
use crate::store::UpdateStore;
use crate::traits::{ControlChannel, Platform};
use command::Command;
use machine::{ActorParts, SessionActor};

/// Placeholder substituted with the device id in the topic template.
pub const DEVICE_ID_PLACEHOLDER: &str = "{deviceId}";

/// Default update topic template.
pub const DEFAULT_TOPIC: &str = "devices/{deviceId}/updates";

const COMMAND_CAPACITY: usize = 16;
const TRANSITION_CAPACITY: usize = 32;

/// Timing and addressing of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Delay between `start()` and the first connection attempt
    pub startup_delay: Duration,
    /// How often to re-check the network while it is down
    pub network_retry_interval: Duration,
    /// Bound on connect and subscribe
    pub connect_timeout: Duration,
    /// Wait after a failed connect or subscribe, or a lost connection
    pub connect_backoff: Duration,
    /// How long a staged update must run before it is confirmed
    pub reconcile_grace: Duration,
    /// Update topic, may contain `{deviceId}`
    pub topic: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            startup_delay: Duration::from_secs(10),
            network_retry_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
            connect_backoff: Duration::from_secs(15),
            reconcile_grace: Duration::from_secs(30),
            topic: DEFAULT_TOPIC.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn with_network_retry_interval(mut self, interval: Duration) -> Self {
        self.network_retry_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_connect_backoff(mut self, backoff: Duration) -> Self {
        self.connect_backoff = backoff;
        self
    }

    pub fn with_reconcile_grace(mut self, grace: Duration) -> Self {
        self.reconcile_grace = grace;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Control channel client id for `device_id`.
    pub fn client_id(&self, device_id: &str) -> String {
        format!("ota-{}", device_id)
    }

    /// Update topic for `device_id`.
    pub fn topic_for(&self, device_id: &str) -> String {
        self.topic.replace(DEVICE_ID_PLACEHOLDER, device_id)
    }
}

/// Handle to a running update session.
///
/// Cheap to clone; all clones drive the same actor. The actor ends on
/// [`stop`](Self::stop) or when every handle is dropped.
#[derive(Clone)]
pub struct UpdateSession {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
    transitions: broadcast::Sender<StateTransition>,
    events: EventBus,
    store: Arc<UpdateStore>,
}

impl UpdateSession {
    /// Spawn the session actor. The session stays `Dead` until [`start`](Self::start).
    pub fn spawn(
        config: SessionConfig,
        store: Arc<UpdateStore>,
        channel: Arc<dyn ControlChannel>,
        platform: Arc<dyn Platform>,
        downloader: Downloader,
        applier: Applier,
    ) -> (Self, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::Dead);
        let (transitions_tx, _) = broadcast::channel(TRANSITION_CAPACITY);
        let events = EventBus::default();

        let actor = SessionActor::new(ActorParts {
            config,
            store: store.clone(),
            channel,
            platform,
            downloader,
            applier,
            commands: commands_rx,
            state_tx,
            transitions: transitions_tx.clone(),
            events: events.clone(),
        });
        let handle = tokio::spawn(actor.run());

        let session = Self {
            commands: commands_tx,
            state: state_rx,
            transitions: transitions_tx,
            events,
            store,
        };
        (session, handle)
    }

    /// Start connecting. Only valid once, from `Dead`.
    pub async fn start(&self) -> OtaResult<()> {
        self.request(|reply| Command::Start { reply }).await
    }

    /// Delete every record and archive. Only valid while `Idle` or `Dead`.
    pub async fn clear_updates(&self) -> OtaResult<()> {
        self.request(|reply| Command::ClearUpdates { reply }).await
    }

    /// Start downloading `record`'s archive. Only valid while `Idle`.
    ///
    /// Returns once the download is accepted; the outcome arrives as
    /// [`UpdateEvent::Retrieved`] or [`UpdateEvent::Failure`].
    pub async fn retrieve_update(&self, record: &UpdateRecord) -> OtaResult<()> {
        let record = record.clone();
        self.request(|reply| Command::Retrieve { record, reply }).await
    }

    /// Start applying `record`. Only valid while `Idle` and once retrieved.
    pub async fn apply_update(&self, record: &UpdateRecord) -> OtaResult<()> {
        let record = record.clone();
        self.request(|reply| Command::Apply { record, reply }).await
    }

    /// Disconnect and end the session. Returns once the actor has stopped.
    pub async fn stop(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Stop { reply }).await.is_ok() {
            let _ = done.await;
        }
    }

    async fn request(
        &self,
        build: impl FnOnce(command::Reply) -> Command,
    ) -> OtaResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| OtaError::SessionClosed)?;
        response.await.map_err(|_| OtaError::SessionClosed)?
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch receiver of the session state.
    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait until the session reaches `target`, or `timeout` elapses.
    ///
    /// Returns whether the state was reached.
    pub async fn wait_for_state(&self, target: SessionState, timeout: Duration) -> bool {
        let mut rx = self.state.clone();
        tokio::time::timeout(timeout, rx.wait_for(|state| *state == target))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }

    /// Known update records, oldest first.
    pub fn records(&self) -> Vec<UpdateRecord> {
        self.store.records()
    }

    /// Receive update events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.events.subscribe()
    }

    /// The session's event bus, for callback-style listeners.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Receive state transitions from now on.
    pub fn transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    /// The store backing this session.
    pub fn store(&self) -> &Arc<UpdateStore> {
        &self.store
    }
}

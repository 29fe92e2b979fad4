//! The session actor.
//!
//! One task owns the [`SessionState`] and runs a poll loop: each iteration
//! looks at the current state and either performs the network step for it
//! (connect, subscribe) or waits for the next input. Inputs are commands
//! from handles, control-channel events and background task outcomes.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use super::command::{Command, Reply, TaskOutcome};
use super::events::{EventBus, StateTransition, UpdateEvent};
use super::{SessionConfig, SessionState};
use crate::apply::{reconcile_pending, Applier, PendingMarker};
use crate::download::Downloader;
use crate::error::{OtaError, OtaResult};
use crate::models::{Announcement, UpdateRecord};
use crate::store::UpdateStore;
use crate::traits::{ChannelError, ChannelEvent, ControlChannel, Platform};

pub(crate) struct SessionActor {
    config: SessionConfig,
    state: SessionState,
    store: Arc<UpdateStore>,
    channel: Arc<dyn ControlChannel>,
    platform: Arc<dyn Platform>,
    downloader: Arc<Downloader>,
    applier: Arc<Applier>,
    staging_dir: PathBuf,

    commands: mpsc::Receiver<Command>,
    channel_events: Option<broadcast::Receiver<ChannelEvent>>,
    task_tx: mpsc::UnboundedSender<TaskOutcome>,
    task_rx: mpsc::UnboundedReceiver<TaskOutcome>,

    state_tx: watch::Sender<SessionState>,
    transitions: broadcast::Sender<StateTransition>,
    events: EventBus,

    started: bool,
    finished: bool,
    /// Do nothing in the current state before this instant
    resume_at: Option<Instant>,
    /// Transport dropped while a task owned the session
    disconnect_pending: bool,
    /// Id named by a staging marker that is still being confirmed
    confirming: Option<String>,
}

pub(crate) struct ActorParts {
    pub config: SessionConfig,
    pub store: Arc<UpdateStore>,
    pub channel: Arc<dyn ControlChannel>,
    pub platform: Arc<dyn Platform>,
    pub downloader: Downloader,
    pub applier: Applier,
    pub commands: mpsc::Receiver<Command>,
    pub state_tx: watch::Sender<SessionState>,
    pub transitions: broadcast::Sender<StateTransition>,
    pub events: EventBus,
}

impl SessionActor {
    pub(crate) fn new(parts: ActorParts) -> Self {
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let channel_events = Some(parts.channel.events());
        let staging_dir = parts.applier.staging_dir().to_path_buf();

        Self {
            config: parts.config,
            state: SessionState::Dead,
            store: parts.store,
            channel: parts.channel,
            platform: parts.platform,
            downloader: Arc::new(parts.downloader),
            applier: Arc::new(parts.applier),
            staging_dir,
            commands: parts.commands,
            channel_events,
            task_tx,
            task_rx,
            state_tx: parts.state_tx,
            transitions: parts.transitions,
            events: parts.events,
            started: false,
            finished: false,
            resume_at: None,
            disconnect_pending: false,
            confirming: None,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("Update session actor started");

        while !self.finished {
            if let Some(at) = self.resume_at {
                if Instant::now() < at {
                    self.wait(Some(at)).await;
                    continue;
                }
                self.resume_at = None;
            }

            match self.state {
                SessionState::Dead => {
                    if self.started {
                        self.set_state(SessionState::Disconnected);
                    } else {
                        self.wait(None).await;
                    }
                }
                SessionState::Disconnected => {
                    if self.platform.is_network_up() {
                        self.set_state(SessionState::Connecting);
                    } else {
                        debug!(
                            "Network is down, checking again in {:?}",
                            self.config.network_retry_interval
                        );
                        self.resume_at = Some(Instant::now() + self.config.network_retry_interval);
                    }
                }
                SessionState::Connecting => self.connect().await,
                SessionState::Connected => self.subscribe().await,
                SessionState::Idle
                | SessionState::DownloadingFile
                | SessionState::UpdateInProgress => self.wait(None).await,
            }
        }

        if self.state != SessionState::Dead {
            self.channel.disconnect().await;
            self.set_state(SessionState::Dead);
        }
        debug!("Update session actor stopped");
    }

    fn set_state(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        debug!("Session state {} -> {}", from, to);
        self.state = to;
        self.state_tx.send_replace(to);
        // No receivers is fine
        let _ = self.transitions.send(StateTransition { from, to });
    }

    /// Go back to `Disconnected` and hold off the next attempt.
    fn back_off(&mut self) {
        self.set_state(SessionState::Disconnected);
        self.resume_at = Some(Instant::now() + self.config.connect_backoff);
    }

    /// Wait for one input or until `deadline`.
    async fn wait(&mut self, deadline: Option<Instant>) {
        tokio::select! {
            command = self.commands.recv() => match command {
                Some(command) => self.handle_command(command).await,
                None => {
                    debug!("All session handles dropped");
                    self.finished = true;
                }
            },
            event = next_channel_event(&mut self.channel_events) => self.handle_channel_event(event),
            Some(outcome) = self.task_rx.recv() => self.handle_outcome(outcome),
            _ = sleep_until_opt(deadline) => {}
        }
    }

    async fn connect(&mut self) {
        let device_id = self.platform.device_id();
        let client_id = self.config.client_id(&device_id);
        info!("Connecting to control channel as {}", client_id);

        match timeout(self.config.connect_timeout, self.channel.connect(&client_id)).await {
            Ok(Ok(())) => {
                info!("Control channel connected");
                self.set_state(SessionState::Connected);
                return;
            }
            Ok(Err(ChannelError::Timeout(msg))) => {
                warn!("Control channel connect timed out: {}", msg);
            }
            Err(_) => {
                warn!(
                    "Control channel connect timed out after {:?}",
                    self.config.connect_timeout
                );
            }
            Ok(Err(ChannelError::Communication(msg))) => {
                warn!("Communication error while connecting: {}", msg);
            }
            Ok(Err(other)) => {
                error!("Unexpected error while connecting: {}", other);
            }
        }

        self.channel.disconnect().await;
        info!(
            "Retrying control channel connection in {:?}",
            self.config.connect_backoff
        );
        self.back_off();
    }

    async fn subscribe(&mut self) {
        let topic = self.config.topic_for(&self.platform.device_id());

        let result = match timeout(self.config.connect_timeout, self.channel.subscribe(&topic)).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout(format!("subscribe to {}", topic))),
        };

        match result {
            Ok(()) => {
                info!("Subscribed to {}", topic);
                self.set_state(SessionState::Idle);
            }
            Err(e) => {
                warn!("Failed to subscribe to {}: {}", topic, e);
                self.channel.disconnect().await;
                self.back_off();
            }
        }
    }

    fn handle_channel_event(
        &mut self,
        event: Result<ChannelEvent, broadcast::error::RecvError>,
    ) {
        match event {
            Ok(ChannelEvent::Message { topic, payload }) => {
                match self.state {
                    SessionState::Idle | SessionState::DownloadingFile => {
                        self.handle_announcement(&payload)
                    }
                    state => debug!("Ignoring message on {} while {}", topic, state),
                }
            }
            Ok(ChannelEvent::Disconnected) => match self.state {
                SessionState::Connected | SessionState::Idle => {
                    warn!("Control channel disconnected");
                    self.back_off();
                }
                SessionState::DownloadingFile | SessionState::UpdateInProgress => {
                    warn!("Control channel disconnected, reconnecting after the running task");
                    self.disconnect_pending = true;
                }
                _ => {}
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Dropped {} control channel events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                warn!("Control channel event stream closed");
                self.channel_events = None;
            }
        }
    }

    fn handle_announcement(&mut self, payload: &str) {
        let announcement = match Announcement::parse(payload) {
            Ok(announcement) => announcement,
            Err(e) => {
                warn!("Discarding announcement: {}", e);
                return;
            }
        };

        match self.store.get(&announcement.id) {
            None => match self.store.add(announcement.into_record()) {
                Ok(record) => {
                    info!("Update '{}' ({}) available", record.id, record.version);
                    self.events.publish(UpdateEvent::Available(record));
                }
                Err(e) => error!("Failed to record announcement: {}", e),
            },
            Some(record) if !record.retrieved => {
                debug!("Update '{}' announced again", record.id);
                self.events.publish(UpdateEvent::Available(record));
            }
            Some(record) => {
                debug!("Update '{}' already retrieved, ignoring", record.id);
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { reply } => {
                let result = self.start();
                let _ = reply.send(result);
            }
            Command::ClearUpdates { reply } => {
                let result = match self.state {
                    SessionState::Idle | SessionState::Dead => self.store.clear(),
                    state => Err(OtaError::InvalidState {
                        operation: "clear updates",
                        state,
                    }),
                };
                let _ = reply.send(result);
            }
            Command::Retrieve { record, reply } => self.retrieve(record, reply),
            Command::Apply { record, reply } => self.apply(record, reply),
            Command::Stop { reply } => {
                info!("Stopping update session");
                self.channel.disconnect().await;
                self.set_state(SessionState::Dead);
                self.finished = true;
                let _ = reply.send(());
            }
        }
    }

    fn start(&mut self) -> OtaResult<()> {
        if self.state != SessionState::Dead || self.started {
            return Err(OtaError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }

        self.started = true;
        self.resume_at = Some(Instant::now() + self.config.startup_delay);
        info!(
            "Update session starting in {:?}",
            self.config.startup_delay
        );

        if PendingMarker::path(&self.staging_dir).exists() {
            let id = PendingMarker::load(&self.staging_dir)
                .map(|marker| marker.id)
                .unwrap_or_else(|| "<unreadable>".to_string());
            debug!("Holding back apply until '{}' is confirmed", id);
            self.confirming = Some(id);
        }

        let store = self.store.clone();
        let staging = self.staging_dir.clone();
        let grace = self.config.reconcile_grace;
        let tx = self.task_tx.clone();
        tokio::spawn(async move {
            let result = reconcile_pending(&store, &staging, grace).await;
            let _ = tx.send(TaskOutcome::Reconciled(result));
        });
        Ok(())
    }

    fn retrieve(&mut self, record: UpdateRecord, reply: Reply) {
        if self.state != SessionState::Idle {
            let _ = reply.send(Err(OtaError::InvalidState {
                operation: "retrieve update",
                state: self.state,
            }));
            return;
        }
        let Some(record) = self.store.get(&record.id) else {
            let _ = reply.send(Err(OtaError::NotFound { id: record.id }));
            return;
        };

        self.set_state(SessionState::DownloadingFile);
        let _ = reply.send(Ok(()));

        let downloader = self.downloader.clone();
        let tx = self.task_tx.clone();
        tokio::spawn(async move {
            let result = downloader.retrieve(&record).await;
            let _ = tx.send(TaskOutcome::Retrieved { record, result });
        });
    }

    fn apply(&mut self, record: UpdateRecord, reply: Reply) {
        if self.state != SessionState::Idle {
            let _ = reply.send(Err(OtaError::InvalidState {
                operation: "apply update",
                state: self.state,
            }));
            return;
        }
        if let Some(id) = &self.confirming {
            let _ = reply.send(Err(OtaError::ConfirmationPending {
                operation: "apply update",
                id: id.clone(),
            }));
            return;
        }
        let Some(record) = self.store.get(&record.id).filter(|r| r.retrieved) else {
            let _ = reply.send(Err(OtaError::NotFound { id: record.id }));
            return;
        };
        if let Err(e) = self.store.archive_path(&record.id) {
            let _ = reply.send(Err(e));
            return;
        }

        self.set_state(SessionState::UpdateInProgress);
        let _ = reply.send(Ok(()));

        let applier = self.applier.clone();
        let tx = self.task_tx.clone();
        tokio::spawn(async move {
            let result = applier.apply(&record).await;
            let _ = tx.send(TaskOutcome::Applied { record, result });
        });
    }

    fn handle_outcome(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Retrieved { record, result } => {
                match result {
                    Ok(updated) => {
                        info!("Update '{}' retrieved", updated.id);
                        self.events.publish(UpdateEvent::Retrieved(updated));
                    }
                    Err(e) => self.publish_failure(record, &e),
                }
                self.finish_task();
            }
            TaskOutcome::Applied { record, result } => match result {
                Ok(()) => {
                    info!("Update '{}' handed to device reset", record.id);
                }
                Err(e @ OtaError::ResetFailed { .. }) => {
                    // The application is already shut down; nothing to go back to.
                    self.publish_failure(record, &e);
                }
                Err(e) => {
                    self.publish_failure(record, &e);
                    self.finish_task();
                }
            },
            TaskOutcome::Reconciled(result) => {
                self.confirming = None;
                match result {
                    Ok(Some(record)) => {
                        info!("Update '{}' applied", record.id);
                        self.events.publish(UpdateEvent::Success(record));
                    }
                    Ok(None) => {}
                    Err(e) => error!("Failed to confirm pending update: {}", e),
                }
            }
        }
    }

    fn publish_failure(&self, record: UpdateRecord, error: &OtaError) {
        warn!(
            "Update '{}' failed [{}]: {}",
            record.id,
            error.error_code(),
            error
        );
        self.events.publish(UpdateEvent::Failure {
            record,
            reason: error.to_string(),
        });
    }

    /// Leave a task state once its task is done.
    fn finish_task(&mut self) {
        if !self.state.is_busy() {
            return;
        }
        if std::mem::take(&mut self.disconnect_pending) {
            self.back_off();
        } else {
            self.set_state(SessionState::Idle);
        }
    }
}

async fn next_channel_event(
    rx: &mut Option<broadcast::Receiver<ChannelEvent>>,
) -> Result<ChannelEvent, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

//! Events raised to the owning application.
//!
//! Events go out on a `tokio::sync::broadcast` channel. Every subscriber
//! owns its receiver and sees events in publish order; a subscriber that
//! falls behind loses the oldest events without holding up the others.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use super::SessionState;
use crate::models::UpdateRecord;

/// Default number of events buffered per subscriber.
pub const EVENT_CAPACITY: usize = 64;

/// Update lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UpdateEvent {
    /// A new or not yet retrieved update was announced
    Available(UpdateRecord),
    /// The archive was downloaded and verified
    Retrieved(UpdateRecord),
    /// A staged update was confirmed after restart
    Success(UpdateRecord),
    /// Retrieving or applying an update failed
    Failure { record: UpdateRecord, reason: String },
}

impl UpdateEvent {
    /// The record the event is about.
    pub fn record(&self) -> &UpdateRecord {
        match self {
            UpdateEvent::Available(record)
            | UpdateEvent::Retrieved(record)
            | UpdateEvent::Success(record)
            | UpdateEvent::Failure { record, .. } => record,
        }
    }

    /// Short event name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateEvent::Available(_) => "UpdateAvailable",
            UpdateEvent::Retrieved(_) => "UpdateRetrieved",
            UpdateEvent::Success(_) => "UpdateSuccess",
            UpdateEvent::Failure { .. } => "UpdateFailure",
        }
    }
}

/// A change of session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: SessionState,
    pub to: SessionState,
}

/// Multicast of [`UpdateEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UpdateEvent>,
}

impl EventBus {
    /// Create a bus buffering `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver an event to every current subscriber.
    ///
    /// Returns the number of subscribers reached; zero is not an error.
    pub fn publish(&self, event: UpdateEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Receive events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Run `handler` for every event on its own task.
    ///
    /// A panic inside the handler is logged and the listener keeps going.
    /// The task ends when the bus is dropped.
    pub fn add_listener<F>(&self, name: &str, handler: F) -> JoinHandle<()>
    where
        F: Fn(&UpdateEvent) + Send + 'static,
    {
        let mut rx = self.subscribe();
        let name = name.to_string();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                            error!("Event listener '{}' panicked on {}", name, event.kind());
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event listener '{}' skipped {} events", name, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

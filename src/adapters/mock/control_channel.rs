//! Mock control channel for testing.
//!
//! Lets tests script connect/subscribe outcomes, inject published messages
//! and simulate connection loss.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::traits::{ChannelError, ChannelEvent, ControlChannel};

#[derive(Debug, Default)]
struct Inner {
    connect_results: VecDeque<Result<(), ChannelError>>,
    subscribe_results: VecDeque<Result<(), ChannelError>>,
    connect_delay: Option<Duration>,
    client_ids: Vec<String>,
    subscriptions: Vec<String>,
    disconnects: usize,
    connected: bool,
}

/// Mock control channel for testing.
///
/// Connect and subscribe succeed unless a failure was queued with
/// [`push_connect_result`](Self::push_connect_result) or
/// [`push_subscribe_result`](Self::push_subscribe_result). Clones share state.
///
/// # Example
///
/// ```ignore
/// use ota_agent::adapters::mock::MockControlChannel;
///
/// let channel = MockControlChannel::new();
/// channel.push_connect_result(Err(ChannelError::Timeout("connect".into())));
/// // ... run the session, then
/// channel.inject_message("devices/d1/updates", r#"{"id":"u1","mpakDownloadUrl":"http://x"}"#);
/// ```
#[derive(Debug, Clone)]
pub struct MockControlChannel {
    events_tx: broadcast::Sender<ChannelEvent>,
    inner: Arc<Mutex<Inner>>,
}

impl MockControlChannel {
    /// Create a mock channel whose operations all succeed.
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(100);
        Self {
            events_tx,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Queue the outcome of the next `connect` call.
    pub fn push_connect_result(&self, result: Result<(), ChannelError>) {
        self.inner.lock().unwrap().connect_results.push_back(result);
    }

    /// Queue the outcome of the next `subscribe` call.
    pub fn push_subscribe_result(&self, result: Result<(), ChannelError>) {
        self.inner
            .lock()
            .unwrap()
            .subscribe_results
            .push_back(result);
    }

    /// Make every `connect` call take this long before answering.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().connect_delay = Some(delay);
    }

    /// Deliver a published message to every receiver.
    pub fn inject_message(&self, topic: &str, payload: &str) {
        // Ignore send errors (no subscribers)
        let _ = self.events_tx.send(ChannelEvent::Message {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
    }

    /// Simulate the transport dropping the connection.
    pub fn inject_disconnect(&self) {
        self.inner.lock().unwrap().connected = false;
        let _ = self.events_tx.send(ChannelEvent::Disconnected);
    }

    /// Client ids passed to `connect`, in call order.
    pub fn client_ids(&self) -> Vec<String> {
        self.inner.lock().unwrap().client_ids.clone()
    }

    /// Number of `connect` calls.
    pub fn connect_calls(&self) -> usize {
        self.inner.lock().unwrap().client_ids.len()
    }

    /// Topics passed to `subscribe`, in call order.
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.lock().unwrap().subscriptions.clone()
    }

    /// Number of `disconnect` calls.
    pub fn disconnect_calls(&self) -> usize {
        self.inner.lock().unwrap().disconnects
    }

    /// Whether the last connect succeeded and no disconnect happened since.
    pub fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    /// Get the number of event receivers.
    pub fn subscriber_count(&self) -> usize {
        self.events_tx.receiver_count()
    }
}

impl Default for MockControlChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlChannel for MockControlChannel {
    async fn connect(&self, client_id: &str) -> Result<(), ChannelError> {
        let (delay, result) = {
            let mut inner = self.inner.lock().unwrap();
            inner.client_ids.push(client_id.to_string());
            (
                inner.connect_delay,
                inner.connect_results.pop_front().unwrap_or(Ok(())),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.inner.lock().unwrap().connected = result.is_ok();
        result
    }

    async fn subscribe(&self, topic: &str) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.connected {
            return Err(ChannelError::NotConnected);
        }
        inner.subscriptions.push(topic.to_string());
        inner.subscribe_results.pop_front().unwrap_or(Ok(()))
    }

    async fn disconnect(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.disconnects += 1;
        inner.connected = false;
    }

    fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events_tx.subscribe()
    }
}

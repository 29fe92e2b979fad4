//! Control channel trait abstraction.
//!
//! The control channel is the long-lived publish/subscribe connection to
//! the fleet backend. The session only connects, subscribes to one topic
//! and listens; inbound traffic and connection loss arrive as
//! [`ChannelEvent`]s on a broadcast receiver.

use async_trait::async_trait;
use tokio::sync::broadcast;

/// Control channel errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelError {
    /// The broker did not answer in time
    Timeout(String),
    /// Transport-level failure (refused, reset, TLS)
    Communication(String),
    /// The broker refused the request (bad client id, topic not allowed)
    Rejected(String),
    /// Not connected
    NotConnected,
    /// Other error
    Other(String),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::Timeout(msg) => write!(f, "Timed out: {}", msg),
            ChannelError::Communication(msg) => write!(f, "Communication error: {}", msg),
            ChannelError::Rejected(msg) => write!(f, "Rejected by broker: {}", msg),
            ChannelError::NotConnected => write!(f, "Not connected"),
            ChannelError::Other(msg) => write!(f, "Channel error: {}", msg),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Event delivered by the control channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A message was published on a subscribed topic.
    Message { topic: String, payload: String },
    /// The transport lost its connection. Subscriptions are gone.
    Disconnected,
}

/// Trait for the publish/subscribe control channel.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Open a session to the broker under `client_id`.
    async fn connect(&self, client_id: &str) -> Result<(), ChannelError>;

    /// Subscribe to `topic` on the current session.
    async fn subscribe(&self, topic: &str) -> Result<(), ChannelError>;

    /// Close the session. Safe to call when not connected.
    async fn disconnect(&self);

    /// Receiver for inbound messages and connection-loss notifications.
    ///
    /// Each call returns an independent receiver.
    fn events(&self) -> broadcast::Receiver<ChannelEvent>;
}

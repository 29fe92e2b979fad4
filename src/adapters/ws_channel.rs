//! WebSocket control channel adapter.
//!
//! Speaks a small JSON framing over tokio-tungstenite:
//!
//! - client: `{"type":"subscribe","topic":"..."}`
//! - broker: `{"type":"subscribed","topic":"..."}`,
//!   `{"type":"publish","topic":"...","payload":...}` and
//!   `{"type":"error","topic":"...","message":"..."}`
//!
//! The client id travels as the `clientId` query parameter of the connect
//! URL. Reconnecting is left to the session, which sees connection loss as
//! [`ChannelEvent::Disconnected`].

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::traits::{ChannelError, ChannelEvent, ControlChannel};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, Message>;
type WsSource = futures_util::stream::SplitStream<WsStream>;

/// Default bound on waiting for a subscription acknowledgement.
pub const DEFAULT_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_CAPACITY: usize = 100;
const OUTGOING_CAPACITY: usize = 16;

/// Frames sent to the broker.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame<'a> {
    Subscribe { topic: &'a str },
}

/// Frames received from the broker.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum BrokerFrame {
    Subscribed {
        topic: String,
    },
    Publish {
        topic: String,
        #[serde(default)]
        payload: Value,
    },
    Error {
        #[serde(default)]
        topic: Option<String>,
        message: String,
    },
    #[serde(other)]
    Unknown,
}

/// Broker answer to a subscribe request.
#[derive(Debug, Clone)]
struct SubscribeAck {
    topic: String,
    error: Option<String>,
}

struct Connection {
    outgoing: mpsc::Sender<String>,
    acks: broadcast::Sender<SubscribeAck>,
}

/// Control channel over a WebSocket connection to the fleet broker.
///
/// # Example
///
/// ```ignore
/// use ota_agent::adapters::WsControlChannel;
/// use ota_agent::traits::ControlChannel;
///
/// let channel = WsControlChannel::new("wss://broker.example.com/ws");
/// channel.connect("ota-device-1").await?;
/// channel.subscribe("devices/device-1/updates").await?;
/// let mut events = channel.events();
/// ```
pub struct WsControlChannel {
    broker_url: String,
    subscribe_timeout: Duration,
    events_tx: broadcast::Sender<ChannelEvent>,
    connection: Mutex<Option<Connection>>,
}

impl WsControlChannel {
    /// Create a channel for the broker at `broker_url` (`ws://` or `wss://`).
    pub fn new(broker_url: impl Into<String>) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            broker_url: broker_url.into(),
            subscribe_timeout: DEFAULT_SUBSCRIBE_TIMEOUT,
            events_tx,
            connection: Mutex::new(None),
        }
    }

    /// Set how long `subscribe` waits for the broker's acknowledgement.
    pub fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    /// Connect URL for `client_id`.
    pub fn connect_url(&self, client_id: &str) -> String {
        let separator = if self.broker_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}clientId={}",
            self.broker_url,
            separator,
            urlencoding::encode(client_id)
        )
    }

    fn convert_error(err: tungstenite::Error) -> ChannelError {
        match err {
            tungstenite::Error::Io(e) => ChannelError::Communication(e.to_string()),
            tungstenite::Error::Http(response) => {
                ChannelError::Rejected(format!("HTTP {}", response.status()))
            }
            tungstenite::Error::Url(e) => ChannelError::Other(e.to_string()),
            other => ChannelError::Communication(other.to_string()),
        }
    }
}

#[async_trait]
impl ControlChannel for WsControlChannel {
    async fn connect(&self, client_id: &str) -> Result<(), ChannelError> {
        let mut connection = self.connection.lock().await;
        // Dropping the old sender ends its connection loop quietly
        connection.take();

        let url = self.connect_url(client_id);
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(Self::convert_error)?;
        info!("Connected to broker at {}", self.broker_url);

        let (sink, source) = ws.split();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_CAPACITY);
        let (acks_tx, _) = broadcast::channel(EVENT_CAPACITY);

        tokio::spawn(run_connection_loop(
            sink,
            source,
            outgoing_rx,
            acks_tx.clone(),
            self.events_tx.clone(),
        ));

        *connection = Some(Connection {
            outgoing: outgoing_tx,
            acks: acks_tx,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), ChannelError> {
        let (outgoing, mut acks) = {
            let connection = self.connection.lock().await;
            let conn = connection.as_ref().ok_or(ChannelError::NotConnected)?;
            (conn.outgoing.clone(), conn.acks.subscribe())
        };

        let frame = serde_json::to_string(&ClientFrame::Subscribe { topic })
            .map_err(|e| ChannelError::Other(e.to_string()))?;
        outgoing
            .send(frame)
            .await
            .map_err(|_| ChannelError::NotConnected)?;

        let wait = async {
            loop {
                match acks.recv().await {
                    Ok(ack) if ack.topic == topic => return Ok(ack),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(ChannelError::NotConnected)
                    }
                }
            }
        };

        match tokio::time::timeout(self.subscribe_timeout, wait).await {
            Ok(Ok(SubscribeAck { error: None, .. })) => Ok(()),
            Ok(Ok(SubscribeAck {
                error: Some(message),
                ..
            })) => Err(ChannelError::Rejected(message)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ChannelError::Timeout(format!(
                "no acknowledgement for '{}' within {:?}",
                topic, self.subscribe_timeout
            ))),
        }
    }

    async fn disconnect(&self) {
        if self.connection.lock().await.take().is_some() {
            debug!("Closing broker connection");
        }
    }

    fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events_tx.subscribe()
    }
}

/// Pump frames until the broker goes away or the channel is disconnected.
///
/// Only transport loss emits [`ChannelEvent::Disconnected`]; a local
/// disconnect (the outgoing sender dropped) closes quietly.
async fn run_connection_loop(
    mut sink: WsSink,
    mut source: WsSource,
    mut outgoing: mpsc::Receiver<String>,
    acks: broadcast::Sender<SubscribeAck>,
    events: broadcast::Sender<ChannelEvent>,
) {
    loop {
        tokio::select! {
            msg = source.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_frame(&text, &acks, &events),
                    Some(Ok(Message::Ping(data))) => {
                        debug!("Received ping, sending pong");
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Broker closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary, Pong and raw frames carry nothing for us
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!("WebSocket stream ended");
                        break;
                    }
                }
            }
            frame = outgoing.recv() => {
                match frame {
                    Some(json) => {
                        debug!("Sending frame: {}", json);
                        if let Err(e) = sink.send(Message::Text(json)).await {
                            error!("Failed to send frame: {}", e);
                            break;
                        }
                    }
                    None => {
                        let _ = sink.close().await;
                        debug!("Connection loop closed locally");
                        return;
                    }
                }
            }
        }
    }

    let _ = events.send(ChannelEvent::Disconnected);
}

fn handle_frame(
    text: &str,
    acks: &broadcast::Sender<SubscribeAck>,
    events: &broadcast::Sender<ChannelEvent>,
) {
    match serde_json::from_str::<BrokerFrame>(text) {
        Ok(BrokerFrame::Subscribed { topic }) => {
            let _ = acks.send(SubscribeAck { topic, error: None });
        }
        Ok(BrokerFrame::Publish { topic, payload }) => {
            let payload = match payload {
                Value::String(s) => s,
                other => other.to_string(),
            };
            let _ = events.send(ChannelEvent::Message { topic, payload });
        }
        Ok(BrokerFrame::Error { topic, message }) => {
            warn!("Broker error: {}", message);
            if let Some(topic) = topic {
                let _ = acks.send(SubscribeAck {
                    topic,
                    error: Some(message),
                });
            }
        }
        Ok(BrokerFrame::Unknown) => debug!("Ignoring unknown frame: {}", text),
        Err(e) => warn!("Failed to parse frame: {} - {}", e, text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accept one connection and hand it to `script`.
    async fn broker<F, Fut>(script: F) -> String
    where
        F: FnOnce(WebSocketStream<tokio::net::TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            script(ws).await;
        });
        format!("ws://{}/ws", addr)
    }

    async fn next_text(ws: &mut WebSocketStream<tokio::net::TcpStream>) -> Value {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_connect_url_encodes_client_id() {
        let channel = WsControlChannel::new("ws://broker/ws");
        assert_eq!(channel.connect_url("ota-a b"), "ws://broker/ws?clientId=ota-a%20b");

        let channel = WsControlChannel::new("ws://broker/ws?fleet=1");
        assert_eq!(channel.connect_url("ota-x"), "ws://broker/ws?fleet=1&clientId=ota-x");
    }

    #[test]
    fn test_broker_frame_parsing() {
        let frame: BrokerFrame =
            serde_json::from_str(r#"{"type":"publish","topic":"t","payload":{"id":"u1"}}"#).unwrap();
        assert!(matches!(frame, BrokerFrame::Publish { .. }));
        let frame: BrokerFrame = serde_json::from_str(r#"{"type":"hello"}"#).unwrap();
        assert!(matches!(frame, BrokerFrame::Unknown));
    }

    #[tokio::test]
    async fn test_subscribe_and_receive() {
        let url = broker(|mut ws| async move {
            let request = next_text(&mut ws).await;
            assert_eq!(request["type"], "subscribe");
            let topic = request["topic"].as_str().unwrap().to_string();
            let ack = serde_json::json!({"type": "subscribed", "topic": topic});
            ws.send(Message::Text(ack.to_string())).await.unwrap();
            let publish = serde_json::json!({
                "type": "publish",
                "topic": topic,
                "payload": {"id": "u1", "mpakDownloadUrl": "http://x"}
            });
            ws.send(Message::Text(publish.to_string())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let channel = WsControlChannel::new(url);
        let mut events = channel.events();
        channel.connect("ota-dev").await.unwrap();
        channel.subscribe("devices/dev/updates").await.unwrap();

        match events.recv().await.unwrap() {
            ChannelEvent::Message { topic, payload } => {
                assert_eq!(topic, "devices/dev/updates");
                let value: Value = serde_json::from_str(&payload).unwrap();
                assert_eq!(value["id"], "u1");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(events.recv().await.unwrap(), ChannelEvent::Disconnected);
    }

    #[tokio::test]
    async fn test_subscribe_rejected() {
        let url = broker(|mut ws| async move {
            let request = next_text(&mut ws).await;
            let error = serde_json::json!({
                "type": "error",
                "topic": request["topic"],
                "message": "topic not allowed"
            });
            ws.send(Message::Text(error.to_string())).await.unwrap();
            let _ = ws.next().await;
        })
        .await;

        let channel = WsControlChannel::new(url);
        channel.connect("ota-dev").await.unwrap();
        assert_eq!(
            channel.subscribe("other/updates").await,
            Err(ChannelError::Rejected("topic not allowed".to_string()))
        );
    }

    #[tokio::test]
    async fn test_subscribe_times_out() {
        let url = broker(|mut ws| async move {
            let _ = next_text(&mut ws).await;
            tokio::time::sleep(Duration::from_secs(2)).await;
        })
        .await;

        let channel = WsControlChannel::new(url).with_subscribe_timeout(Duration::from_millis(100));
        channel.connect("ota-dev").await.unwrap();
        assert!(matches!(
            channel.subscribe("devices/dev/updates").await,
            Err(ChannelError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_subscribe_requires_connection() {
        let channel = WsControlChannel::new("ws://127.0.0.1:1/ws");
        assert_eq!(
            channel.subscribe("t").await,
            Err(ChannelError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let channel = WsControlChannel::new("ws://127.0.0.1:59999/ws");
        assert!(matches!(
            channel.connect("ota-dev").await,
            Err(ChannelError::Communication(_))
        ));
    }

    #[tokio::test]
    async fn test_local_disconnect_is_quiet() {
        let url = broker(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let channel = WsControlChannel::new(url);
        let mut events = channel.events();
        channel.connect("ota-dev").await.unwrap();
        channel.disconnect().await;

        let result = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
        assert!(result.is_err());
    }
}

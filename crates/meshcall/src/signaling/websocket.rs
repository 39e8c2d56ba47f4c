//! WebSocket signaling client

use super::protocol::SignalMessage;
use super::transport::{SignalingTransport, SubscriberRegistry, Subscription};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// JSON-over-WebSocket signaling client
pub struct WsSignalingClient {
    /// Signaling server URL
    url: String,

    /// Outgoing message sender
    tx: mpsc::UnboundedSender<Message>,

    /// Inbound subscribers
    registry: Arc<SubscriberRegistry>,

    /// Cleared when either background task stops
    connected: Arc<AtomicBool>,
}

impl WsSignalingClient {
    /// Connect to the signaling server
    ///
    /// Establishes the WebSocket connection and starts background tasks for
    /// sending and receiving messages.
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to signaling server: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::Transport(format!("Failed to connect to {}: {}", url, e)))?;

        info!("Connected to signaling server");

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = SubscriberRegistry::new();
        let connected = Arc::new(AtomicBool::new(true));

        tokio::spawn(Self::sender_task(write, rx, Arc::clone(&connected)));
        tokio::spawn(Self::receiver_task(
            read,
            Arc::clone(&registry),
            Arc::clone(&connected),
        ));

        Ok(Self {
            url: url.to_string(),
            tx,
            registry,
            connected,
        })
    }

    /// Signaling server URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether both background tasks are still running
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Ask the server to close the WebSocket
    pub fn close(&self) -> Result<()> {
        self.tx
            .send(Message::Close(None))
            .map_err(|e| Error::Transport(format!("Failed to send close frame: {}", e)))
    }

    /// Sender task: sends messages from channel to WebSocket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
        connected: Arc<AtomicBool>,
    ) {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
            if closing {
                break;
            }
        }

        connected.store(false, Ordering::Release);
        debug!("Sender task terminated");
    }

    /// Receiver task: decodes frames and dispatches them to subscribers
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        registry: Arc<SubscriberRegistry>,
        connected: Arc<AtomicBool>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match SignalMessage::from_json(&text) {
                    Ok(message) => {
                        debug!(event = message.event_name(), "Received signaling message");
                        registry.dispatch(&message);
                    }
                    Err(e) => warn!("Skipping signaling frame: {}", e),
                },
                Ok(Message::Close(_)) => {
                    info!("WebSocket connection closed");
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        connected.store(false, Ordering::Release);
        let ended = registry.close();
        debug!(subscribers = ended, "Receiver task terminated");
    }
}

#[async_trait]
impl SignalingTransport for WsSignalingClient {
    async fn send(&self, message: SignalMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Transport(format!(
                "Signaling connection to {} is closed",
                self.url
            )));
        }

        let json = message.to_json()?;
        debug!(event = message.event_name(), "Sending signaling message");

        self.tx
            .send(Message::Text(json))
            .map_err(|e| Error::Transport(format!("Failed to send message: {}", e)))
    }

    fn subscribe(&self) -> Subscription {
        self.registry.subscribe()
    }
}

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::NodeConfig;

/// Frames the node sends over the realtime channel. The server expects the
/// auth frame first on every (re)connect.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Auth { token: String },
}

/// Server-pushed messages, tagged by `type`. Unrecognized types are accepted
/// and ignored; malformed frames are dropped without disturbing the channel.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    AuthAck,
    BandwidthUpdate(Value),
    NodeConfig(Value),
    Unknown(Value),
}

impl InboundMessage {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(raw)?;
        Ok(match value.get("type").and_then(Value::as_str) {
            Some("auth_ack") => InboundMessage::AuthAck,
            Some("bandwidth_update") => InboundMessage::BandwidthUpdate(value),
            Some("node_config") => InboundMessage::NodeConfig(value),
            _ => InboundMessage::Unknown(value),
        })
    }
}

/// Extension point for reacting to server pushes. The default handler only
/// logs, matching what the extension does with these messages.
pub trait MessageHandler: Send + Sync {
    fn on_auth_ack(&self);
    fn on_bandwidth_update(&self, data: &Value);
    fn on_node_config(&self, data: &Value);
}

pub struct LoggingHandler;

impl MessageHandler for LoggingHandler {
    fn on_auth_ack(&self) {
        info!(target: "realtime", "channel authenticated");
    }

    fn on_bandwidth_update(&self, data: &Value) {
        info!(target: "realtime", %data, "bandwidth update");
    }

    fn on_node_config(&self, data: &Value) {
        info!(target: "realtime", %data, "node config update");
    }
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("frame encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Persistent duplex connection to the service. Reconnects unconditionally
/// after a fixed delay on any close or error; an explicit loop rather than
/// the extension's recursive close handler, so shutdown is expressible.
pub struct ChannelManager {
    channel_url: Url,
    token: String,
    reconnect_delay: Duration,
    handler: Arc<dyn MessageHandler>,
    shutdown: watch::Receiver<bool>,
}

impl ChannelManager {
    pub fn new(config: &NodeConfig, shutdown: watch::Receiver<bool>) -> Self {
        Self::with_handler(config, Arc::new(LoggingHandler), shutdown)
    }

    pub fn with_handler(
        config: &NodeConfig,
        handler: Arc<dyn MessageHandler>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            channel_url: config.channel_url.clone(),
            token: config.token.clone(),
            reconnect_delay: config.reconnect_delay,
            handler,
            shutdown,
        }
    }

    /// Runs until shutdown is signalled. The retry loop never gives up on
    /// its own: every disconnect or connect failure is followed by the fixed
    /// reconnect delay and a fresh attempt.
    pub async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            match self.connect_and_listen().await {
                Ok(()) => info!(target: "realtime", "channel closed"),
                Err(err) => warn!(target: "realtime", error = %err, "channel error"),
            }
            if *self.shutdown.borrow() {
                break;
            }
            debug!(target: "realtime", delay = ?self.reconnect_delay, "reconnecting");
            if !self.sleep_cancellable(self.reconnect_delay).await {
                break;
            }
        }
        info!(target: "realtime", "channel manager stopped");
    }

    async fn connect_and_listen(&mut self) -> Result<(), ChannelError> {
        let (ws_stream, _) = connect_async(self.channel_url.as_str()).await?;
        info!(target: "realtime", url = %self.channel_url, "channel connected");
        let (mut write, mut read) = ws_stream.split();

        let auth = serde_json::to_string(&OutboundFrame::Auth {
            token: self.token.clone(),
        })?;
        write.send(Message::Text(auth)).await?;

        loop {
            let message = tokio::select! {
                message = read.next() => match message {
                    Some(message) => message?,
                    None => return Ok(()),
                },
                _ = self.shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            };
            match message {
                Message::Text(text) => self.dispatch(&text),
                Message::Binary(data) => {
                    if let Ok(text) = String::from_utf8(data) {
                        self.dispatch(&text);
                    }
                }
                Message::Close(_) => return Ok(()),
                _ => {}
            }
        }
    }

    fn dispatch(&self, raw: &str) {
        match InboundMessage::parse(raw) {
            Ok(InboundMessage::AuthAck) => self.handler.on_auth_ack(),
            Ok(InboundMessage::BandwidthUpdate(data)) => self.handler.on_bandwidth_update(&data),
            Ok(InboundMessage::NodeConfig(data)) => self.handler.on_node_config(&data),
            Ok(InboundMessage::Unknown(value)) => {
                debug!(target: "realtime", %value, "ignoring unrecognized message type");
            }
            Err(err) => {
                warn!(target: "realtime", error = %err, raw, "non-json channel message");
            }
        }
    }

    async fn sleep_cancellable(&mut self, duration: Duration) -> bool {
        if *self.shutdown.borrow() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.shutdown.changed() => false,
        }
    }
}

//! LN Markets WebSocket price stream
//!
//! JSON-RPC over WebSocket. After `subscribe`, messages whose `method` is the
//! subscribed channel carry `result: {price, time}` and are handed to the
//! registered tick handler. A session task owns the socket and the list of
//! subscribed channels, and keeps the connection alive with pings.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use super::{PriceStream, TickHandler};
use crate::config::ExchangeConfig;
use crate::types::PriceTick;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const BASE_BACKOFF_SECS: f64 = 1.0;
const BACKOFF_JITTER_RATIO: f64 = 0.20;

#[derive(Debug, Deserialize)]
struct RpcMessage {
    #[serde(default)]
    method: String,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

/// Extract a tick from a frame published on `channel`
pub(crate) fn parse_tick(text: &str, channel: &str) -> Option<PriceTick> {
    let msg: RpcMessage = serde_json::from_str(text).ok()?;
    if msg.method != channel {
        return None;
    }
    let tick: PriceTick = serde_json::from_value(msg.result?).ok()?;
    (tick.price.is_finite() && tick.price > 0.0).then_some(tick)
}

/// JSON-RPC subscribe request for `channel`
pub(crate) fn subscribe_message(channel: &str, unix_secs: i64) -> String {
    json!({
        "jsonrpc": "2.0",
        "method": "subscribe",
        "id": format!("sub_{}", unix_secs),
        "params": { "event": channel },
    })
    .to_string()
}

/// Exponential delay (1s base, capped) with +/-20% jitter
pub(crate) fn backoff_with_jitter(attempt: u32, max_secs: u64) -> Duration {
    let max = (max_secs as f64).max(BASE_BACKOFF_SECS);
    let capped = (BASE_BACKOFF_SECS * 2f64.powi(attempt.min(16) as i32)).min(max);
    let jitter = rand::thread_rng().gen_range(-BACKOFF_JITTER_RATIO..=BACKOFF_JITTER_RATIO);
    Duration::from_secs_f64((capped * (1.0 + jitter)).clamp(BASE_BACKOFF_SECS, max))
}

type SharedHandler = Arc<Mutex<Option<TickHandler>>>;

/// Open a WebSocket, giving up when the handshake outlasts `limit`
async fn open(url: &str, limit: Duration) -> Result<WsStream> {
    let (ws, _) = tokio::time::timeout(limit, connect_async(url))
        .await
        .map_err(|_| anyhow::anyhow!("WebSocket handshake with {} timed out after {:?}", url, limit))?
        .with_context(|| format!("Failed to connect to {}", url))?;
    Ok(ws)
}

/// Price stream for one LN Markets connection
pub struct LnMarketsPriceStream {
    url: String,
    connect_timeout: Duration,
    heartbeat: Duration,
    reconnect: bool,
    max_backoff_secs: u64,
    handler: SharedHandler,
    /// Channels to subscribe, handed to the session
    subscribe_tx: Option<mpsc::UnboundedSender<String>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    session: Option<JoinHandle<()>>,
}

impl LnMarketsPriceStream {
    pub fn new(url: &str, config: &ExchangeConfig) -> Self {
        Self {
            url: url.to_string(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms.max(1)),
            heartbeat: Duration::from_secs(config.heartbeat_secs.max(1)),
            reconnect: config.reconnect,
            max_backoff_secs: config.reconnect_max_backoff_secs,
            handler: Arc::new(Mutex::new(None)),
            subscribe_tx: None,
            shutdown_tx: None,
            session: None,
        }
    }
}

#[async_trait]
impl PriceStream for LnMarketsPriceStream {
    async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            bail!("price stream already connected");
        }

        let ws = open(&self.url, self.connect_timeout).await?;
        info!(url = %self.url, "Connected to LN Markets WebSocket");

        let (subscribe_tx, subscribe_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let session = Session {
            url: self.url.clone(),
            connect_timeout: self.connect_timeout,
            heartbeat: self.heartbeat,
            reconnect: self.reconnect,
            max_backoff_secs: self.max_backoff_secs,
            handler: Arc::clone(&self.handler),
            channels: Vec::new(),
            subscribe_rx,
            shutdown_rx,
        };

        self.subscribe_tx = Some(subscribe_tx);
        self.shutdown_tx = Some(shutdown_tx);
        self.session = Some(tokio::spawn(session.run(Some(ws))));
        Ok(())
    }

    async fn subscribe(&mut self, channel: &str) -> Result<()> {
        let tx = self.subscribe_tx.as_ref().context("price stream not connected")?;
        tx.send(channel.to_string())
            .map_err(|_| anyhow::anyhow!("price stream session has ended"))?;
        debug!(channel, "Subscribed to price channel");
        Ok(())
    }

    fn on_tick(&mut self, handler: TickHandler) {
        *self.handler.lock() = Some(handler);
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.subscribe_tx = None;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(session) = self.session.take() {
            if let Err(e) = session.await {
                warn!(error = %e, "Price stream session ended abnormally");
            }
        }
        self.handler.lock().take();
        Ok(())
    }
}

enum SessionEnd {
    Shutdown,
    Lost(&'static str),
}

/// Owns the socket and the subscribed channels across reconnects
struct Session {
    url: String,
    connect_timeout: Duration,
    heartbeat: Duration,
    reconnect: bool,
    max_backoff_secs: u64,
    handler: SharedHandler,
    channels: Vec<String>,
    subscribe_rx: mpsc::UnboundedReceiver<String>,
    shutdown_rx: oneshot::Receiver<()>,
}

impl Session {
    /// Drive `ws` (or start by reconnecting when `None`) until shutdown, or
    /// until the connection is lost with reconnect disabled.
    async fn run(mut self, ws: Option<WsStream>) {
        let mut current = ws;
        let mut attempt: u32 = 0;

        loop {
            if let Some(ws) = current.take() {
                match self.drive(ws).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Lost(reason) if !self.reconnect => {
                        error!(url = %self.url, reason, "Price stream lost");
                        // dropping the handler is how the consumer sees the loss
                        self.handler.lock().take();
                        break;
                    }
                    SessionEnd::Lost(reason) => {
                        warn!(url = %self.url, reason, "Price stream lost, reconnecting");
                    }
                }
            }

            let delay = backoff_with_jitter(attempt, self.max_backoff_secs);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = &mut self.shutdown_rx => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let connected = tokio::select! {
                _ = &mut self.shutdown_rx => break,
                result = open(&self.url, self.connect_timeout) => result,
            };
            match connected {
                Ok(ws) => {
                    info!(url = %self.url, attempt, "Reconnected to LN Markets WebSocket");
                    attempt = 0;
                    current = Some(ws);
                }
                Err(e) => {
                    warn!(url = %self.url, attempt, error = %e, "Price stream reconnect failed");
                }
            }
        }

        debug!(url = %self.url, "Price stream session ended");
    }

    async fn drive(&mut self, ws: WsStream) -> SessionEnd {
        let (mut write, mut read) = ws.split();

        // channels from an earlier connection; empty on the first one
        for channel in &self.channels {
            let message = subscribe_message(channel, chrono::Utc::now().timestamp());
            if write.send(WsMessage::Text(message)).await.is_err() {
                return SessionEnd::Lost("resubscribe_failed");
            }
        }

        let mut ping = tokio::time::interval(self.heartbeat);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.tick().await;

        loop {
            tokio::select! {
                _ = &mut self.shutdown_rx => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
                requested = self.subscribe_rx.recv() => {
                    let Some(channel) = requested else {
                        // stream handle dropped without disconnect
                        let _ = write.send(WsMessage::Close(None)).await;
                        return SessionEnd::Shutdown;
                    };
                    if self.channels.contains(&channel) {
                        continue;
                    }
                    let message = subscribe_message(&channel, chrono::Utc::now().timestamp());
                    self.channels.push(channel);
                    if let Err(e) = write.send(WsMessage::Text(message)).await {
                        warn!(error = %e, "Failed to send on price stream");
                        return SessionEnd::Lost("send_failed");
                    }
                }
                _ = ping.tick() => {
                    if let Err(e) = write.send(WsMessage::Ping(Vec::new())).await {
                        warn!(error = %e, "Price stream ping failed");
                        return SessionEnd::Lost("ping_failed");
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => self.dispatch(&text),
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = write.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) => return SessionEnd::Lost("remote_close"),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Price stream read error");
                        return SessionEnd::Lost("stream_error");
                    }
                    None => return SessionEnd::Lost("stream_ended"),
                },
            }
        }
    }

    fn dispatch(&self, text: &str) {
        for channel in &self.channels {
            if let Some(tick) = parse_tick(text, channel) {
                if let Some(handler) = self.handler.lock().as_ref() {
                    handler(tick);
                }
                return;
            }
        }

        match serde_json::from_str::<RpcMessage>(text) {
            Ok(msg) => debug!(method = %msg.method, "Received message"),
            Err(e) => debug!(error = %e, "Ignoring non JSON-RPC frame"),
        }
    }
}

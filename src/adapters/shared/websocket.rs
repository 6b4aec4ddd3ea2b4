//! Shared WebSocket connection helpers
//!
//! `connect_tls` opens a TLS stream; `WsSession` owns the split sink, the
//! reader loop and the heartbeat task for one live connection. Exchange
//! specifics (frame formats, ping payloads) come from a `StreamProtocol`.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::shared::subscriptions::{Registration, SubscriptionRegistry};
use crate::adapters::types::{
    current_time_ms, AdapterEvent, ConnectionHealth, StreamMessage, SubscriptionKey,
    WS_PING_INTERVAL_SECS, WS_PONG_TIMEOUT_MS,
};

/// Type alias for the WebSocket stream with TLS
pub type TlsWebSocketStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsWriter = SplitSink<TlsWebSocketStream, Message>;
type WsReader = SplitStream<TlsWebSocketStream>;

/// Connect to a WebSocket endpoint with TLS (TLSv1.2 minimum)
pub async fn connect_tls(url: &str) -> ExchangeResult<TlsWebSocketStream> {
    let tls = native_tls::TlsConnector::builder()
        .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
        .build()
        .map_err(|e| ExchangeError::Network(format!("TLS error: {}", e)))?;

    let (ws_stream, _response) =
        connect_async_tls_with_config(url, None, false, Some(Connector::NativeTls(tls))).await?;

    Ok(ws_stream)
}

// =============================================================================
// Protocol seam
// =============================================================================

/// One decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// Market data for a subscription
    Data(SubscriptionKey, StreamMessage),
    /// Application-level pong
    Pong,
    /// Exchange reported an error on the stream (bad subscription, etc.)
    Error(String),
    /// Acks and anything else not worth surfacing
    Ignored,
}

/// Exchange-specific encoding of the public market-data stream
pub trait StreamProtocol: Send + Sync + 'static {
    fn exchange(&self) -> &'static str;

    fn subscribe_frame(&self, key: &SubscriptionKey) -> ExchangeResult<String>;

    fn unsubscribe_frame(&self, key: &SubscriptionKey) -> ExchangeResult<String>;

    /// Keepalive frame; protocol-level ping by default
    fn ping_frame(&self) -> Message {
        Message::Ping(Vec::new())
    }

    fn parse(&self, text: &str) -> Vec<StreamFrame>;

    /// Drop any per-connection state (local books, partial tickers)
    fn reset(&self) {}
}

// =============================================================================
// WsSession
// =============================================================================

/// A live WebSocket connection: writer, reader loop and heartbeat
pub struct WsSession {
    exchange: &'static str,
    sender: Arc<Mutex<WsWriter>>,
    reader_handle: JoinHandle<()>,
    heartbeat_handle: JoinHandle<()>,
    health: ConnectionHealth,
}

impl WsSession {
    /// Connect, split the stream and spawn the reader + heartbeat tasks
    pub async fn open<P: StreamProtocol>(
        url: &str,
        protocol: Arc<P>,
        subscriptions: SubscriptionRegistry,
        health: ConnectionHealth,
        events: broadcast::Sender<AdapterEvent>,
    ) -> ExchangeResult<Self> {
        let exchange = protocol.exchange();
        tracing::info!(exchange = exchange, url = %url, "Connecting WebSocket");

        let ws_stream = connect_tls(url).await?;
        let (ws_sender, ws_receiver) = ws_stream.split();
        let sender = Arc::new(Mutex::new(ws_sender));

        let now = current_time_ms();
        health.last_data.store(now, Ordering::Relaxed);
        health.last_pong.store(now, Ordering::Relaxed);
        health.reader_alive.store(true, Ordering::Relaxed);

        let reader_handle = tokio::spawn(Self::message_reader_loop(
            ws_receiver,
            Arc::clone(&protocol),
            subscriptions,
            health.clone(),
            events.clone(),
        ));

        let heartbeat_handle = tokio::spawn(Self::heartbeat_loop(
            Arc::clone(&sender),
            protocol,
            health.clone(),
            events,
        ));

        Ok(Self {
            exchange,
            sender,
            reader_handle,
            heartbeat_handle,
            health,
        })
    }

    /// Send a text frame on the shared writer
    pub async fn send_text(&self, text: String) -> ExchangeResult<()> {
        let mut sender = self.sender.lock().await;
        sender.send(Message::Text(text)).await?;
        Ok(())
    }

    pub fn is_alive(&self) -> bool {
        self.health.is_alive()
    }

    /// Abort background tasks and close the socket
    pub async fn close(self) {
        self.heartbeat_handle.abort();
        {
            let mut sender = self.sender.lock().await;
            let _ = sender.close().await;
        }
        self.reader_handle.abort();
        self.health.reset();
        tracing::debug!(exchange = self.exchange, "WebSocket session closed");
    }

    async fn message_reader_loop<P: StreamProtocol>(
        mut ws_receiver: WsReader,
        protocol: Arc<P>,
        subscriptions: SubscriptionRegistry,
        health: ConnectionHealth,
        events: broadcast::Sender<AdapterEvent>,
    ) {
        let exchange = protocol.exchange();
        tracing::debug!(exchange = exchange, "message_reader_loop started");

        while let Some(msg_result) = ws_receiver.next().await {
            health.last_data.store(current_time_ms(), Ordering::Relaxed);

            let text = match msg_result {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => continue,
                },
                Ok(Message::Pong(_)) => {
                    Self::record_pong(exchange, &health, &events);
                    continue;
                }
                Ok(Message::Ping(_)) | Ok(Message::Frame(_)) => continue,
                Ok(Message::Close(frame)) => {
                    tracing::info!(exchange = exchange, ?frame, "WebSocket closed by server");
                    break;
                }
                Err(e) => {
                    tracing::error!(exchange = exchange, error = %e, "WebSocket read error");
                    let _ = events.send(AdapterEvent::WsError {
                        exchange: exchange.to_string(),
                        message: e.to_string(),
                    });
                    break;
                }
            };

            for frame in protocol.parse(&text) {
                match frame {
                    StreamFrame::Data(key, message) => {
                        if !subscriptions.dispatch(&key, message) {
                            tracing::trace!(exchange = exchange, key = %key, "No listener for frame");
                        }
                    }
                    StreamFrame::Pong => Self::record_pong(exchange, &health, &events),
                    StreamFrame::Error(message) => {
                        tracing::warn!(exchange = exchange, error = %message, "Stream error frame");
                        let _ = events.send(AdapterEvent::WsError {
                            exchange: exchange.to_string(),
                            message,
                        });
                    }
                    StreamFrame::Ignored => {
                        tracing::trace!(exchange = exchange, message = %text, "Ignored frame");
                    }
                }
            }
        }

        health.reader_alive.store(false, Ordering::Relaxed);
        let _ = events.send(AdapterEvent::Disconnected {
            exchange: exchange.to_string(),
        });
        tracing::warn!(exchange = exchange, "Message reader loop ended");
    }

    fn record_pong(
        exchange: &'static str,
        health: &ConnectionHealth,
        events: &broadcast::Sender<AdapterEvent>,
    ) {
        let now = current_time_ms();
        health.last_pong.store(now, Ordering::Relaxed);
        let _ = events.send(AdapterEvent::Heartbeat {
            exchange: exchange.to_string(),
            timestamp: now,
        });
    }

    async fn heartbeat_loop<P: StreamProtocol>(
        sender: Arc<Mutex<WsWriter>>,
        protocol: Arc<P>,
        health: ConnectionHealth,
        events: broadcast::Sender<AdapterEvent>,
    ) {
        let exchange = protocol.exchange();
        let mut interval = tokio::time::interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
        interval.tick().await; // skip first immediate tick

        loop {
            interval.tick().await;

            {
                let mut sink = sender.lock().await;
                if let Err(e) = sink.send(protocol.ping_frame()).await {
                    tracing::warn!(exchange = exchange, error = %e, "Heartbeat: failed to send ping");
                    health.reader_alive.store(false, Ordering::Relaxed);
                    break;
                }
            }

            let pong_age_ms = current_time_ms().saturating_sub(health.last_pong.load(Ordering::Relaxed));
            if pong_age_ms > WS_PONG_TIMEOUT_MS {
                tracing::warn!(
                    exchange = exchange,
                    pong_age_ms = pong_age_ms,
                    "Heartbeat: PONG stale, marking session dead"
                );
                health.reader_alive.store(false, Ordering::Relaxed);
                break;
            }
        }

        // Only reached once the session is marked dead
        let _ = events.send(AdapterEvent::Disconnected {
            exchange: exchange.to_string(),
        });
        tracing::debug!(exchange = exchange, "Heartbeat task ended");
    }
}

// =============================================================================
// StreamClient
// =============================================================================

/// Market-data stream of one adapter: protocol + registry + optional session
///
/// The registry outlives individual sessions so the adapter can tell which
/// keys it holds; `close` clears it together with the socket.
pub struct StreamClient<P: StreamProtocol> {
    protocol: Arc<P>,
    subscriptions: SubscriptionRegistry,
    health: ConnectionHealth,
    session: Option<WsSession>,
}

impl<P: StreamProtocol> StreamClient<P> {
    pub fn new(protocol: P) -> Self {
        Self {
            protocol: Arc::new(protocol),
            subscriptions: SubscriptionRegistry::new(),
            health: ConnectionHealth::new(),
            session: None,
        }
    }

    pub async fn open(
        &mut self,
        url: &str,
        events: broadcast::Sender<AdapterEvent>,
    ) -> ExchangeResult<()> {
        self.close().await;
        self.protocol.reset();
        let session = WsSession::open(
            url,
            Arc::clone(&self.protocol),
            self.subscriptions.clone(),
            self.health.clone(),
            events,
        )
        .await?;
        self.session = Some(session);
        Ok(())
    }

    /// Close the socket and forget every subscription
    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        self.subscriptions.clear();
        self.health.reset();
    }

    pub fn is_open(&self) -> bool {
        self.session.as_ref().map(WsSession::is_alive).unwrap_or(false)
    }

    pub fn last_heartbeat(&self) -> u64 {
        self.health.last_heartbeat()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Subscribe `callback` to `key`
    ///
    /// Only the first listener of a key sends a subscribe frame; later ones
    /// attach to the open stream and get `Ok(false)`.
    pub async fn subscribe(
        &mut self,
        key: SubscriptionKey,
        callback: crate::adapters::types::StreamCallback,
    ) -> ExchangeResult<bool> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| ExchangeError::NotConnected(self.protocol.exchange().to_string()))?;

        // Register before sending so the first frame is never dropped
        match self.subscriptions.insert(key.clone(), callback) {
            Registration::NewStream => {}
            Registration::Attached => {
                tracing::debug!(exchange = self.protocol.exchange(), key = %key, "Listener attached to open stream");
                return Ok(false);
            }
            Registration::Duplicate => {
                tracing::debug!(exchange = self.protocol.exchange(), key = %key, "Already subscribed");
                return Ok(false);
            }
        }
        let frame = match self.protocol.subscribe_frame(&key) {
            Ok(frame) => frame,
            Err(e) => {
                self.subscriptions.remove(&key);
                return Err(e);
            }
        };
        if let Err(e) = session.send_text(frame).await {
            self.subscriptions.remove(&key);
            return Err(e);
        }

        tracing::info!(exchange = self.protocol.exchange(), key = %key, "Subscribed");
        Ok(true)
    }

    /// Remove every listener for `key`; `Ok(false)` when it was not held
    pub async fn unsubscribe(&mut self, key: &SubscriptionKey) -> ExchangeResult<bool> {
        if !self.subscriptions.remove(key) {
            return Ok(false);
        }
        if let Some(session) = self.session.as_ref() {
            let frame = self.protocol.unsubscribe_frame(key)?;
            if let Err(e) = session.send_text(frame).await {
                tracing::warn!(
                    exchange = self.protocol.exchange(),
                    key = %key,
                    error = %e,
                    "Unsubscribe frame not sent, listener already removed"
                );
            }
        }
        tracing::info!(exchange = self.protocol.exchange(), key = %key, "Unsubscribed");
        Ok(true)
    }
}

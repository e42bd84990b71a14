//! Shared WebSocket session driver for venue clients.
//!
//! Each venue supplies a [`Dialect`] (URL path, subscription frames,
//! subscribe-ack classification); the session owns the connection state
//! machine: resolve, TCP connect, TLS handshake with SNI, WebSocket
//! upgrade, subscribe, then the read loop. Every decoded text frame is
//! moved into the SPSC ring; the session never parses market data.
//!
//! Transient failures reconnect with capped-doubling backoff and
//! resubscribe. Fatal failures (DNS resolution, TLS verification,
//! rejected subscribe, rejected authentication) park the client in
//! `Failed` for the supervisor to observe.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use market_core::{FeedStats, VenueId};

use crate::error::ClientError;
use crate::ring;

const RECONNECT_FLOOR: Duration = Duration::from_millis(250);
const RECONNECT_CEIL: Duration = Duration::from_secs(30);

/// Connection lifecycle, observable from any thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientState {
    Idle = 0,
    Resolving,
    Connecting,
    TlsHandshaking,
    WsHandshaking,
    Subscribing,
    Streaming,
    Closing,
    Closed,
    Failed,
}

#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    fn set(&self, state: ClientState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub fn get(&self) -> ClientState {
        match self.0.load(Ordering::Acquire) {
            0 => ClientState::Idle,
            1 => ClientState::Resolving,
            2 => ClientState::Connecting,
            3 => ClientState::TlsHandshaking,
            4 => ClientState::WsHandshaking,
            5 => ClientState::Subscribing,
            6 => ClientState::Streaming,
            7 => ClientState::Closing,
            8 => ClientState::Closed,
            _ => ClientState::Failed,
        }
    }
}

/// How a frame received during `Subscribing` should be treated.
pub enum Ack {
    /// Subscription confirmed; switch to streaming.
    Confirmed,
    /// Already a data frame; switch to streaming and deliver it.
    Data,
    /// Status or heartbeat traffic; the subscription is still pending.
    Pending,
    /// Venue refused the subscription. Fatal.
    Rejected(String),
}

/// Venue-specific protocol pieces plugged into the session.
#[allow(async_fn_in_trait)]
pub trait Dialect: Send + 'static {
    fn venue(&self) -> VenueId;

    /// Request path for the upgrade; `configured` is the path from the
    /// venue config. Venues that encode the subscription in the URL
    /// derive their own.
    fn request_path(&self, configured: &str) -> String;

    /// Frames to send right after the upgrade. May perform out-of-band
    /// authentication (e.g. a WebSocket token fetch). An empty list
    /// moves the session straight to streaming.
    async fn subscribe_frames(&mut self) -> Result<Vec<String>, ClientError>;

    /// Classify a frame received while the subscription is pending.
    fn classify_ack(&self, frame: &str) -> Ack;
}

/// Session coordinates bound at initialization; no I/O happens here.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub tls_verify: bool,
    pub ping_interval: Duration,
    pub close_timeout: Duration,
}

enum Command {
    Send(String),
    Stop,
}

/// Thread-safe handle for `send` and `stop`; both post to the reactor.
#[derive(Clone)]
pub struct ClientControl {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state: Arc<StateCell>,
}

impl ClientControl {
    /// Enqueue an outbound text frame; writes are serialized on the
    /// reactor. A no-op after stop.
    pub fn send(&self, text: impl Into<String>) {
        let _ = self.cmd_tx.send(Command::Send(text.into()));
    }

    /// Initiate a graceful close. Idempotent, safe from any thread.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(Command::Stop);
    }

    pub fn state(&self) -> ClientState {
        self.state.get()
    }
}

enum SessionEnd {
    Stopped,
    Disconnected,
}

/// One venue's WebSocket client: connection state machine plus the
/// producer half of that venue's SPSC ring.
pub struct VenueClient<D: Dialect> {
    config: SessionConfig,
    dialect: D,
    producer: ring::Producer<String>,
    stats: Arc<FeedStats>,
    state: Arc<StateCell>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
}

/// Move a decoded frame into the ring, dropping with a counter when the
/// consumer is behind.
pub fn offer_frame(
    producer: &mut ring::Producer<String>,
    frame: String,
    stats: &FeedStats,
    venue: &VenueId,
) {
    match producer.try_push(frame) {
        Ok(()) => stats.record_pushed(),
        Err(_) => {
            stats.record_dropped_full();
            tracing::warn!(venue = %venue, "ring full, dropping frame");
        }
    }
}

impl<D: Dialect> VenueClient<D> {
    pub fn new(
        config: SessionConfig,
        dialect: D,
        producer: ring::Producer<String>,
        stats: Arc<FeedStats>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        VenueClient {
            config,
            dialect,
            producer,
            stats,
            state: Arc::new(StateCell::default()),
            cmd_tx,
            cmd_rx,
        }
    }

    pub fn control(&self) -> ClientControl {
        ClientControl {
            cmd_tx: self.cmd_tx.clone(),
            state: Arc::clone(&self.state),
        }
    }

    pub fn venue(&self) -> VenueId {
        self.dialect.venue()
    }

    /// Drive the connection until stopped or failed. Blocks the calling
    /// task; the pipeline runs this on the dedicated I/O thread.
    pub async fn run(&mut self) -> ClientState {
        let mut backoff = RECONNECT_FLOOR;

        loop {
            match self.connect_and_stream().await {
                Ok(SessionEnd::Stopped) => {
                    self.state.set(ClientState::Closed);
                    return ClientState::Closed;
                }
                Ok(SessionEnd::Disconnected) => {
                    tracing::warn!(venue = %self.dialect.venue(), "stream ended, reconnecting");
                    backoff = RECONNECT_FLOOR;
                }
                Err(err) if err.is_fatal() => {
                    tracing::error!(venue = %self.dialect.venue(), error = %err, "fatal error");
                    self.state.set(ClientState::Failed);
                    return ClientState::Failed;
                }
                Err(err) => {
                    tracing::warn!(
                        venue = %self.dialect.venue(),
                        error = %err,
                        backoff_ms = backoff.as_millis() as u64,
                        "connection error, backing off"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                cmd = self.cmd_rx.recv() => {
                    if matches!(cmd, Some(Command::Stop) | None) {
                        self.state.set(ClientState::Closed);
                        return ClientState::Closed;
                    }
                }
            }
            backoff = (backoff * 2).min(RECONNECT_CEIL);
        }
    }

    async fn connect_and_stream(&mut self) -> Result<SessionEnd, ClientError> {
        let host = self.config.host.clone();
        let venue = self.dialect.venue();

        self.state.set(ClientState::Resolving);
        let addr = tokio::net::lookup_host((host.as_str(), self.config.port))
            .await
            .map_err(|source| ClientError::Resolve {
                host: host.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| ClientError::Resolve {
                host: host.clone(),
                source: std::io::Error::other("no addresses"),
            })?;

        self.state.set(ClientState::Connecting);
        let tcp = TcpStream::connect(addr).await?;
        tcp.set_nodelay(true)?;

        self.state.set(ClientState::TlsHandshaking);
        let mut builder = native_tls::TlsConnector::builder();
        if !self.config.tls_verify {
            tracing::warn!(venue = %venue, "TLS certificate verification disabled by config");
            builder.danger_accept_invalid_certs(true);
        }
        let connector = tokio_native_tls::TlsConnector::from(builder.build()?);
        let tls = connector
            .connect(&host, tcp)
            .await
            .map_err(ClientError::Tls)?;

        self.state.set(ClientState::WsHandshaking);
        let path = self.dialect.request_path(&self.config.path);
        let url = format!("wss://{}:{}{}", host, self.config.port, path);
        let (ws, _response) = tokio_tungstenite::client_async(url, tls).await?;
        let (mut write, mut read) = ws.split();

        self.state.set(ClientState::Subscribing);
        let frames = self.dialect.subscribe_frames().await?;
        let mut subscribing = !frames.is_empty();
        for frame in frames {
            write.send(Message::text(frame)).await?;
        }
        if !subscribing {
            self.state.set(ClientState::Streaming);
        }
        tracing::info!(venue = %venue, host = %host, "connected");

        let mut ping = tokio::time::interval(self.config.ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.reset();

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Send(text)) => {
                        write.send(Message::text(text)).await?;
                    }
                    Some(Command::Stop) | None => {
                        self.state.set(ClientState::Closing);
                        let close = async {
                            let _ = write.send(Message::Close(None)).await;
                            while let Some(msg) = read.next().await {
                                if matches!(msg, Ok(Message::Close(_)) | Err(_)) {
                                    break;
                                }
                            }
                        };
                        if tokio::time::timeout(self.config.close_timeout, close)
                            .await
                            .is_err()
                        {
                            tracing::warn!(venue = %venue, "close timed out, dropping socket");
                        }
                        return Ok(SessionEnd::Stopped);
                    }
                },
                _ = ping.tick() => {
                    write.send(Message::Ping(Bytes::new())).await?;
                }
                frame = read.next() => {
                    let Some(frame) = frame else {
                        return Ok(SessionEnd::Disconnected);
                    };
                    match frame? {
                        Message::Text(text) => {
                            if subscribing {
                                match self.dialect.classify_ack(text.as_str()) {
                                    Ack::Rejected(reason) => {
                                        return Err(ClientError::SubscribeRejected(reason));
                                    }
                                    Ack::Confirmed => {
                                        subscribing = false;
                                        self.state.set(ClientState::Streaming);
                                        continue;
                                    }
                                    Ack::Data => {
                                        subscribing = false;
                                        self.state.set(ClientState::Streaming);
                                    }
                                    Ack::Pending => {}
                                }
                            }
                            offer_frame(
                                &mut self.producer,
                                text.to_string(),
                                &self.stats,
                                &venue,
                            );
                        }
                        Message::Ping(payload) => {
                            write.send(Message::Pong(payload)).await?;
                        }
                        Message::Close(_) => {
                            return Ok(SessionEnd::Disconnected);
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

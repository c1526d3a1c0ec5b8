use std::fmt;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::{DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY};
use shared::ClientEnvelope;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Absent,
    Connecting,
    Open,
    Closing,
    Closed,
    Errored,
}

impl ConnectionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionStatus::Open)
    }

    pub fn is_lost(&self) -> bool {
        matches!(self, ConnectionStatus::Closed | ConnectionStatus::Errored)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::Absent => "absent",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Open => "open",
            ConnectionStatus::Closing => "closing",
            ConnectionStatus::Closed => "closed",
            ConnectionStatus::Errored => "errored",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub delay: std::time::Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            enabled: true,
            delay: DEFAULT_RECONNECT_DELAY,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendResult {
    Sent,
    /// The connection was not open; the frame was dropped with a warning.
    Dropped,
    /// The payload could not be serialized; the connection stays open.
    Rejected(String),
    /// The transport write failed; the socket is no longer usable.
    TransportFailed(String),
}

#[derive(Debug)]
pub enum FrameEvent {
    /// A text frame arrived.
    Frame(String),
    /// The peer closed the connection, with an optional reason.
    Closed(Option<String>),
    /// The transport failed mid-read.
    Failed(String),
}

pub struct Connection {
    endpoint: Url,
    policy: ReconnectPolicy,
    socket: Option<WsStream>,
    status: ConnectionStatus,
    attempts: u32,
    reconnect_at: Option<Instant>,
    last_error: Option<String>,
}

impl Connection {
    pub fn new(endpoint: Url, policy: ReconnectPolicy) -> Self {
        Connection {
            endpoint,
            policy,
            socket: None,
            status: ConnectionStatus::Absent,
            attempts: 0,
            reconnect_at: None,
            last_error: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn transport_alive(&self) -> bool {
        self.socket.is_some()
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn mark_connecting(&mut self) {
        self.status = ConnectionStatus::Connecting;
    }

    /// Dials the endpoint, resolving once the handshake completes. Any prior
    /// transport handle is closed first so at most one exists at a time.
    pub async fn connect(&mut self, dial: &Url) -> Result<(), WsError> {
        if let Some(mut old) = self.socket.take() {
            debug!("Closing previous transport before dialing");
            let _ = old.close(None).await;
        }

        self.status = ConnectionStatus::Connecting;

        match connect_async(dial.as_str()).await {
            Ok((socket, _response)) => {
                self.socket = Some(socket);
                self.status = ConnectionStatus::Open;
                self.attempts = 0;
                self.reconnect_at = None;
                self.last_error = None;
                info!("Connected to {}", self.endpoint);
                Ok(())
            }
            Err(e) => {
                self.status = ConnectionStatus::Errored;
                self.last_error = Some(e.to_string());
                error!("Failed to connect to {}: {}", self.endpoint, e);
                Err(e)
            }
        }
    }

    /// Closes the current handle (if any) and dials again, incrementing the
    /// attempt counter. The counter resets to zero on a successful open.
    pub async fn reconnect(&mut self, dial: &Url) -> Result<(), WsError> {
        self.reconnect_at = None;
        self.attempts += 1;
        info!(
            "Reconnecting (attempt {} of {})",
            self.attempts, self.policy.max_attempts
        );
        self.connect(dial).await
    }

    /// Arms the fixed-delay reconnect deadline. A deadline already pending is
    /// left in place so overlapping schedule requests coalesce into one.
    pub fn schedule_reconnect(&mut self, now: Instant) -> bool {
        if !self.policy.enabled {
            return false;
        }
        if !self.status.is_lost() {
            return false;
        }
        if self.reconnect_at.is_some() {
            return true;
        }
        if self.attempts >= self.policy.max_attempts {
            error!(
                "Giving up: {} reconnect attempts exhausted",
                self.policy.max_attempts
            );
            return false;
        }

        self.reconnect_at = Some(now + self.policy.delay);
        info!(
            "Reconnect in {:?} (attempt {} of {})",
            self.policy.delay,
            self.attempts + 1,
            self.policy.max_attempts
        );
        true
    }

    /// Records loss of the transport and arms a reconnect when policy allows.
    pub fn mark_closed(&mut self, error: Option<String>, now: Instant) -> bool {
        self.socket = None;

        match error {
            Some(message) => {
                warn!("Connection lost: {}", message);
                self.status = ConnectionStatus::Errored;
                self.last_error = Some(message);
            }
            None => {
                info!("Connection closed by server");
                self.status = ConnectionStatus::Closed;
            }
        }

        self.schedule_reconnect(now)
    }

    /// Intentional shutdown. Cancels any pending reconnect; never retried.
    pub async fn close(&mut self, code: u16, reason: &str) {
        self.reconnect_at = None;

        if let Some(mut socket) = self.socket.take() {
            self.status = ConnectionStatus::Closing;
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            };
            if let Err(e) = socket.close(Some(frame)).await {
                debug!("Close handshake incomplete: {}", e);
            }
        }

        self.status = ConnectionStatus::Closed;
        info!("Connection closed: {}", reason);
    }

    /// Serializes and writes one envelope. Not-open connections drop the
    /// frame with a warning instead of failing the caller.
    pub async fn send(&mut self, envelope: &ClientEnvelope) -> SendResult {
        if self.status != ConnectionStatus::Open {
            warn!("Dropping outbound frame while {}", self.status);
            return SendResult::Dropped;
        }

        let socket = match self.socket.as_mut() {
            Some(socket) => socket,
            None => {
                warn!("Dropping outbound frame: no transport");
                return SendResult::Dropped;
            }
        };

        let payload = match serde_json::to_string(envelope) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize outbound frame: {}", e);
                return SendResult::Rejected(e.to_string());
            }
        };

        match socket.send(Message::Text(payload)).await {
            Ok(()) => SendResult::Sent,
            Err(e) => {
                warn!("Send failed: {}", e);
                SendResult::TransportFailed(e.to_string())
            }
        }
    }

    /// Waits for the next frame. Pings and pongs are handled by the protocol
    /// layer; binary frames are ignored.
    pub async fn next_frame(&mut self) -> FrameEvent {
        let socket = match self.socket.as_mut() {
            Some(socket) => socket,
            None => return std::future::pending().await,
        };

        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return FrameEvent::Frame(text),
                Some(Ok(Message::Binary(_))) => {
                    warn!("Ignoring unexpected binary frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    return FrameEvent::Closed(frame.map(|f| f.reason.into_owned()));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return FrameEvent::Failed(e.to_string()),
                None => return FrameEvent::Closed(None),
            }
        }
    }
}

//! Live-channel transport abstraction for `chatlink`.
//!
//! A [`Connector`] starts one physical connection attempt per call and hands
//! back a [`LiveLink`] for outbound traffic. Everything the connection
//! observes (open, text frames, errors, closure) is reported asynchronously
//! as [`SocketEvent`]s tagged with the attempt's generation number, so the
//! owner can ignore callbacks from sockets it has already abandoned.
//!
//! Concrete implementations:
//! - [`websocket::WebSocketConnector`] — `tokio-tungstenite` client
//! - [`loopback::LoopbackConnector`] — in-process scripted peer for tests

pub mod loopback;
pub mod websocket;

use std::fmt;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use url::Url;

/// WebSocket close code for a normal, intentional closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Lifecycle state of the live channel. Written only by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no attempt in flight.
    Disconnected,
    /// An attempt is in flight.
    Connecting,
    /// The connection is open.
    Connected,
    /// The live channel is switched off; all traffic uses the fallback path.
    Disabled,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// Errors that can occur during live-channel operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No bearer credential was configured.
    #[error("no authentication token available")]
    MissingCredential,

    /// The endpoint URL could not be parsed.
    #[error("invalid live endpoint url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The endpoint URL scheme is not `ws` or `wss`.
    #[error("unsupported live endpoint scheme {0:?}")]
    UnsupportedScheme(String),

    /// There is no open connection to transmit on.
    #[error("live connection is not open")]
    NotOpen,

    /// The outbound buffer of the connection is full.
    #[error("live connection outbound buffer is full")]
    Backpressure,

    /// Encoding the outbound frame failed.
    #[error("failed to encode frame: {0}")]
    Encode(#[from] chatlink_proto::codec::CodecError),
}

/// Where and as whom to open the live channel.
///
/// The bearer credential and the role tag travel as query parameters
/// (`token`, `userType`) on the upgrade request.
#[derive(Clone)]
pub struct LiveEndpoint {
    url: Url,
    token: Option<String>,
    role: String,
}

impl LiveEndpoint {
    /// Builds an endpoint from a `ws://` or `wss://` URL.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] or
    /// [`TransportError::UnsupportedScheme`].
    pub fn parse(
        url: &str,
        token: Option<String>,
        role: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::UnsupportedScheme(url.scheme().to_string()));
        }
        Ok(Self {
            url,
            token: token.filter(|t| !t.is_empty()),
            role: role.into(),
        })
    }

    /// Whether a bearer credential is available.
    #[must_use]
    pub const fn has_credential(&self) -> bool {
        self.token.is_some()
    }

    /// The URL of the upgrade request, credential included.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::MissingCredential`] without a token.
    pub fn request_url(&self) -> Result<Url, TransportError> {
        let token = self
            .token
            .as_deref()
            .ok_or(TransportError::MissingCredential)?;
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("token", token)
            .append_pair("userType", &self.role);
        Ok(url)
    }
}

/// Shows the URL without the credential so it can be logged.
impl fmt::Display for LiveEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

impl fmt::Debug for LiveEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveEndpoint")
            .field("url", &self.url.as_str())
            .field("has_token", &self.token.is_some())
            .field("role", &self.role)
            .finish()
    }
}

/// Instruction for the task driving one physical connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    /// Transmit a text frame.
    Text(String),
    /// Close with the given code and reason.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Human-readable reason.
        reason: String,
    },
}

/// Something observed on one physical connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEvent {
    /// Generation of the attempt that produced this event.
    pub generation: u64,
    /// What happened.
    pub kind: SocketEventKind,
}

/// The kinds of [`SocketEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEventKind {
    /// The upgrade completed; the connection is open.
    Opened,
    /// A text frame arrived.
    Frame(String),
    /// The attempt or the open connection failed. Always followed by
    /// [`SocketEventKind::Closed`] with no code.
    Error(String),
    /// The connection ended. `code` is `None` when no close frame was seen.
    Closed {
        /// Close code from the peer, if any.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
}

/// Outbound handle to one physical connection.
///
/// Dropping the handle closes the connection with [`NORMAL_CLOSURE`].
#[derive(Debug)]
pub struct LiveLink {
    generation: u64,
    outbound: mpsc::Sender<LinkCommand>,
}

impl LiveLink {
    /// Wraps the command channel of a connection task.
    #[must_use]
    pub const fn new(generation: u64, outbound: mpsc::Sender<LinkCommand>) -> Self {
        Self {
            generation,
            outbound,
        }
    }

    /// Generation of the attempt behind this link.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Hands a text frame to the connection without waiting.
    ///
    /// Success means the frame was queued for the socket, nothing more.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotOpen`] if the connection task is gone,
    /// [`TransportError::Backpressure`] if its buffer is full.
    pub fn transmit(&self, text: String) -> Result<(), TransportError> {
        self.outbound
            .try_send(LinkCommand::Text(text))
            .map_err(|e| match e {
                TrySendError::Full(_) => TransportError::Backpressure,
                TrySendError::Closed(_) => TransportError::NotOpen,
            })
    }

    /// Asks the connection to close and releases the handle.
    pub fn close(self, code: u16, reason: &str) {
        // If the buffer is full the drop below still closes with 1000.
        let _ = self.outbound.try_send(LinkCommand::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

/// Starts physical connections to the live endpoint.
///
/// `open` must not block: it starts the attempt and returns immediately.
/// Every outcome is reported on `events` tagged with `generation`.
pub trait Connector: Send + Sync + 'static {
    /// Start a connection attempt to `url`.
    fn open(&self, generation: u64, url: Url, events: mpsc::Sender<SocketEvent>) -> LiveLink;
}

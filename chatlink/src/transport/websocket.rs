//! WebSocket live channel built on `tokio-tungstenite`.
//!
//! Each [`Connector::open`] call spawns one connection task. The task owns
//! both halves of the socket: it forwards [`LinkCommand`]s to the sink and
//! reports everything read from the stream as [`SocketEvent`]s. Frames that
//! are not text are logged and skipped; they never end the connection.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{Connector, LinkCommand, LiveLink, NORMAL_CLOSURE, SocketEvent, SocketEventKind};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Default timeout for the upgrade handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of outbound frames buffered per connection.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Opens real WebSocket connections.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
    outbound_capacity: usize,
}

impl WebSocketConnector {
    /// Create a connector with the given handshake timeout and per-connection
    /// outbound buffer size.
    #[must_use]
    pub fn new(connect_timeout: Duration, outbound_capacity: usize) -> Self {
        Self {
            connect_timeout,
            outbound_capacity: outbound_capacity.max(1),
        }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT, DEFAULT_OUTBOUND_CAPACITY)
    }
}

impl Connector for WebSocketConnector {
    fn open(&self, generation: u64, url: Url, events: mpsc::Sender<SocketEvent>) -> LiveLink {
        let (tx, rx) = mpsc::channel(self.outbound_capacity);
        let reporter = Reporter { generation, events };
        tokio::spawn(run_connection(reporter, url, rx, self.connect_timeout));
        LiveLink::new(generation, tx)
    }
}

/// Sends events for one generation back to the supervisor.
struct Reporter {
    generation: u64,
    events: mpsc::Sender<SocketEvent>,
}

impl Reporter {
    async fn emit(&self, kind: SocketEventKind) {
        // The owner may already be gone; nothing left to tell.
        let _ = self
            .events
            .send(SocketEvent {
                generation: self.generation,
                kind,
            })
            .await;
    }

    async fn fail(&self, reason: String) {
        self.emit(SocketEventKind::Error(reason.clone())).await;
        self.emit(SocketEventKind::Closed { code: None, reason })
            .await;
    }
}

async fn run_connection(
    reporter: Reporter,
    url: Url,
    mut commands: mpsc::Receiver<LinkCommand>,
    connect_timeout: Duration,
) {
    let generation = reporter.generation;
    let connect = tokio::time::timeout(connect_timeout, connect_async(url.as_str()));
    tokio::pin!(connect);

    let ws_stream = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok(Ok((stream, _response))) => break stream,
                Ok(Err(e)) => {
                    let reason = describe_connect_error(&e);
                    tracing::warn!(generation, %reason, "live connection attempt failed");
                    reporter.fail(reason).await;
                    return;
                }
                Err(_) => {
                    tracing::warn!(generation, ?connect_timeout, "live connection attempt timed out");
                    reporter.fail("connection attempt timed out".to_string()).await;
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(LinkCommand::Text(_)) => {
                    tracing::warn!(generation, "dropping frame queued before the connection opened");
                }
                Some(LinkCommand::Close { .. }) | None => {
                    tracing::debug!(generation, "connection attempt abandoned");
                    return;
                }
            },
        }
    };

    tracing::info!(generation, "live connection open");
    reporter.emit(SocketEventKind::Opened).await;
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(LinkCommand::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        tracing::warn!(generation, err = %e, "live send failed");
                        reporter.fail(format!("send failed: {e}")).await;
                        return;
                    }
                }
                Some(LinkCommand::Close { code, reason }) => {
                    close_sink(&mut sink, code, &reason).await;
                    reporter.emit(SocketEventKind::Closed { code: Some(code), reason }).await;
                    return;
                }
                None => {
                    // Link handle dropped without an explicit close.
                    close_sink(&mut sink, NORMAL_CLOSURE, "client going away").await;
                    return;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    reporter.emit(SocketEventKind::Frame(text.as_str().to_owned())).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or((None, String::new()), |f| {
                        (Some(u16::from(f.code)), f.reason.as_str().to_owned())
                    });
                    tracing::info!(generation, ?code, %reason, "live connection closed by server");
                    reporter.emit(SocketEventKind::Closed { code, reason }).await;
                    return;
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(generation, len = data.len(), "ignoring binary frame");
                }
                Some(Ok(_)) => {
                    // Control frames are answered by tungstenite itself.
                }
                Some(Err(e)) => {
                    tracing::warn!(generation, err = %e, "live read error");
                    reporter.fail(format!("read error: {e}")).await;
                    return;
                }
                None => {
                    tracing::info!(generation, "live stream ended without close frame");
                    reporter
                        .emit(SocketEventKind::Closed { code: None, reason: "stream ended".to_string() })
                        .await;
                    return;
                }
            },
        }
    }
}

async fn close_sink(sink: &mut WsSender, code: u16, reason: &str) {
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_string().into(),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        tracing::debug!(err = %e, "close frame not delivered");
    }
}

/// Turn a handshake failure into a short human-readable reason.
fn describe_connect_error(err: &tungstenite::Error) -> String {
    use tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err)
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::AddrNotAvailable
            ) =>
        {
            "live endpoint unreachable".to_string()
        }
        WsError::Io(io_err) => format!("i/o error: {io_err}"),
        WsError::Tls(_) => format!("TLS error: {err}"),
        WsError::Http(response) => {
            format!("upgrade rejected: status {}", response.status())
        }
        other => format!("connection error: {other}"),
    }
}

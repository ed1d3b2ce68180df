//! Scripted in-process live channel for testing.
//!
//! [`LoopbackConnector::create`] returns the connector handed to the
//! supervisor together with a [`LoopbackServer`] that plays the remote side:
//! a test decides when each attempt opens, fails or closes, pushes inbound
//! frames, and inspects what the client transmitted.
//!
//! ```rust,no_run
//! use chatlink::transport::loopback::LoopbackConnector;
//!
//! let (connector, server) = LoopbackConnector::create();
//! // hand `connector` to a session, then:
//! server.accept(0);
//! server.push_frame(0, r#"{"type":"ping"}"#);
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use url::Url;

use super::{Connector, LinkCommand, LiveLink, SocketEvent, SocketEventKind};

/// Outbound buffer per loopback connection.
const OUTBOUND_CAPACITY: usize = 64;

struct Peer {
    generation: u64,
    url: Url,
    outbound: mpsc::Receiver<LinkCommand>,
    events: mpsc::Sender<SocketEvent>,
    sent: Vec<String>,
    client_close: Option<u16>,
    released: bool,
    ended: bool,
}

impl Peer {
    /// Pull everything the client queued since the last look.
    fn drain(&mut self) {
        loop {
            match self.outbound.try_recv() {
                Ok(LinkCommand::Text(text)) => self.sent.push(text),
                Ok(LinkCommand::Close { code, .. }) => {
                    self.client_close = Some(code);
                    self.ended = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.released = true;
                    self.ended = true;
                    break;
                }
            }
        }
    }

    fn emit(&self, kind: SocketEventKind) -> bool {
        self.events
            .try_send(SocketEvent {
                generation: self.generation,
                kind,
            })
            .is_ok()
    }
}

type Peers = Arc<Mutex<Vec<Peer>>>;

/// Connector whose attempts are driven by a [`LoopbackServer`].
pub struct LoopbackConnector {
    peers: Peers,
}

impl LoopbackConnector {
    /// Create a connector and the server handle that scripts it.
    #[must_use]
    pub fn create() -> (Self, LoopbackServer) {
        let peers: Peers = Arc::default();
        (
            Self {
                peers: Arc::clone(&peers),
            },
            LoopbackServer { peers },
        )
    }
}

impl Connector for LoopbackConnector {
    fn open(&self, generation: u64, url: Url, events: mpsc::Sender<SocketEvent>) -> LiveLink {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        self.peers.lock().push(Peer {
            generation,
            url,
            outbound: rx,
            events,
            sent: Vec::new(),
            client_close: None,
            released: false,
            ended: false,
        });
        LiveLink::new(generation, tx)
    }
}

/// Remote side of every connection a [`LoopbackConnector`] opened.
///
/// Connections are indexed in the order they were attempted, starting at 0.
/// Methods addressing a missing index return `false` or an empty value.
#[derive(Clone)]
pub struct LoopbackServer {
    peers: Peers,
}

impl LoopbackServer {
    /// Number of connection attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.peers.lock().len()
    }

    /// Index of the most recent attempt.
    #[must_use]
    pub fn latest(&self) -> Option<usize> {
        self.attempts().checked_sub(1)
    }

    /// URL the client used for attempt `index`.
    #[must_use]
    pub fn url(&self, index: usize) -> Option<Url> {
        self.peers.lock().get(index).map(|p| p.url.clone())
    }

    /// Generation number of attempt `index`.
    #[must_use]
    pub fn generation(&self, index: usize) -> Option<u64> {
        self.peers.lock().get(index).map(|p| p.generation)
    }

    /// Connections the client has neither closed nor released, and which
    /// the server has not ended.
    #[must_use]
    pub fn live_count(&self) -> usize {
        let mut peers = self.peers.lock();
        peers
            .iter_mut()
            .map(|p| {
                p.drain();
                p
            })
            .filter(|p| !p.ended)
            .count()
    }

    /// Text frames the client transmitted on connection `index`.
    #[must_use]
    pub fn sent_frames(&self, index: usize) -> Vec<String> {
        let mut peers = self.peers.lock();
        peers.get_mut(index).map_or_else(Vec::new, |p| {
            p.drain();
            p.sent.clone()
        })
    }

    /// Close code the client sent on connection `index`, if it closed it.
    #[must_use]
    pub fn client_close_code(&self, index: usize) -> Option<u16> {
        let mut peers = self.peers.lock();
        peers.get_mut(index).and_then(|p| {
            p.drain();
            p.client_close
        })
    }

    /// Whether the client dropped connection `index` (explicitly or not).
    #[must_use]
    pub fn is_released(&self, index: usize) -> bool {
        let mut peers = self.peers.lock();
        peers.get_mut(index).is_some_and(|p| {
            p.drain();
            p.ended
        })
    }

    /// Completes the upgrade of attempt `index`.
    pub fn accept(&self, index: usize) -> bool {
        self.with_peer(index, |p| p.emit(SocketEventKind::Opened))
    }

    /// Delivers a text frame on connection `index`.
    pub fn push_frame(&self, index: usize, text: &str) -> bool {
        self.with_peer(index, |p| p.emit(SocketEventKind::Frame(text.to_string())))
    }

    /// Fails connection `index` the way a network error would: an error
    /// notification followed by a closure without a code.
    pub fn fail(&self, index: usize, reason: &str) -> bool {
        self.with_peer(index, |p| {
            p.ended = true;
            p.emit(SocketEventKind::Error(reason.to_string()))
                && p.emit(SocketEventKind::Closed {
                    code: None,
                    reason: reason.to_string(),
                })
        })
    }

    /// Closes connection `index` from the server side with `code`.
    pub fn close(&self, index: usize, code: u16) -> bool {
        self.with_peer(index, |p| {
            p.ended = true;
            p.emit(SocketEventKind::Closed {
                code: Some(code),
                reason: String::new(),
            })
        })
    }

    fn with_peer(&self, index: usize, f: impl FnOnce(&mut Peer) -> bool) -> bool {
        let mut peers = self.peers.lock();
        peers.get_mut(index).is_some_and(f)
    }
}

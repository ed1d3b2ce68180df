#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::missing_panics_doc,
    clippy::future_not_send
)]

//! The live channel against a real `tokio-tungstenite` server.
//!
//! The server hands every accepted connection to the test together with the
//! request URI, so a test can script the remote side frame by frame.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use chatlink::api::memory::InMemoryApi;
use chatlink::chat::{Author, ChatEvent};
use chatlink::flag_store::MemoryFlagStore;
use chatlink::policy::{PolicyConfig, ReconnectPolicy};
use chatlink::session::{ChatSession, SessionCommand, SessionConfig, SessionHandle};
use chatlink::transport::websocket::WebSocketConnector;
use chatlink::transport::{ConnectionState, LiveEndpoint};
use chatlink_proto::message::{ConversationId, UserId};

const WAIT: Duration = Duration::from_secs(5);

struct Accepted {
    uri: String,
    ws: WebSocketStream<TcpStream>,
}

/// Start a server on an ephemeral port. Returns its URL and a receiver of
/// accepted connections.
async fn start_server() -> (String, mpsc::Receiver<Accepted>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let mut uri = String::new();
            let record_uri = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                uri = req.uri().to_string();
                Ok(resp)
            };
            let upgraded = tokio_tungstenite::accept_hdr_async(stream, record_uri).await;
            if let Ok(ws) = upgraded {
                if tx.send(Accepted { uri, ws }).await.is_err() {
                    break;
                }
            }
        }
    });
    (format!("ws://{addr}/api/chat/ws"), rx)
}

fn spawn_session(url: &str, reconnect_delay: Duration) -> (SessionHandle, mpsc::Receiver<ChatEvent>) {
    let endpoint = LiveEndpoint::parse(url, Some("secret-token".into()), "doctor").unwrap();
    let policy = ReconnectPolicy::load(
        PolicyConfig::default(),
        Arc::new(MemoryFlagStore::default()),
    );
    let mut config = SessionConfig::new(Author::new(UserId::new("dr"), "Dr", "doctor"));
    config.reconnect_delay = reconnect_delay;
    let (session, events) = ChatSession::new(
        WebSocketConnector::new(WAIT, 16),
        endpoint,
        policy,
        Arc::new(InMemoryApi::new()),
        config,
    );
    (SessionHandle::spawn(session, 16), events)
}

async fn accept(server: &mut mpsc::Receiver<Accepted>) -> Accepted {
    tokio::time::timeout(WAIT, server.recv())
        .await
        .expect("no connection within timeout")
        .unwrap()
}

/// Wait for the first event matching `pred`.
async fn wait_for(
    events: &mut mpsc::Receiver<ChatEvent>,
    pred: impl Fn(&ChatEvent) -> bool,
) -> ChatEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not seen within timeout")
}

/// Next text frame from the client; `None` once it closes.
async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> Option<String> {
    tokio::time::timeout(WAIT, async {
        while let Some(Ok(msg)) = ws.next().await {
            match msg {
                Message::Text(text) => return Some(text.as_str().to_owned()),
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    })
    .await
    .expect("no frame within timeout")
}

fn connected(event: &ChatEvent) -> bool {
    *event == ChatEvent::ConnectionChanged(ConnectionState::Connected)
}

#[tokio::test]
async fn handshake_carries_credential_and_ping_gets_pong() {
    let (url, mut server) = start_server().await;
    let (handle, mut events) = spawn_session(&url, Duration::from_secs(5));
    handle.send(SessionCommand::Connect).await.unwrap();

    let mut conn = accept(&mut server).await;
    assert!(conn.uri.starts_with("/api/chat/ws?"));
    assert!(conn.uri.contains("token=secret-token"));
    assert!(conn.uri.contains("userType=doctor"));
    wait_for(&mut events, connected).await;

    conn.ws
        .send(Message::Text(r#"{"type":"ping"}"#.into()))
        .await
        .unwrap();
    assert_eq!(next_text(&mut conn.ws).await.as_deref(), Some(r#"{"type":"pong"}"#));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn inbound_chat_reaches_the_ui_and_outbound_uses_socket() {
    let (url, mut server) = start_server().await;
    let (handle, mut events) = spawn_session(&url, Duration::from_secs(5));
    handle.send(SessionCommand::Connect).await.unwrap();
    handle
        .send(SessionCommand::OpenConversation(ConversationId::new("c1")))
        .await
        .unwrap();
    let mut conn = accept(&mut server).await;
    wait_for(&mut events, connected).await;

    let chat = serde_json::json!({
        "type": "chat",
        "messageId": "srv-1",
        "conversationId": "c1",
        "senderId": "patient-7",
        "senderName": "Pat",
        "content": "I feel better",
        "timestamp": chrono::Utc::now(),
    });
    conn.ws
        .send(Message::Text(chat.to_string().into()))
        .await
        .unwrap();
    let added = wait_for(&mut events, |e| matches!(e, ChatEvent::MessageAdded(_))).await;
    let ChatEvent::MessageAdded(message) = added else {
        unreachable!()
    };
    assert_eq!(message.content, "I feel better");

    // The read receipt for the inbound message comes first.
    let receipt: serde_json::Value =
        serde_json::from_str(&next_text(&mut conn.ws).await.unwrap()).unwrap();
    assert_eq!(receipt["type"], "read_receipt");

    handle
        .send(SessionCommand::Send {
            conversation: ConversationId::new("c1"),
            content: "glad to hear".into(),
            recipients: vec![UserId::new("patient-7")],
        })
        .await
        .unwrap();
    let sent: serde_json::Value =
        serde_json::from_str(&next_text(&mut conn.ws).await.unwrap()).unwrap();
    assert_eq!(sent["type"], "chat");
    assert_eq!(sent["content"], "glad to hear");
    assert_eq!(sent["messageId"], sent["clientMessageId"]);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn abnormal_close_triggers_reconnect() {
    let (url, mut server) = start_server().await;
    let (handle, mut events) = spawn_session(&url, Duration::from_millis(50));
    handle.send(SessionCommand::Connect).await.unwrap();

    let mut first = accept(&mut server).await;
    wait_for(&mut events, connected).await;
    first
        .ws
        .close(Some(CloseFrame {
            code: CloseCode::from(4001),
            reason: "server restarting".into(),
        }))
        .await
        .unwrap();
    wait_for(&mut events, |e| {
        *e == ChatEvent::ConnectionChanged(ConnectionState::Disconnected)
    })
    .await;

    let _second = accept(&mut server).await;
    wait_for(&mut events, connected).await;

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn normal_server_close_does_not_reconnect() {
    let (url, mut server) = start_server().await;
    let (handle, mut events) = spawn_session(&url, Duration::from_millis(50));
    handle.send(SessionCommand::Connect).await.unwrap();

    let mut first = accept(&mut server).await;
    wait_for(&mut events, connected).await;
    first
        .ws
        .close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        }))
        .await
        .unwrap();
    wait_for(&mut events, |e| {
        *e == ChatEvent::ConnectionChanged(ConnectionState::Disconnected)
    })
    .await;

    let again = tokio::time::timeout(Duration::from_millis(300), server.recv()).await;
    assert!(again.is_err(), "client reconnected after a normal close");

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_with_normal_code() {
    let (url, mut server) = start_server().await;
    let (handle, mut events) = spawn_session(&url, Duration::from_secs(5));
    handle.send(SessionCommand::Connect).await.unwrap();
    let mut conn = accept(&mut server).await;
    wait_for(&mut events, connected).await;

    handle.shutdown().await.unwrap();

    let code = tokio::time::timeout(WAIT, async {
        while let Some(Ok(msg)) = conn.ws.next().await {
            if let Message::Close(frame) = msg {
                return frame.map(|f| u16::from(f.code));
            }
        }
        None
    })
    .await
    .unwrap();
    assert_eq!(code, Some(1000));
}

#[tokio::test]
async fn refused_connection_is_reported_and_retried() {
    // Bind then drop to get a port nobody listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let url = format!("ws://{addr}/api/chat/ws");
    let (handle, mut events) = spawn_session(&url, Duration::from_millis(20));
    handle.send(SessionCommand::Connect).await.unwrap();

    let error = wait_for(&mut events, |e| matches!(e, ChatEvent::Error(_))).await;
    let ChatEvent::Error(text) = error else {
        unreachable!()
    };
    assert!(text.starts_with("live connection error"));
    // A second attempt follows after the delay.
    wait_for(&mut events, |e| {
        *e == ChatEvent::ConnectionChanged(ConnectionState::Connecting)
    })
    .await;

    handle.shutdown().await.unwrap();
}

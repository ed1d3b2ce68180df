#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::missing_panics_doc,
    clippy::future_not_send
)]

//! Circuit breaker behavior of the live channel across many failures and
//! across a simulated restart.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chatlink::api::memory::InMemoryApi;
use chatlink::chat::{Author, ChatEvent};
use chatlink::dispatch::Delivery;
use chatlink::flag_store::{DISABLED_FLAG_KEY, FileFlagStore, FlagStore, MemoryFlagStore};
use chatlink::policy::{PolicyConfig, ReconnectPolicy};
use chatlink::session::{ChatSession, SessionConfig};
use chatlink::supervisor::{AUTO_DISABLED, REPEATED_FAILURES, RETRIES_EXHAUSTED};
use chatlink::transport::loopback::{LoopbackConnector, LoopbackServer};
use chatlink::transport::{ConnectionState, LiveEndpoint};
use chatlink_proto::message::{ConversationId, UserId};
use tokio::sync::mpsc;

const QUIET: Duration = Duration::from_millis(10);

type Session = ChatSession<LoopbackConnector, InMemoryApi>;

fn session_with(store: Arc<dyn FlagStore>) -> (Session, mpsc::Receiver<ChatEvent>, LoopbackServer) {
    let (connector, server) = LoopbackConnector::create();
    let endpoint = LiveEndpoint::parse("ws://loopback/ws", Some("tok".into()), "patient").unwrap();
    let policy = ReconnectPolicy::load(PolicyConfig::default(), store);
    let (session, events) = ChatSession::new(
        connector,
        endpoint,
        policy,
        Arc::new(InMemoryApi::new()),
        SessionConfig::new(Author::new(UserId::new("me"), "Me", "patient")),
    );
    (session, events, server)
}

fn drain(events: &mut mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Fail the current attempt and start the next one by hand, `count` times.
async fn fail_repeatedly(session: &mut Session, server: &LoopbackServer, count: usize) {
    for _ in 0..count {
        if session.state() == ConnectionState::Disabled {
            return;
        }
        session.reconnect();
        let index = server.latest().unwrap();
        server.fail(index, "connection refused");
        session.pump_until_quiet(QUIET).await;
    }
}

fn temp_state_file() -> PathBuf {
    std::env::temp_dir()
        .join(format!("chatlink-policy-{}", uuid::Uuid::now_v7()))
        .join("state.json")
}

#[tokio::test(start_paused = true)]
async fn fifteen_failures_disable_and_persist() {
    let store = MemoryFlagStore::default();
    let (mut session, mut events, server) = session_with(Arc::new(store.clone()));

    fail_repeatedly(&mut session, &server, 9).await;
    assert!(!drain(&mut events).contains(&ChatEvent::Warning(REPEATED_FAILURES.into())));

    fail_repeatedly(&mut session, &server, 1).await;
    assert!(drain(&mut events).contains(&ChatEvent::Warning(REPEATED_FAILURES.into())));

    fail_repeatedly(&mut session, &server, 4).await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(!store.get());

    fail_repeatedly(&mut session, &server, 1).await;
    assert_eq!(session.state(), ConnectionState::Disabled);
    assert!(store.get());
    let events = drain(&mut events);
    assert!(events.contains(&ChatEvent::Error(AUTO_DISABLED.into())));
    assert!(events.contains(&ChatEvent::ConnectionChanged(ConnectionState::Disabled)));
    assert_eq!(server.attempts(), 15);
    assert_eq!(server.live_count(), 0);
    assert!(!session.supervisor().reconnect_timer().is_armed());

    // Nothing reconnects while disabled.
    session.connect();
    session.reconnect();
    tokio::time::advance(Duration::from_secs(60)).await;
    session.pump_until_quiet(QUIET).await;
    assert_eq!(server.attempts(), 15);

    // A restart reads the flag back.
    let (mut reloaded, _events, reloaded_server) = session_with(Arc::new(store.clone()));
    assert_eq!(reloaded.state(), ConnectionState::Disabled);
    reloaded.connect();
    assert_eq!(reloaded_server.attempts(), 0);

    // Sends still work over the fallback path.
    reloaded.open_conversation(ConversationId::new("c1"));
    let receipt = reloaded
        .send(ConversationId::new("c1"), "still here".into(), vec![])
        .unwrap();
    assert_eq!(receipt.path, Delivery::Fallback);
}

#[tokio::test(start_paused = true)]
async fn enable_clears_flag_and_connects() {
    let store = MemoryFlagStore::with_value(true);
    let (mut session, _events, server) = session_with(Arc::new(store.clone()));
    assert_eq!(session.state(), ConnectionState::Disabled);

    session.enable_live();
    assert!(!store.get());
    assert_eq!(session.state(), ConnectionState::Connecting);
    assert_eq!(server.attempts(), 1);
    assert_eq!(session.supervisor().policy().consecutive_failures(), 0);

    session.disable_live();
    assert!(store.get());
    assert_eq!(session.state(), ConnectionState::Disabled);
    assert_eq!(server.client_close_code(0), Some(1000));
}

#[tokio::test(start_paused = true)]
async fn successful_connection_resets_failure_count() {
    let (mut session, _events, server) = session_with(Arc::new(MemoryFlagStore::default()));
    fail_repeatedly(&mut session, &server, 7).await;
    assert_eq!(session.supervisor().policy().consecutive_failures(), 7);

    session.reconnect();
    let index = server.latest().unwrap();
    server.accept(index);
    session.pump_until_quiet(QUIET).await;
    // Opening alone is not enough.
    assert_eq!(session.supervisor().policy().consecutive_failures(), 7);

    server.push_frame(index, r#"{"type":"system","message":"welcome"}"#);
    session.pump_until_quiet(QUIET).await;
    assert_eq!(session.supervisor().policy().consecutive_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn scheduled_retries_stop_after_max_attempts() {
    let (mut session, mut events, server) = session_with(Arc::new(MemoryFlagStore::default()));
    session.connect();
    server.fail(0, "refused");
    session.pump_until_quiet(QUIET).await;

    for _ in 0..5 {
        assert!(session.supervisor().reconnect_timer().is_armed());
        tokio::time::advance(Duration::from_secs(5)).await;
        session.pump_until_quiet(QUIET).await;
        let index = server.latest().unwrap();
        server.fail(index, "refused");
        session.pump_until_quiet(QUIET).await;
    }

    assert_eq!(server.attempts(), 6);
    assert!(!session.supervisor().reconnect_timer().is_armed());
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(drain(&mut events).contains(&ChatEvent::Error(RETRIES_EXHAUSTED.into())));
}

#[tokio::test(start_paused = true)]
async fn file_flag_survives_restart() {
    let path = temp_state_file();
    let (mut session, _events, server) = session_with(Arc::new(FileFlagStore::new(&path)));
    fail_repeatedly(&mut session, &server, 15).await;
    assert_eq!(session.state(), ConnectionState::Disabled);

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw[DISABLED_FLAG_KEY], serde_json::Value::Bool(true));

    let (reloaded, _events, _server) = session_with(Arc::new(FileFlagStore::new(&path)));
    assert_eq!(reloaded.state(), ConnectionState::Disabled);

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

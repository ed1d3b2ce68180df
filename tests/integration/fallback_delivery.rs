#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::missing_panics_doc,
    clippy::future_not_send,
    clippy::needless_pass_by_value
)]

//! The HTTP fallback path against a mock REST backend built with `axum`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use chatlink::api::http::HttpMessagingApi;
use chatlink::api::{ApiError, MessagingApi};
use chatlink::chat::{Author, ChatEvent};
use chatlink::dispatch::Delivery;
use chatlink::flag_store::MemoryFlagStore;
use chatlink::policy::{PolicyConfig, ReconnectPolicy};
use chatlink::session::{ChatSession, SessionConfig};
use chatlink::transport::LiveEndpoint;
use chatlink::transport::loopback::LoopbackConnector;
use chatlink_proto::message::{ConversationId, MessageId, UserId};

/// One request the mock backend saw.
#[derive(Debug, Clone)]
struct Seen {
    method: &'static str,
    path: String,
    auth: Option<String>,
    query: HashMap<String, String>,
    body: Option<Value>,
}

#[derive(Clone, Default)]
struct Backend {
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Backend {
    fn record(
        &self,
        method: &'static str,
        path: String,
        headers: &HeaderMap,
        query: HashMap<String, String>,
        body: Option<Value>,
    ) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        self.seen.lock().push(Seen {
            method,
            path,
            auth,
            query,
            body,
        });
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }
}

async fn post_message(
    State(backend): State<Backend>,
    Path(conversation): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    backend.record(
        "POST",
        format!("/api/chat/conversations/{conversation}/messages"),
        &headers,
        HashMap::new(),
        Some(body.clone()),
    );
    match conversation.as_str() {
        "down" => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "success": false })),
        ),
        "locked" => (
            StatusCode::OK,
            Json(json!({ "success": false, "error": "not a participant" })),
        ),
        _ => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "message": {
                    "_id": "66a1f0c2e4b0",
                    "conversationId": conversation,
                    "sender": { "id": body["userId"], "model": "Patient", "name": "Pat" },
                    "content": body["content"],
                    "createdAt": "2024-07-25T10:00:00Z",
                }
            })),
        ),
    }
}

async fn list_messages(
    State(backend): State<Backend>,
    Path(conversation): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Json<Value> {
    backend.record(
        "GET",
        format!("/api/chat/conversations/{conversation}/messages"),
        &headers,
        query,
        None,
    );
    Json(json!({
        "success": true,
        "messages": [
            {
                "_id": "m1",
                "conversationId": conversation,
                "sender": { "id": "dr", "model": "Doctor", "name": "Dr. Who" },
                "content": "take two of these",
                "createdAt": "2024-07-25T09:00:00Z",
            }
        ],
        "pagination": { "total": 41, "page": 2, "pages": 3 }
    }))
}

async fn list_conversations(
    State(backend): State<Backend>,
    Path(user): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Json<Value> {
    backend.record(
        "GET",
        format!("/api/chat/conversations/{user}"),
        &headers,
        query,
        None,
    );
    Json(json!({
        "success": true,
        "conversations": [
            {
                "_id": "c1",
                "title": "Dr. Who",
                "participants": [
                    { "id": user, "name": "Pat", "role": "patient" },
                    { "id": "dr", "name": "Dr. Who", "role": "doctor" }
                ],
                "lastMessage": {
                    "content": "see you",
                    "timestamp": "2024-07-25T09:00:00Z",
                    "senderId": "dr"
                },
                "unreadCount": 2
            }
        ],
        "pagination": { "total": 1, "page": 1, "pages": 1 }
    }))
}

async fn mark_read(
    State(backend): State<Backend>,
    Path(conversation): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    backend.record(
        "PUT",
        format!("/api/chat/conversations/{conversation}/read"),
        &headers,
        HashMap::new(),
        Some(body),
    );
    Json(json!({ "success": true }))
}

async fn start_backend() -> (String, Backend) {
    let backend = Backend::default();
    let app = Router::new()
        .route(
            "/api/chat/conversations/{id}/messages",
            post(post_message).get(list_messages),
        )
        .route("/api/chat/conversations/{id}", get(list_conversations))
        .route("/api/chat/conversations/{id}/read", put(mark_read))
        .with_state(backend.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), backend)
}

fn client(base: &str) -> HttpMessagingApi {
    HttpMessagingApi::new(base, Some("tok-123".into()), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn send_posts_body_with_bearer_token() {
    let (base, backend) = start_backend().await;
    let stored = client(&base)
        .send_message(&ConversationId::new("c1"), &UserId::new("pat"), "hello")
        .await
        .unwrap();

    assert_eq!(stored.id, MessageId::new("66a1f0c2e4b0"));
    assert_eq!(stored.content, "hello");
    assert_eq!(stored.sender.id, UserId::new("pat"));

    let seen = backend.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].path, "/api/chat/conversations/c1/messages");
    assert_eq!(seen[0].auth.as_deref(), Some("Bearer tok-123"));
    assert_eq!(
        seen[0].body,
        Some(json!({ "userId": "pat", "content": "hello" }))
    );
}

#[tokio::test]
async fn error_status_is_reported() {
    let (base, _backend) = start_backend().await;
    let err = client(&base)
        .send_message(&ConversationId::new("down"), &UserId::new("pat"), "hello")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 503, .. }));
}

#[tokio::test]
async fn success_false_is_rejected() {
    let (base, _backend) = start_backend().await;
    let err = client(&base)
        .send_message(&ConversationId::new("locked"), &UserId::new("pat"), "hello")
        .await
        .unwrap_err();
    match err {
        ApiError::Rejected(reason) => assert_eq!(reason, "not a participant"),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn history_and_conversations_carry_paging() {
    let (base, backend) = start_backend().await;
    let api = client(&base);

    let page = api
        .list_messages(&ConversationId::new("c1"), &UserId::new("pat"), 2, 20)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.pagination.unwrap().pages, 3);

    let conversations = api
        .list_conversations(&UserId::new("pat"), 1, 20)
        .await
        .unwrap();
    let summary = conversations.items[0].clone().into_conversation();
    assert_eq!(summary.unread_count, 2);
    assert_eq!(summary.participants.len(), 2);
    assert_eq!(summary.last_message.unwrap().content, "see you");

    let seen = backend.seen();
    assert_eq!(seen[0].query.get("userId").map(String::as_str), Some("pat"));
    assert_eq!(seen[0].query.get("page").map(String::as_str), Some("2"));
    assert_eq!(seen[0].query.get("limit").map(String::as_str), Some("20"));
    assert_eq!(seen[1].path, "/api/chat/conversations/pat");
}

#[tokio::test]
async fn mark_read_puts_user() {
    let (base, backend) = start_backend().await;
    client(&base)
        .mark_read(&ConversationId::new("c1"), &UserId::new("pat"))
        .await
        .unwrap();
    let seen = backend.seen();
    assert_eq!(seen[0].method, "PUT");
    assert_eq!(seen[0].body, Some(json!({ "userId": "pat" })));
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let err = client(&format!("http://{addr}"))
        .mark_read(&ConversationId::new("c1"), &UserId::new("pat"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)));
}

#[tokio::test]
async fn disconnected_session_sends_over_http() {
    let (base, backend) = start_backend().await;
    let (connector, server) = LoopbackConnector::create();
    let endpoint = LiveEndpoint::parse("ws://loopback/ws", Some("tok-123".into()), "patient").unwrap();
    let policy = ReconnectPolicy::load(
        PolicyConfig::default(),
        Arc::new(MemoryFlagStore::default()),
    );
    let (mut session, mut events) = ChatSession::new(
        connector,
        endpoint,
        policy,
        Arc::new(client(&base)),
        SessionConfig::new(Author::new(UserId::new("pat"), "Pat", "patient")),
    );
    let conversation = ConversationId::new("c1");
    session.open_conversation(conversation.clone());
    while session.dispatcher().in_flight() > 0 {
        session.pump().await;
    }
    assert_eq!(session.chat().timeline.messages().len(), 1);
    session.set_draft(&conversation, "hello doc");

    let receipt = session
        .send(conversation.clone(), "hello doc".into(), vec![])
        .unwrap();
    assert_eq!(receipt.path, Delivery::Fallback);

    let mut confirmed = None;
    for _ in 0..10 {
        session.pump_until_quiet(Duration::from_millis(100)).await;
        confirmed = session
            .chat()
            .timeline
            .messages()
            .iter()
            .find(|m| m.content == "hello doc" && !m.temporary)
            .cloned();
        if confirmed.is_some() {
            break;
        }
    }
    let confirmed = confirmed.expect("fallback send never confirmed");
    assert_eq!(confirmed.id, MessageId::new("66a1f0c2e4b0"));
    assert!(session.draft(&conversation).is_none());
    assert_eq!(server.attempts(), 0);

    let posts = backend
        .seen()
        .into_iter()
        .filter(|s| s.method == "POST")
        .count();
    assert_eq!(posts, 1);

    let mut replaced = false;
    while let Ok(event) = events.try_recv() {
        if let ChatEvent::MessageUpdated {
            previous_id: Some(previous),
            ..
        } = event
        {
            replaced |= previous == receipt.message_id;
        }
    }
    assert!(replaced);
}

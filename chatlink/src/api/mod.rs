//! Request/response fallback path.
//!
//! [`MessagingApi`] is the collaborator the dispatcher falls back to when
//! the live channel is unavailable, and the only source of conversation
//! lists and message history.
//!
//! Implementations:
//! - [`http::HttpMessagingApi`] — JSON over HTTP with `reqwest`
//! - [`memory::InMemoryApi`] — in-process stand-in for tests

pub mod http;
pub mod memory;

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chatlink_proto::message::{ConversationId, MessageId, UserId};

use crate::chat::conversations::{Conversation, LastMessage};
use crate::chat::{Author, Message, MessageStatus};

/// Errors from the fallback path.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never got a response.
    #[error("request failed: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("server returned {status} {reason}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Canonical reason phrase.
        reason: String,
    },

    /// The server answered but reported `success: false` or left out the
    /// expected payload.
    #[error("server rejected the request: {0}")]
    Rejected(String),

    /// The response body did not have the expected shape.
    #[error("unexpected response body: {0}")]
    Decode(String),

    /// A request URL could not be built.
    #[error("invalid api url: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Sender of a stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSender {
    /// User id.
    pub id: UserId,
    /// Role model name (`Patient`, `Doctor`, ...).
    #[serde(default)]
    pub model: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

/// A message as persisted by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    /// Server id.
    #[serde(rename = "_id")]
    pub id: MessageId,
    /// Conversation.
    pub conversation_id: ConversationId,
    /// Sender.
    pub sender: StoredSender,
    /// Text.
    pub content: String,
    /// Persist time.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Convert to a message list entry.
    #[must_use]
    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            temporary: false,
            conversation_id: self.conversation_id,
            sender: Author {
                id: self.sender.id,
                name: self.sender.name,
                role: self.sender.model.to_lowercase(),
            },
            content: self.content,
            timestamp: self.created_at,
            status: MessageStatus::Delivered,
            error: false,
        }
    }
}

/// A participant as listed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteParticipant {
    /// User id.
    pub id: UserId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Role tag.
    #[serde(default)]
    pub role: String,
}

/// Last-message preview as listed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLastMessage {
    /// Text.
    pub content: String,
    /// Send time.
    pub timestamp: DateTime<Utc>,
    /// Sender.
    pub sender_id: UserId,
}

/// A conversation summary as listed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConversation {
    /// Id.
    #[serde(alias = "_id")]
    pub id: ConversationId,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Participants.
    #[serde(default)]
    pub participants: Vec<RemoteParticipant>,
    /// Most recent message.
    #[serde(default)]
    pub last_message: Option<RemoteLastMessage>,
    /// Unread count for the requesting user.
    #[serde(default)]
    pub unread_count: u32,
}

impl RemoteConversation {
    /// Convert to a local summary.
    #[must_use]
    pub fn into_conversation(self) -> Conversation {
        Conversation {
            id: self.id,
            title: self.title,
            participants: self
                .participants
                .into_iter()
                .map(|p| Author::new(p.id, p.name, p.role))
                .collect(),
            last_message: self.last_message.map(|m| LastMessage {
                content: m.content,
                sender_id: m.sender_id,
                timestamp: m.timestamp,
            }),
            unread_count: self.unread_count,
        }
    }
}

/// Paging information returned with list calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Total items.
    pub total: u64,
    /// Current page, starting at 1.
    pub page: u32,
    /// Number of pages.
    pub pages: u32,
}

/// One page of a list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Paging information, if the server sent it.
    pub pagination: Option<Pagination>,
}

/// The request/response collaborator.
///
/// Futures must be `Send + 'static`-able so the dispatcher can run calls on
/// spawned tasks.
pub trait MessagingApi: Send + Sync + 'static {
    /// Persist a message. Returns the stored message with its server id.
    fn send_message(
        &self,
        conversation: &ConversationId,
        sender: &UserId,
        content: &str,
    ) -> impl Future<Output = Result<StoredMessage, ApiError>> + Send;

    /// One page of a conversation's messages.
    fn list_messages(
        &self,
        conversation: &ConversationId,
        user: &UserId,
        page: u32,
        limit: u32,
    ) -> impl Future<Output = Result<Page<StoredMessage>, ApiError>> + Send;

    /// One page of the user's conversations.
    fn list_conversations(
        &self,
        user: &UserId,
        page: u32,
        limit: u32,
    ) -> impl Future<Output = Result<Page<RemoteConversation>, ApiError>> + Send;

    /// Mark all messages of a conversation read for `user`.
    fn mark_read(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}

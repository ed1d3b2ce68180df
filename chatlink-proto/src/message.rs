//! Chat message types for the `chatlink` wire protocol.
//!
//! Identifiers are opaque strings: the backend assigns its own ids once a
//! message is persisted, while clients mint time-ordered UUID v7 ids for
//! messages that are still in flight.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed chat content size in bytes (64 KB).
pub const MAX_CONTENT_SIZE: usize = 64 * 1024;

/// Identifier of a chat message, either server-assigned or client-temporary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wraps an existing identifier (typically one assigned by the server).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a fresh client-side identifier (UUID v7, time-ordered).
    #[must_use]
    pub fn temporary() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the string form of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a conversation (direct thread or group).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wraps an existing conversation identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a user (any role).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps an existing user identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors returned when an outbound chat envelope fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Content is empty or whitespace only.
    #[error("message content is empty")]
    Empty,
    /// Content exceeds [`MAX_CONTENT_SIZE`].
    #[error("message too large: {size} bytes (max {max} bytes)")]
    TooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },
}

/// A chat message as carried over the live channel.
///
/// Outbound frames carry the client's temporary id in both `messageId` and
/// `clientMessageId`; the server echoes `clientMessageId` back so the
/// sender can match its pending entry exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEnvelope {
    /// Server-assigned id once persisted; the client's temporary id before.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    /// Temporary id chosen by the sending client, echoed by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<MessageId>,
    /// Conversation the message belongs to.
    pub conversation_id: ConversationId,
    /// Sender, filled in by the server on relay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    /// Sender role tag (e.g. `patient`, `doctor`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_type: Option<String>,
    /// Sender display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Intended recipients (outbound only).
    #[serde(
        default,
        rename = "recipients",
        alias = "recipientIds",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub recipient_ids: Vec<UserId>,
    /// Message text.
    pub content: String,
    /// Creation time (RFC 3339 on the wire).
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ChatEnvelope {
    /// Builds an outbound chat envelope tagged with a client temporary id.
    #[must_use]
    pub fn outbound(
        temp_id: MessageId,
        conversation_id: ConversationId,
        content: String,
        recipient_ids: Vec<UserId>,
    ) -> Self {
        Self {
            message_id: Some(temp_id.clone()),
            client_message_id: Some(temp_id),
            conversation_id,
            sender_id: None,
            sender_type: None,
            sender_name: None,
            recipient_ids,
            content,
            timestamp: Utc::now(),
        }
    }

    /// Validates the content of an outbound message.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the content is blank or oversized.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_content(&self.content)
    }
}

/// Validates raw message content before it is dispatched on any path.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] for blank content and
/// [`ValidationError::TooLarge`] above [`MAX_CONTENT_SIZE`].
pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    if content.len() > MAX_CONTENT_SIZE {
        return Err(ValidationError::TooLarge {
            size: content.len(),
            max: MAX_CONTENT_SIZE,
        });
    }
    Ok(())
}

/// Server acknowledgment that a chat frame was accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckEnvelope {
    /// The id the client sent (its temporary id).
    pub message_id: MessageId,
    /// Conversation of the acknowledged message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    /// Delivery status reported by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Whether at least one recipient was online.
    #[serde(default)]
    pub delivered_to_online: bool,
    /// Server time of the acknowledgment.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

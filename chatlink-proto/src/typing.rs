//! Typing indicator and read receipt frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{ConversationId, MessageId, UserId};

/// A typing indicator exchanged over the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEnvelope {
    /// Conversation where typing is occurring.
    pub conversation_id: ConversationId,
    /// Who is typing (set by the server on relay).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    /// Display name of the typist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// `true` while typing, `false` once stopped.
    pub is_typing: bool,
    /// Recipients the server should forward to (outbound only).
    #[serde(
        default,
        rename = "recipients",
        alias = "recipientIds",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub recipient_ids: Vec<UserId>,
    /// Time of the keystroke.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// A read receipt: outbound it names the original sender, inbound it names
/// the reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptEnvelope {
    /// Conversation of the message that was read.
    pub conversation_id: ConversationId,
    /// The message that was read.
    pub message_id: MessageId,
    /// Original sender of the message (outbound routing hint).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    /// Reader of the message (inbound).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_by: Option<UserId>,
    /// Reader display name (inbound).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_by_name: Option<String>,
    /// Time the receipt was issued.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

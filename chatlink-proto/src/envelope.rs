//! The tagged envelope set exchanged over the live channel.
//!
//! Every frame is a JSON object whose `"type"` field selects the variant.
//! The backend uses a few legacy spellings (`read`, `connection`,
//! `notification`) which are accepted as aliases on decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{AckEnvelope, ChatEnvelope, UserId};
use crate::typing::{ReadReceiptEnvelope, TypingEnvelope};

/// Tags accepted by [`crate::codec::decode`], including aliases.
pub const KNOWN_TYPES: &[&str] = &[
    "chat",
    "typing",
    "read_receipt",
    "read",
    "ping",
    "pong",
    "ack",
    "system",
    "connection",
    "notification",
    "error",
];

/// Top-level wire frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// A chat message.
    Chat(ChatEnvelope),
    /// A typing indicator.
    Typing(TypingEnvelope),
    /// A read receipt.
    #[serde(alias = "read")]
    ReadReceipt(ReadReceiptEnvelope),
    /// Server keepalive check; must be answered with [`Envelope::Pong`].
    Ping,
    /// Keepalive answer.
    Pong,
    /// Server acknowledgment of a chat frame.
    Ack(AckEnvelope),
    /// Informational notice (welcome, notifications).
    #[serde(alias = "connection", alias = "notification")]
    System(SystemNotice),
    /// Non-fatal error reported by the server.
    Error(ServerError),
}

impl Envelope {
    /// Returns the wire tag of this envelope.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Chat(_) => "chat",
            Self::Typing(_) => "typing",
            Self::ReadReceipt(_) => "read_receipt",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Ack(_) => "ack",
            Self::System(_) => "system",
            Self::Error(_) => "error",
        }
    }
}

/// Informational notice from the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemNotice {
    /// Human-readable text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// User the notice concerns (the welcome frame names the connected user).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Role tag of that user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    /// Server time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Error frame sent by the server for a rejected client frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Description of the problem.
    pub message: String,
}

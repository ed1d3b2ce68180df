//! Chat state owned by the session: message list, drafts, conversation
//! summaries and typing indicators, plus the [`ChatEvent`]s the UI consumes.

pub mod conversations;
pub mod draft;
pub mod timeline;
pub mod typing;

use std::time::Duration;

use chrono::{DateTime, Utc};

use chatlink_proto::message::{ChatEnvelope, ConversationId, MessageId, UserId};

use crate::transport::ConnectionState;

use conversations::ConversationList;
use draft::DraftStore;
use timeline::Timeline;
use typing::TypingTracker;

/// Delivery status of a message list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    /// Handed to a path, outcome unknown.
    Sending,
    /// Transmitted on the live channel.
    Sent,
    /// Acknowledged or persisted by the server.
    Delivered,
    /// Read by a recipient.
    Read,
    /// Both paths failed.
    Failed,
}

impl MessageStatus {
    /// Short label for display.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }
}

/// Who wrote a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    /// User id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Role tag (`patient`, `doctor`, ...).
    pub role: String,
}

impl Author {
    /// Build an author record.
    pub fn new(id: UserId, name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            role: role.into(),
        }
    }
}

/// One entry of the message list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Server id once persisted, temporary id before.
    pub id: MessageId,
    /// Whether `id` is still the client's temporary id.
    pub temporary: bool,
    /// Conversation of the message.
    pub conversation_id: ConversationId,
    /// Sender.
    pub sender: Author,
    /// Text.
    pub content: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Delivery status.
    pub status: MessageStatus,
    /// Set when the last delivery attempt failed on both paths.
    pub error: bool,
}

impl Message {
    /// A locally created entry awaiting its first delivery outcome.
    #[must_use]
    pub fn pending(
        id: MessageId,
        conversation_id: ConversationId,
        sender: Author,
        content: String,
    ) -> Self {
        Self {
            id,
            temporary: true,
            conversation_id,
            sender,
            content,
            timestamp: Utc::now(),
            status: MessageStatus::Sending,
            error: false,
        }
    }

    /// An entry built from an inbound live chat frame.
    #[must_use]
    pub fn from_envelope(id: MessageId, envelope: ChatEnvelope) -> Self {
        let sender = Author {
            id: envelope
                .sender_id
                .unwrap_or_else(|| UserId::new("unknown")),
            name: envelope.sender_name.unwrap_or_default(),
            role: envelope.sender_type.unwrap_or_default(),
        };
        Self {
            id,
            temporary: false,
            conversation_id: envelope.conversation_id,
            sender,
            content: envelope.content,
            timestamp: envelope.timestamp,
            status: MessageStatus::Delivered,
            error: false,
        }
    }
}

/// Events emitted by the session for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The live channel changed state.
    ConnectionChanged(ConnectionState),
    /// Non-fatal warning.
    Warning(String),
    /// Connection-level or fallback error, as display text.
    Error(String),
    /// Informational notice from the server.
    Notice(String),
    /// A new entry was appended to the open conversation.
    MessageAdded(Message),
    /// An entry changed. `previous_id` is set when a temporary id was
    /// replaced by the server id.
    MessageUpdated {
        /// The entry after the change.
        message: Message,
        /// The id the entry had before, if it changed.
        previous_id: Option<MessageId>,
    },
    /// A send failed on both paths; the content is now the draft.
    MessageFailed {
        /// Temporary id of the failed entry.
        message_id: MessageId,
        /// Conversation of the entry.
        conversation_id: ConversationId,
        /// Display text.
        reason: String,
    },
    /// A participant started or stopped typing.
    TypingChanged {
        /// Conversation where typing happens.
        conversation_id: ConversationId,
        /// The typist.
        user_id: UserId,
        /// Whether they are typing now.
        is_typing: bool,
    },
    /// A conversation was opened and its draft restored (possibly empty).
    DraftRestored {
        /// The opened conversation.
        conversation_id: ConversationId,
        /// The stored draft.
        text: String,
    },
    /// The conversation list was replaced from the server.
    ConversationsLoaded {
        /// Number of conversations.
        count: usize,
    },
    /// A conversation's summary changed (last message, unread count, order).
    ConversationUpdated {
        /// The conversation.
        conversation_id: ConversationId,
        /// Unread messages now pending.
        unread_count: u32,
    },
    /// Message history for the open conversation was loaded.
    HistoryLoaded {
        /// The conversation.
        conversation_id: ConversationId,
        /// Number of entries now in the list.
        count: usize,
    },
}

/// All chat state the session owns.
#[derive(Debug)]
pub struct ChatState {
    /// Entries of the open conversation.
    pub timeline: Timeline,
    /// Unsent text per conversation.
    pub drafts: DraftStore,
    /// Conversation summaries.
    pub conversations: ConversationList,
    /// Who is typing.
    pub typing: TypingTracker,
}

impl ChatState {
    /// Empty state; typing indicators decay after `typing_timeout`.
    #[must_use]
    pub fn new(typing_timeout: Duration) -> Self {
        Self {
            timeline: Timeline::default(),
            drafts: DraftStore::default(),
            conversations: ConversationList::default(),
            typing: TypingTracker::new(typing_timeout),
        }
    }
}

//! Conversation summaries: participants, last message and unread count.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use chatlink_proto::message::{ConversationId, MessageId, UserId};

use super::Author;

/// Preview of the most recent message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastMessage {
    /// Text.
    pub content: String,
    /// Sender.
    pub sender_id: UserId,
    /// When it was sent.
    pub timestamp: DateTime<Utc>,
}

/// Summary of one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// Id.
    pub id: ConversationId,
    /// Display title.
    pub title: String,
    /// Everyone in the conversation, including the local user.
    pub participants: Vec<Author>,
    /// Most recent message.
    pub last_message: Option<LastMessage>,
    /// Messages not yet seen by the local user.
    pub unread_count: u32,
}

impl Conversation {
    /// A conversation known only by id.
    #[must_use]
    pub fn placeholder(id: ConversationId) -> Self {
        Self {
            title: id.to_string(),
            id,
            participants: Vec::new(),
            last_message: None,
            unread_count: 0,
        }
    }
}

/// Inbound ids remembered per conversation for duplicate detection.
const RECENT_IDS: usize = 64;

/// Conversation summaries, most recently active first.
#[derive(Debug, Default)]
pub struct ConversationList {
    items: Vec<Conversation>,
    recent: HashMap<ConversationId, VecDeque<MessageId>>,
}

impl ConversationList {
    /// Replace all summaries with a fresh list from the server.
    pub fn replace_all(&mut self, items: Vec<Conversation>) {
        self.items = items;
    }

    /// Append a further page of summaries, skipping ids already listed.
    pub fn extend(&mut self, items: Vec<Conversation>) {
        for item in items {
            if self.get(&item.id).is_none() {
                self.items.push(item);
            }
        }
    }

    /// All summaries in display order.
    #[must_use]
    pub fn all(&self) -> &[Conversation] {
        &self.items
    }

    /// Summary of `id`.
    #[must_use]
    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.items.iter().find(|c| &c.id == id)
    }

    /// Participants of `id` other than `me`.
    #[must_use]
    pub fn recipients_of(&self, id: &ConversationId, me: &UserId) -> Vec<UserId> {
        self.get(id).map_or_else(Vec::new, |c| {
            c.participants
                .iter()
                .filter(|p| &p.id != me)
                .map(|p| p.id.clone())
                .collect()
        })
    }

    /// Record a new message: update the preview, bump unread when asked,
    /// and move the conversation to the top. Unknown conversations are
    /// added. Returns the new unread count.
    pub fn record_message(
        &mut self,
        id: &ConversationId,
        last: LastMessage,
        unread: bool,
    ) -> u32 {
        let index = self
            .items
            .iter()
            .position(|c| &c.id == id)
            .unwrap_or_else(|| {
                self.items.push(Conversation::placeholder(id.clone()));
                self.items.len() - 1
            });
        let mut conversation = self.items.remove(index);
        conversation.last_message = Some(last);
        if unread {
            conversation.unread_count = conversation.unread_count.saturating_add(1);
        }
        let unread_count = conversation.unread_count;
        self.items.insert(0, conversation);
        unread_count
    }

    /// Like [`record_message`](Self::record_message) for an inbound message
    /// with a server id. Returns `None`, changing nothing, if `message_id`
    /// was already recorded for this conversation.
    pub fn record_inbound(
        &mut self,
        id: &ConversationId,
        message_id: &MessageId,
        last: LastMessage,
        unread: bool,
    ) -> Option<u32> {
        let recent = self.recent.entry(id.clone()).or_default();
        if recent.contains(message_id) {
            return None;
        }
        if recent.len() == RECENT_IDS {
            recent.pop_front();
        }
        recent.push_back(message_id.clone());
        Some(self.record_message(id, last, unread))
    }

    /// Reset the unread count of `id`. Returns the count it had.
    pub fn mark_read(&mut self, id: &ConversationId) -> u32 {
        self.items
            .iter_mut()
            .find(|c| &c.id == id)
            .map_or(0, |c| std::mem::take(&mut c.unread_count))
    }
}

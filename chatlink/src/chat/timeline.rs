//! Message list of the open conversation and its reconciliation rules.
//!
//! Entries are matched by id only. A temporary entry is superseded when the
//! server id for it becomes known, either from the fallback response or from
//! a live echo carrying the temporary id as `clientMessageId`. An inbound
//! entry whose id is already listed is a duplicate and is dropped.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use chatlink_proto::message::{ConversationId, MessageId};

use super::{Message, MessageStatus};

/// Outcome of [`Timeline::ingest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest {
    /// A new entry was appended.
    Appended,
    /// A temporary entry took the inbound id.
    Superseded {
        /// The temporary id it had.
        previous: MessageId,
    },
    /// An entry with this id already exists.
    Duplicate,
    /// The message belongs to a conversation that is not open.
    NotOpen,
}

/// Entries of the currently open conversation, in arrival order.
#[derive(Debug, Default)]
pub struct Timeline {
    conversation: Option<ConversationId>,
    messages: Vec<Message>,
}

impl Timeline {
    /// Switch to `conversation`. Entries of the previous one are dropped.
    pub fn open(&mut self, conversation: ConversationId) {
        if self.conversation.as_ref() != Some(&conversation) {
            self.messages.clear();
            self.conversation = Some(conversation);
        }
    }

    /// The open conversation.
    #[must_use]
    pub const fn conversation(&self) -> Option<&ConversationId> {
        self.conversation.as_ref()
    }

    /// Whether `conversation` is the open one.
    #[must_use]
    pub fn is_open(&self, conversation: &ConversationId) -> bool {
        self.conversation.as_ref() == Some(conversation)
    }

    /// All entries.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Entry with `id`.
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    /// Append a locally created entry. Ignored unless its conversation is
    /// open and its id is new.
    pub fn push_pending(&mut self, message: Message) -> bool {
        if !self.is_open(&message.conversation_id) || self.position(&message.id).is_some() {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Set status and error flag of an entry.
    pub fn set_status(
        &mut self,
        id: &MessageId,
        status: MessageStatus,
        error: bool,
    ) -> Option<&Message> {
        let index = self.position(id)?;
        let entry = &mut self.messages[index];
        entry.status = status;
        entry.error = error;
        Some(entry)
    }

    /// Promote an entry to [`MessageStatus::Delivered`] unless it is already
    /// further along.
    pub fn mark_delivered(&mut self, id: &MessageId) -> Option<&Message> {
        let index = self.position(id)?;
        let entry = &mut self.messages[index];
        if matches!(entry.status, MessageStatus::Sending | MessageStatus::Sent) {
            entry.status = MessageStatus::Delivered;
            entry.error = false;
        }
        Some(entry)
    }

    /// Mark an entry read.
    pub fn mark_read(&mut self, id: &MessageId) -> Option<&Message> {
        self.set_status(id, MessageStatus::Read, false)
    }

    /// Replace the temporary id of an entry with the server id.
    ///
    /// If an entry with `server_id` is already listed (a live echo beat the
    /// response), the temporary entry is removed instead and the existing
    /// one returned.
    pub fn confirm(
        &mut self,
        temp_id: &MessageId,
        server_id: MessageId,
        timestamp: DateTime<Utc>,
    ) -> Option<Message> {
        let index = self.position(temp_id)?;
        if &server_id != temp_id {
            if let Some(existing) = self.position(&server_id) {
                let kept = self.messages[existing].clone();
                self.messages.remove(index);
                return Some(kept);
            }
        }
        let entry = &mut self.messages[index];
        entry.id = server_id;
        entry.temporary = false;
        entry.timestamp = timestamp;
        entry.status = MessageStatus::Delivered;
        entry.error = false;
        Some(entry.clone())
    }

    /// Merge an inbound entry.
    ///
    /// `client_id` is the `clientMessageId` the frame echoed, if any. When
    /// the echoed temporary entry is pending but the server id is already
    /// listed, the temporary entry is dropped and the listed one stays.
    pub fn ingest(&mut self, message: Message, client_id: Option<&MessageId>) -> Ingest {
        if !self.is_open(&message.conversation_id) {
            return Ingest::NotOpen;
        }
        if let Some(client_id) = client_id {
            let pending = self
                .position(client_id)
                .filter(|&i| self.messages[i].temporary);
            if let Some(index) = pending {
                // History already listed the persisted copy.
                if self.position(&message.id).is_some_and(|i| i != index) {
                    self.messages.remove(index);
                    return Ingest::Superseded {
                        previous: client_id.clone(),
                    };
                }
                let entry = &mut self.messages[index];
                entry.id = message.id;
                entry.temporary = false;
                entry.timestamp = message.timestamp;
                entry.status = MessageStatus::Delivered;
                entry.error = false;
                return Ingest::Superseded {
                    previous: client_id.clone(),
                };
            }
        }
        if self.position(&message.id).is_some() {
            return Ingest::Duplicate;
        }
        self.messages.push(message);
        Ingest::Appended
    }

    /// Replace the list with server history for the open conversation.
    ///
    /// Local entries that are still temporary (sending or failed) are kept
    /// after the history. Returns the resulting number of entries, or `None`
    /// if `conversation` is not open.
    pub fn replace_history(
        &mut self,
        conversation: &ConversationId,
        history: Vec<Message>,
    ) -> Option<usize> {
        if !self.is_open(conversation) {
            return None;
        }
        let mut seen = HashSet::new();
        let mut merged: Vec<Message> = history
            .into_iter()
            .filter(|m| seen.insert(m.id.clone()))
            .collect();
        merged.extend(
            self.messages
                .drain(..)
                .filter(|m| m.temporary && !seen.contains(&m.id)),
        );
        self.messages = merged;
        Some(self.messages.len())
    }

    /// Put an older page of server history in front of the list, skipping
    /// entries already present. Returns the resulting number of entries, or
    /// `None` if `conversation` is not open.
    pub fn prepend_older(
        &mut self,
        conversation: &ConversationId,
        older: Vec<Message>,
    ) -> Option<usize> {
        if !self.is_open(conversation) {
            return None;
        }
        let mut seen: HashSet<MessageId> = self.messages.iter().map(|m| m.id.clone()).collect();
        let mut merged: Vec<Message> = older
            .into_iter()
            .filter(|m| seen.insert(m.id.clone()))
            .collect();
        merged.append(&mut self.messages);
        self.messages = merged;
        Some(self.messages.len())
    }
}

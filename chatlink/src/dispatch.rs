//! Dual-path dispatcher.
//!
//! Each send takes exactly one path. While the live channel is connected
//! the chat frame is handed to it and the outcome of that hand-off is the
//! outcome of the send. Otherwise, or if the hand-off fails, one call is
//! made on the fallback [`MessagingApi`]. A send that fails there marks its
//! entry failed and parks the content in the draft store; [`Dispatcher::retry`]
//! re-dispatches it under the same temporary id.
//!
//! Fallback calls run on spawned tasks collected in a [`JoinSet`]; the
//! session drains [`Dispatcher::next_completion`] and feeds the results back
//! through [`Dispatcher::complete_send`], so all state changes happen on the
//! session task.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;

use chatlink_proto::codec;
use chatlink_proto::envelope::Envelope;
use chatlink_proto::message::{
    ChatEnvelope, ConversationId, MessageId, UserId, ValidationError, validate_content,
};
use chatlink_proto::typing::{ReadReceiptEnvelope, TypingEnvelope};

use crate::api::{ApiError, MessagingApi, Page, RemoteConversation, StoredMessage};
use crate::chat::conversations::LastMessage;
use crate::chat::{Author, ChatState, Message, MessageStatus};
use crate::supervisor::Supervisor;
use crate::transport::{ConnectionState, Connector, TransportError};

/// Which path a send took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the live channel.
    Live,
    /// Issued as a fallback call.
    Fallback,
}

/// Result of starting a send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Temporary id of the entry.
    pub message_id: MessageId,
    /// Path taken.
    pub path: Delivery,
}

/// A finished fallback call.
#[derive(Debug)]
pub enum Completion {
    /// `send_message` finished.
    Sent {
        /// Temporary id of the entry.
        temp_id: MessageId,
        /// Outcome.
        result: Result<StoredMessage, ApiError>,
    },
    /// `list_messages` finished.
    History {
        /// Conversation requested.
        conversation: ConversationId,
        /// Page requested.
        page: u32,
        /// Outcome.
        result: Result<Page<StoredMessage>, ApiError>,
    },
    /// `list_conversations` finished.
    Conversations {
        /// Page requested.
        page: u32,
        /// Outcome.
        result: Result<Page<RemoteConversation>, ApiError>,
    },
    /// `mark_read` finished.
    MarkedRead {
        /// Conversation marked.
        conversation: ConversationId,
        /// Outcome.
        result: Result<(), ApiError>,
    },
}

/// What applying a send completion did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The server persisted the message.
    Confirmed {
        /// Temporary id the entry had.
        temp_id: MessageId,
        /// Conversation.
        conversation: ConversationId,
        /// Updated entry, if the conversation is open.
        message: Option<Message>,
        /// Unread count of the conversation after the update.
        unread_count: u32,
    },
    /// Both paths failed.
    Failed {
        /// Temporary id of the entry.
        temp_id: MessageId,
        /// Conversation.
        conversation: ConversationId,
        /// Display text.
        reason: String,
    },
    /// The completion belongs to no outstanding send.
    Unknown,
}

#[derive(Debug, Clone)]
struct Outgoing {
    conversation: ConversationId,
    content: String,
    created_at: DateTime<Utc>,
    recipients: Vec<UserId>,
    failed: bool,
}

/// Chooses a path for each outbound message and runs fallback calls.
pub struct Dispatcher<A: MessagingApi> {
    api: Arc<A>,
    me: Author,
    page_size: u32,
    outbox: HashMap<MessageId, Outgoing>,
    inflight: JoinSet<Completion>,
}

impl<A: MessagingApi> Dispatcher<A> {
    /// Dispatcher sending as `me`; list calls request `page_size` items.
    pub fn new(api: Arc<A>, me: Author, page_size: u32) -> Self {
        Self {
            api,
            me,
            page_size: page_size.max(1),
            outbox: HashMap::new(),
            inflight: JoinSet::new(),
        }
    }

    /// The local user.
    #[must_use]
    pub const fn me(&self) -> &Author {
        &self.me
    }

    /// Number of fallback calls still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    /// Whether `id` is a failed send waiting for a retry.
    #[must_use]
    pub fn is_failed(&self, id: &MessageId) -> bool {
        self.outbox.get(id).is_some_and(|o| o.failed)
    }

    /// Entries for the failed sends of `conversation`, oldest first, so a
    /// reopened conversation lists them again.
    #[must_use]
    pub fn failed_entries(&self, conversation: &ConversationId) -> Vec<Message> {
        let mut entries: Vec<Message> = self
            .outbox
            .iter()
            .filter(|(_, o)| o.failed && &o.conversation == conversation)
            .map(|(id, o)| {
                let mut entry = Message::pending(
                    id.clone(),
                    o.conversation.clone(),
                    self.me.clone(),
                    o.content.clone(),
                );
                entry.timestamp = o.created_at;
                entry.status = MessageStatus::Failed;
                entry.error = true;
                entry
            })
            .collect();
        entries.sort_by_key(|m| m.timestamp);
        entries
    }

    /// Send `content` to `conversation`.
    ///
    /// # Errors
    ///
    /// [`ValidationError`] for blank or oversized content; nothing is
    /// dispatched in that case.
    pub fn send<C: Connector>(
        &mut self,
        link: &Supervisor<C>,
        chat: &mut ChatState,
        conversation: ConversationId,
        content: String,
        recipients: Vec<UserId>,
    ) -> Result<SendReceipt, ValidationError> {
        validate_content(&content)?;
        let temp_id = MessageId::temporary();
        let pending = Message::pending(
            temp_id.clone(),
            conversation.clone(),
            self.me.clone(),
            content.clone(),
        );
        let created_at = pending.timestamp;
        chat.timeline.push_pending(pending);
        chat.drafts.clear(&conversation);

        let outgoing = Outgoing {
            conversation,
            content,
            created_at,
            recipients,
            failed: false,
        };
        let path = self.dispatch(link, chat, &temp_id, &outgoing);
        if path == Delivery::Fallback {
            self.outbox.insert(temp_id.clone(), outgoing);
        }
        Ok(SendReceipt {
            message_id: temp_id,
            path,
        })
    }

    /// Re-dispatch a failed send under its original temporary id.
    ///
    /// Returns `None` if `id` is not a failed send.
    pub fn retry<C: Connector>(
        &mut self,
        link: &Supervisor<C>,
        chat: &mut ChatState,
        id: &MessageId,
    ) -> Option<SendReceipt> {
        let outgoing = self.outbox.get(id).filter(|o| o.failed)?.clone();
        tracing::info!(message_id = %id, "retrying failed message");
        chat.timeline.set_status(id, MessageStatus::Sending, false);

        let path = self.dispatch(link, chat, id, &outgoing);
        match path {
            Delivery::Live => {
                self.outbox.remove(id);
                chat.drafts.clear(&outgoing.conversation);
            }
            Delivery::Fallback => {
                if let Some(entry) = self.outbox.get_mut(id) {
                    entry.failed = false;
                }
            }
        }
        Some(SendReceipt {
            message_id: id.clone(),
            path,
        })
    }

    fn dispatch<C: Connector>(
        &mut self,
        link: &Supervisor<C>,
        chat: &mut ChatState,
        temp_id: &MessageId,
        outgoing: &Outgoing,
    ) -> Delivery {
        if link.state() == ConnectionState::Connected {
            let envelope = Envelope::Chat(ChatEnvelope::outbound(
                temp_id.clone(),
                outgoing.conversation.clone(),
                outgoing.content.clone(),
                outgoing.recipients.clone(),
            ));
            let handed_off = codec::encode(&envelope)
                .map_err(TransportError::from)
                .and_then(|text| link.transmit(text));
            match handed_off {
                Ok(()) => {
                    tracing::debug!(message_id = %temp_id, "message handed to live channel");
                    chat.timeline
                        .set_status(temp_id, MessageStatus::Sent, false);
                    return Delivery::Live;
                }
                Err(e) => {
                    tracing::warn!(message_id = %temp_id, err = %e, "live hand-off failed, using fallback");
                }
            }
        }

        tracing::debug!(message_id = %temp_id, "sending through fallback path");
        let api = Arc::clone(&self.api);
        let sender = self.me.id.clone();
        let conversation = outgoing.conversation.clone();
        let content = outgoing.content.clone();
        let temp_id = temp_id.clone();
        self.inflight.spawn(async move {
            let result = api.send_message(&conversation, &sender, &content).await;
            Completion::Sent { temp_id, result }
        });
        Delivery::Fallback
    }

    /// Apply the result of a fallback send.
    pub fn complete_send(
        &mut self,
        chat: &mut ChatState,
        temp_id: MessageId,
        result: Result<StoredMessage, ApiError>,
    ) -> SendOutcome {
        match result {
            Ok(stored) => {
                let Some(outgoing) = self.outbox.remove(&temp_id) else {
                    tracing::debug!(message_id = %temp_id, "completion for unknown send");
                    return SendOutcome::Unknown;
                };
                tracing::info!(
                    message_id = %temp_id,
                    server_id = %stored.id,
                    "message persisted through fallback path"
                );
                chat.drafts.clear(&outgoing.conversation);
                let unread_count = chat.conversations.record_message(
                    &outgoing.conversation,
                    LastMessage {
                        content: stored.content.clone(),
                        sender_id: self.me.id.clone(),
                        timestamp: stored.created_at,
                    },
                    false,
                );
                let message = chat
                    .timeline
                    .confirm(&temp_id, stored.id, stored.created_at);
                SendOutcome::Confirmed {
                    temp_id,
                    conversation: outgoing.conversation,
                    message,
                    unread_count,
                }
            }
            Err(e) => {
                let Some(outgoing) = self.outbox.get_mut(&temp_id) else {
                    tracing::debug!(message_id = %temp_id, "completion for unknown send");
                    return SendOutcome::Unknown;
                };
                tracing::warn!(message_id = %temp_id, err = %e, "fallback send failed");
                outgoing.failed = true;
                chat.timeline
                    .set_status(&temp_id, MessageStatus::Failed, true);
                chat.drafts.set(&outgoing.conversation, &outgoing.content);
                SendOutcome::Failed {
                    temp_id,
                    conversation: outgoing.conversation.clone(),
                    reason: format!("message could not be sent ({e}); it was saved as a draft"),
                }
            }
        }
    }

    /// Send a typing indicator on the live channel only.
    pub fn send_typing<C: Connector>(
        &self,
        link: &Supervisor<C>,
        conversation: &ConversationId,
        is_typing: bool,
        recipients: Vec<UserId>,
    ) -> bool {
        let envelope = Envelope::Typing(TypingEnvelope {
            conversation_id: conversation.clone(),
            sender_id: Some(self.me.id.clone()),
            sender_name: Some(self.me.name.clone()),
            is_typing,
            recipient_ids: recipients,
            timestamp: chrono::Utc::now(),
        });
        Self::send_live_only(link, &envelope)
    }

    /// Send a read receipt on the live channel only.
    pub fn send_read_receipt<C: Connector>(
        &self,
        link: &Supervisor<C>,
        conversation: &ConversationId,
        message_id: &MessageId,
        original_sender: Option<UserId>,
    ) -> bool {
        let envelope = Envelope::ReadReceipt(ReadReceiptEnvelope {
            conversation_id: conversation.clone(),
            message_id: message_id.clone(),
            sender_id: original_sender,
            read_by: Some(self.me.id.clone()),
            read_by_name: Some(self.me.name.clone()),
            timestamp: chrono::Utc::now(),
        });
        Self::send_live_only(link, &envelope)
    }

    fn send_live_only<C: Connector>(link: &Supervisor<C>, envelope: &Envelope) -> bool {
        if link.state() != ConnectionState::Connected {
            tracing::trace!(kind = envelope.kind(), "live channel down, dropping frame");
            return false;
        }
        match codec::encode(envelope)
            .map_err(TransportError::from)
            .and_then(|text| link.transmit(text))
        {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(kind = envelope.kind(), err = %e, "live-only frame dropped");
                false
            }
        }
    }

    /// Fetch one page of the user's conversations.
    pub fn load_conversations(&mut self, page: u32) {
        let api = Arc::clone(&self.api);
        let user = self.me.id.clone();
        let limit = self.page_size;
        self.inflight.spawn(async move {
            let result = api.list_conversations(&user, page, limit).await;
            Completion::Conversations { page, result }
        });
    }

    /// Fetch one page of a conversation's messages.
    pub fn load_messages(&mut self, conversation: ConversationId, page: u32) {
        let api = Arc::clone(&self.api);
        let user = self.me.id.clone();
        let limit = self.page_size;
        self.inflight.spawn(async move {
            let result = api.list_messages(&conversation, &user, page, limit).await;
            Completion::History {
                conversation,
                page,
                result,
            }
        });
    }

    /// Tell the server the user has read `conversation`.
    pub fn mark_read(&mut self, conversation: ConversationId) {
        let api = Arc::clone(&self.api);
        let user = self.me.id.clone();
        self.inflight.spawn(async move {
            let result = api.mark_read(&conversation, &user).await;
            Completion::MarkedRead {
                conversation,
                result,
            }
        });
    }

    /// Forget an outstanding send whose entry was superseded by a live echo.
    pub fn settle(&mut self, temp_id: &MessageId) {
        self.outbox.remove(temp_id);
    }

    /// Next finished fallback call, or `None` once none are running.
    pub async fn next_completion(&mut self) -> Option<Completion> {
        loop {
            match self.inflight.join_next().await? {
                Ok(completion) => return Some(completion),
                Err(e) if e.is_cancelled() => {}
                Err(e) => tracing::error!(err = %e, "fallback call panicked"),
            }
        }
    }

    /// Abort every running fallback call.
    pub fn abort_all(&mut self) {
        if !self.inflight.is_empty() {
            tracing::debug!(count = self.inflight.len(), "aborting fallback calls");
        }
        self.inflight.abort_all();
    }
}

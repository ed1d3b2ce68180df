//! In-process [`MessagingApi`] for tests and offline runs.
//!
//! Clones share state, so a test can keep one handle for inspection while
//! the session owns another.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use chatlink_proto::message::{ConversationId, MessageId, UserId};

use super::{
    ApiError, MessagingApi, Page, Pagination, RemoteConversation, StoredMessage, StoredSender,
};

/// A recorded `send_message` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCall {
    /// Target conversation.
    pub conversation: ConversationId,
    /// Sender.
    pub sender: UserId,
    /// Text.
    pub content: String,
}

#[derive(Debug, Default)]
struct Inner {
    sent: Vec<SentCall>,
    read_marks: Vec<(ConversationId, UserId)>,
    list_calls: usize,
    failing_sends: usize,
    offline: bool,
    next_id: u64,
    messages: HashMap<ConversationId, Vec<StoredMessage>>,
    conversations: Vec<RemoteConversation>,
}

/// Backend held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryApi {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryApi {
    /// An empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` sends fail.
    pub fn fail_next_sends(&self, count: usize) {
        self.inner.lock().failing_sends = count;
    }

    /// Make every call fail until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Every `send_message` call, failed ones included.
    #[must_use]
    pub fn sent_calls(&self) -> Vec<SentCall> {
        self.inner.lock().sent.clone()
    }

    /// Every `mark_read` call.
    #[must_use]
    pub fn read_marks(&self) -> Vec<(ConversationId, UserId)> {
        self.inner.lock().read_marks.clone()
    }

    /// Total calls of any kind.
    #[must_use]
    pub fn call_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.sent.len() + inner.read_marks.len() + inner.list_calls
    }

    /// Add a conversation summary.
    pub fn seed_conversation(&self, conversation: RemoteConversation) {
        self.inner.lock().conversations.push(conversation);
    }

    /// Add a stored message.
    pub fn seed_message(&self, message: StoredMessage) {
        self.inner
            .lock()
            .messages
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
    }

    /// Messages stored for `conversation`.
    #[must_use]
    pub fn stored(&self, conversation: &ConversationId) -> Vec<StoredMessage> {
        self.inner
            .lock()
            .messages
            .get(conversation)
            .cloned()
            .unwrap_or_default()
    }
}

fn offline() -> ApiError {
    ApiError::Transport("backend unreachable".to_string())
}

fn paginate<T: Clone>(items: &[T], page: u32, limit: u32) -> Page<T> {
    let limit = limit.max(1) as usize;
    let page = page.max(1);
    let start = (page as usize - 1).saturating_mul(limit);
    let total = items.len();
    let pages = u32::try_from(total.div_ceil(limit)).unwrap_or(u32::MAX);
    Page {
        items: items.iter().skip(start).take(limit).cloned().collect(),
        pagination: Some(Pagination {
            total: total as u64,
            page,
            pages,
        }),
    }
}

impl MessagingApi for InMemoryApi {
    async fn send_message(
        &self,
        conversation: &ConversationId,
        sender: &UserId,
        content: &str,
    ) -> Result<StoredMessage, ApiError> {
        let mut inner = self.inner.lock();
        inner.sent.push(SentCall {
            conversation: conversation.clone(),
            sender: sender.clone(),
            content: content.to_string(),
        });
        if inner.offline {
            return Err(offline());
        }
        if inner.failing_sends > 0 {
            inner.failing_sends -= 1;
            return Err(ApiError::Status {
                status: 503,
                reason: "Service Unavailable".to_string(),
            });
        }
        inner.next_id += 1;
        let stored = StoredMessage {
            id: MessageId::new(format!("srv-{}", inner.next_id)),
            conversation_id: conversation.clone(),
            sender: StoredSender {
                id: sender.clone(),
                model: String::new(),
                name: String::new(),
            },
            content: content.to_string(),
            created_at: Utc::now(),
        };
        inner
            .messages
            .entry(conversation.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn list_messages(
        &self,
        conversation: &ConversationId,
        _user: &UserId,
        page: u32,
        limit: u32,
    ) -> Result<Page<StoredMessage>, ApiError> {
        let mut inner = self.inner.lock();
        inner.list_calls += 1;
        if inner.offline {
            return Err(offline());
        }
        let items = inner.messages.get(conversation).map_or(&[][..], Vec::as_slice);
        Ok(paginate(items, page, limit))
    }

    async fn list_conversations(
        &self,
        _user: &UserId,
        page: u32,
        limit: u32,
    ) -> Result<Page<RemoteConversation>, ApiError> {
        let mut inner = self.inner.lock();
        inner.list_calls += 1;
        if inner.offline {
            return Err(offline());
        }
        Ok(paginate(&inner.conversations, page, limit))
    }

    async fn mark_read(&self, conversation: &ConversationId, user: &UserId) -> Result<(), ApiError> {
        let mut inner = self.inner.lock();
        inner.read_marks.push((conversation.clone(), user.clone()));
        if inner.offline {
            return Err(offline());
        }
        Ok(())
    }
}

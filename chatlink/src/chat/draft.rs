//! Per-conversation drafts.

use std::collections::HashMap;

use chatlink_proto::message::ConversationId;

/// Last unsent text for each conversation.
///
/// Blank text is never stored: setting a blank draft clears it.
#[derive(Debug, Default)]
pub struct DraftStore {
    drafts: HashMap<ConversationId, String>,
}

impl DraftStore {
    /// Record `text` as the draft of `conversation`.
    pub fn set(&mut self, conversation: &ConversationId, text: &str) {
        if text.trim().is_empty() {
            self.drafts.remove(conversation);
        } else {
            self.drafts.insert(conversation.clone(), text.to_string());
        }
    }

    /// The draft of `conversation`, if any.
    #[must_use]
    pub fn get(&self, conversation: &ConversationId) -> Option<&str> {
        self.drafts.get(conversation).map(String::as_str)
    }

    /// Drop the draft of `conversation`.
    pub fn clear(&mut self, conversation: &ConversationId) -> Option<String> {
        self.drafts.remove(conversation)
    }

    /// Number of conversations with a draft.
    #[must_use]
    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    /// Whether no conversation has a draft.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }
}

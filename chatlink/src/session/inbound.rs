//! Routing of decoded live frames into chat state.

use tokio::time::Instant;

use chatlink_proto::codec::{self, CodecError};
use chatlink_proto::envelope::Envelope;
use chatlink_proto::message::{AckEnvelope, ChatEnvelope, ConversationId, MessageId};
use chatlink_proto::typing::{ReadReceiptEnvelope, TypingEnvelope};

use super::ChatSession;
use crate::api::MessagingApi;
use crate::chat::conversations::LastMessage;
use crate::chat::timeline::Ingest;
use crate::chat::{ChatEvent, Message};
use crate::transport::Connector;

impl<C: Connector, A: MessagingApi> ChatSession<C, A> {
    pub(super) fn handle_frame(&mut self, text: &str) {
        let envelope = match codec::decode(text) {
            Ok(envelope) => envelope,
            Err(CodecError::UnknownType(kind)) => {
                tracing::debug!(%kind, "ignoring frame of unknown type");
                return;
            }
            Err(e) => {
                tracing::warn!(err = %e, "dropping malformed frame");
                return;
            }
        };
        tracing::trace!(kind = envelope.kind(), "inbound frame");

        match envelope {
            Envelope::Ping => self.answer_ping(),
            Envelope::Pong => {}
            Envelope::Chat(chat) => self.on_chat(chat),
            Envelope::Typing(typing) => self.on_typing(typing),
            Envelope::ReadReceipt(receipt) => self.on_read_receipt(&receipt),
            Envelope::Ack(ack) => self.on_ack(&ack),
            Envelope::System(notice) => {
                if let Some(message) = notice.message {
                    self.emit(ChatEvent::Notice(message));
                }
            }
            Envelope::Error(error) => {
                tracing::warn!(message = %error.message, "server reported an error");
                self.emit(ChatEvent::Error(format!("server error: {}", error.message)));
            }
        }
    }

    fn answer_ping(&self) {
        let sent = codec::encode(&Envelope::Pong)
            .map_err(crate::transport::TransportError::from)
            .and_then(|pong| self.supervisor.transmit(pong));
        if let Err(e) = sent {
            tracing::debug!(err = %e, "could not answer ping");
        }
    }

    fn on_chat(&mut self, chat: ChatEnvelope) {
        let client_id = chat.client_message_id.clone();
        let id = chat
            .message_id
            .clone()
            .or_else(|| client_id.clone())
            .unwrap_or_else(MessageId::temporary);
        if let Some(client_id) = &client_id {
            self.dispatcher.settle(client_id);
        }

        let conversation = chat.conversation_id.clone();
        let from_me = chat.sender_id.as_ref() == Some(&self.me.id);
        let last = LastMessage {
            content: chat.content.clone(),
            sender_id: chat.sender_id.clone().unwrap_or_else(|| self.me.id.clone()),
            timestamp: chat.timestamp,
        };
        let message = Message::from_envelope(id.clone(), chat);

        match self.chat.timeline.ingest(message, client_id.as_ref()) {
            Ingest::Appended => {
                if let Some(entry) = self.chat.timeline.get(&id).cloned() {
                    self.emit(ChatEvent::MessageAdded(entry));
                }
                self.record_inbound(&conversation, &id, last, false);
                if !from_me {
                    self.send_read_receipt(&conversation, &id);
                }
            }
            Ingest::Superseded { previous } => {
                if let Some(entry) = self.chat.timeline.get(&id).cloned() {
                    self.emit(ChatEvent::MessageUpdated {
                        message: entry,
                        previous_id: Some(previous),
                    });
                }
                self.record_inbound(&conversation, &id, last, false);
            }
            Ingest::Duplicate => {
                tracing::debug!(message_id = %id, "duplicate chat frame ignored");
            }
            Ingest::NotOpen => self.record_inbound(&conversation, &id, last, !from_me),
        }
    }

    fn record_inbound(
        &mut self,
        conversation: &ConversationId,
        id: &MessageId,
        last: LastMessage,
        unread: bool,
    ) {
        match self
            .chat
            .conversations
            .record_inbound(conversation, id, last, unread)
        {
            Some(unread_count) => self.emit(ChatEvent::ConversationUpdated {
                conversation_id: conversation.clone(),
                unread_count,
            }),
            None => {
                tracing::debug!(%conversation, message_id = %id, "chat frame already recorded");
            }
        }
    }

    fn on_typing(&mut self, typing: TypingEnvelope) {
        let Some(user) = typing.sender_id else {
            return;
        };
        if user == self.me.id {
            return;
        }
        let changed = self.chat.typing.observe(
            typing.conversation_id.clone(),
            user.clone(),
            typing.is_typing,
            Instant::now(),
        );
        if changed {
            self.emit(ChatEvent::TypingChanged {
                conversation_id: typing.conversation_id,
                user_id: user,
                is_typing: typing.is_typing,
            });
        }
    }

    fn on_read_receipt(&mut self, receipt: &ReadReceiptEnvelope) {
        if receipt.read_by.as_ref() == Some(&self.me.id) {
            return;
        }
        if let Some(entry) = self.chat.timeline.mark_read(&receipt.message_id).cloned() {
            self.emit(ChatEvent::MessageUpdated {
                message: entry,
                previous_id: None,
            });
        }
    }

    fn on_ack(&mut self, ack: &AckEnvelope) {
        self.dispatcher.settle(&ack.message_id);
        if let Some(entry) = self.chat.timeline.mark_delivered(&ack.message_id).cloned() {
            self.emit(ChatEvent::MessageUpdated {
                message: entry,
                previous_id: None,
            });
        }
    }
}

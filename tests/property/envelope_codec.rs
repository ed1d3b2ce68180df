//! Property-based tests for the live-channel codec.
//!
//! Uses proptest to verify:
//! 1. Any chat/typing/receipt envelope survives encode → decode.
//! 2. Arbitrary text never panics `decode` (returns `Err` gracefully).
//! 3. Well-formed objects with an unrecognized tag are always `UnknownType`.

use chatlink_proto::codec::{self, CodecError};
use chatlink_proto::envelope::{Envelope, KNOWN_TYPES};
use chatlink_proto::message::{ChatEnvelope, ConversationId, MessageId, UserId};
use chatlink_proto::typing::{ReadReceiptEnvelope, TypingEnvelope};
use chrono::{DateTime, Utc};
use proptest::prelude::*;

fn arb_id() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9-]{1,36}"
}

fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    // 2000-01-01 .. 2100-01-01 in milliseconds.
    (946_684_800_000_i64..4_102_444_800_000_i64)
        .prop_map(|ms| DateTime::from_timestamp_millis(ms).unwrap_or_default())
}

fn arb_chat() -> impl Strategy<Value = Envelope> {
    (
        proptest::option::of(arb_id()),
        proptest::option::of(arb_id()),
        arb_id(),
        proptest::option::of(arb_id()),
        prop::collection::vec(arb_id(), 0..4),
        "[^\x00]{1,512}",
        arb_timestamp(),
    )
        .prop_map(
            |(message_id, client_id, conversation, sender, recipients, content, timestamp)| {
                Envelope::Chat(ChatEnvelope {
                    message_id: message_id.map(MessageId::new),
                    client_message_id: client_id.map(MessageId::new),
                    conversation_id: ConversationId::new(conversation),
                    sender_id: sender.map(UserId::new),
                    sender_type: None,
                    sender_name: None,
                    recipient_ids: recipients.into_iter().map(UserId::new).collect(),
                    content,
                    timestamp,
                })
            },
        )
}

fn arb_envelope() -> impl Strategy<Value = Envelope> {
    prop_oneof![
        arb_chat(),
        (arb_id(), any::<bool>(), arb_timestamp()).prop_map(|(c, is_typing, timestamp)| {
            Envelope::Typing(TypingEnvelope {
                conversation_id: ConversationId::new(c),
                sender_id: None,
                sender_name: None,
                is_typing,
                recipient_ids: Vec::new(),
                timestamp,
            })
        }),
        (arb_id(), arb_id(), arb_timestamp()).prop_map(|(c, m, timestamp)| {
            Envelope::ReadReceipt(ReadReceiptEnvelope {
                conversation_id: ConversationId::new(c),
                message_id: MessageId::new(m),
                sender_id: None,
                read_by: None,
                read_by_name: None,
                timestamp,
            })
        }),
        Just(Envelope::Ping),
        Just(Envelope::Pong),
    ]
}

proptest! {
    #[test]
    fn envelope_round_trip(envelope in arb_envelope()) {
        let text = codec::encode(&envelope).unwrap();
        let decoded = codec::decode(&text).unwrap();
        prop_assert_eq!(envelope, decoded);
    }

    #[test]
    fn decode_never_panics(text in ".*") {
        let _ = codec::decode(&text);
    }

    #[test]
    fn unrecognized_tag_is_unknown_type(tag in "[a-z_]{1,16}") {
        prop_assume!(!KNOWN_TYPES.contains(&tag.as_str()));
        let frame = format!(r#"{{"type":"{tag}","content":"x"}}"#);
        let is_unknown = matches!(codec::decode(&frame), Err(CodecError::UnknownType(_)));
        prop_assert!(is_unknown);
    }
}

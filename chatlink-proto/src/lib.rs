//! Shared protocol definitions for the `chatlink` live-channel wire format.

pub mod codec;
pub mod envelope;
pub mod message;
pub mod typing;

pub use envelope::Envelope;

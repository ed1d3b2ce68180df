//! `chatlink` — chat client transport with a live WebSocket channel and an
//! HTTP fallback path.

pub mod api;
pub mod chat;
pub mod config;
pub mod dispatch;
pub mod flag_store;
pub mod policy;
pub mod session;
pub mod supervisor;
pub mod timer;
pub mod transport;

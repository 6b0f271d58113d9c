//! Room side channels

pub mod chat;

pub use chat::{ChatMessage, ChatRelay};

//! Room chat relay
//!
//! Outbound lines go straight to the signaling channel; the server echoes
//! them back, so the transcript is built from inbound `chat` messages only.

use crate::signaling::channel::SignalSink;
use crate::signaling::protocol::ClientMessage;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// One line of room chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub username: String,
    pub message: String,
    pub received_at: DateTime<Utc>,
}

/// Append-only transcript for the current room session
#[derive(Debug, Default)]
pub struct ChatRelay {
    room_id: Option<String>,
    transcript: Vec<ChatMessage>,
}

impl ChatRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh transcript for `room_id`
    pub fn open(&mut self, room_id: &str) {
        self.transcript.clear();
        self.room_id = Some(room_id.to_string());
    }

    /// Discard the transcript on room exit
    pub fn close(&mut self) {
        if !self.transcript.is_empty() {
            debug!(lines = self.transcript.len(), "Discarding chat transcript");
        }
        self.transcript.clear();
        self.room_id = None;
    }

    /// Send a line to the current room
    pub fn send(&self, sink: &dyn SignalSink, text: &str) -> Result<()> {
        let room_id = self
            .room_id
            .as_ref()
            .ok_or_else(|| Error::InvalidState("Not in a room".to_string()))?;

        let message = text.trim();
        if message.is_empty() {
            return Err(Error::InvalidState("Chat message is empty".to_string()));
        }

        sink.send(ClientMessage::Chat {
            room_id: room_id.clone(),
            message: message.to_string(),
        })
    }

    /// Append an inbound line; ignored outside a room
    pub fn receive(&mut self, username: String, message: String) -> Option<&ChatMessage> {
        if self.room_id.is_none() {
            debug!(%username, "Dropping chat received outside a room");
            return None;
        }

        self.transcript.push(ChatMessage {
            username,
            message,
            received_at: Utc::now(),
        });
        self.transcript.last()
    }

    /// Transcript, oldest first
    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;

    #[test]
    fn test_send_scoped_to_room() {
        let sink = RecordingSink::default();
        let mut chat = ChatRelay::new();
        assert!(chat.send(&sink, "hello").is_err());

        chat.open("artist_42");
        chat.send(&sink, "  hello  ").unwrap();
        assert_eq!(
            sink.sent(),
            vec![ClientMessage::Chat {
                room_id: "artist_42".to_string(),
                message: "hello".to_string()
            }]
        );

        assert!(chat.send(&sink, "   ").is_err());
        assert_eq!(sink.sent().len(), 1);
    }

    #[test]
    fn test_transcript_order_and_reset() {
        let mut chat = ChatRelay::new();
        assert!(chat.receive("early".into(), "ignored".into()).is_none());

        chat.open("lobby");
        chat.receive("a".into(), "first".into());
        chat.receive("b".into(), "second".into());
        let lines: Vec<_> = chat.transcript().iter().map(|m| m.message.as_str()).collect();
        assert_eq!(lines, ["first", "second"]);

        chat.close();
        assert!(chat.transcript().is_empty());

        chat.open("lobby");
        assert!(chat.transcript().is_empty());
    }
}

//! Shared types for the chat protocol

use chrono::{DateTime, Utc};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Opaque connection identifier, never exposed to peers
pub type ClientId = Uuid;

/// Current unix time in seconds
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Message kind, closed set. Wire tags are fixed by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Chat,
    Server,
    UserList,
    Command,
    UserCommand,
}

impl MessageType {
    pub fn wire_tag(self) -> &'static str {
        match self {
            MessageType::Chat => "MSG",
            MessageType::Server => "SRV",
            MessageType::UserList => "ULIST",
            MessageType::Command => "CMD",
            MessageType::UserCommand => "CMD_USER",
        }
    }

    pub fn from_wire_tag(tag: &str) -> Option<Self> {
        match tag {
            "MSG" => Some(MessageType::Chat),
            "SRV" => Some(MessageType::Server),
            "ULIST" => Some(MessageType::UserList),
            "CMD" => Some(MessageType::Command),
            "CMD_USER" => Some(MessageType::UserCommand),
            _ => None,
        }
    }
}

/// A routed message. `content` is post-sanitization text; for chat
/// messages `sender` is the registry username snapshotted at the
/// moment the broker accepted the message.
#[derive(Debug, Clone)]
pub struct Message {
    pub content: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    pub message_type: MessageType,
    pub recipient: Option<ClientId>,
}

impl Message {
    pub fn chat(content: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender: sender.into(),
            timestamp: Utc::now(),
            message_type: MessageType::Chat,
            recipient: None,
        }
    }

    pub fn server(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender: "Server".to_string(),
            timestamp: Utc::now(),
            message_type: MessageType::Server,
            recipient: None,
        }
    }

    pub fn user_list(csv: impl Into<String>) -> Self {
        Self {
            content: csv.into(),
            sender: "Server".to_string(),
            timestamp: Utc::now(),
            message_type: MessageType::UserList,
            recipient: None,
        }
    }
}

/// Per-session user state, mutated only through the registry
#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    /// Textual `host:port` of the remote peer
    pub address: String,
    pub connected_at: u64,
    pub last_activity: u64,
    pub message_count: u64,
}

impl User {
    pub fn new(username: impl Into<String>, address: impl Into<String>) -> Self {
        let ts = now();
        Self {
            username: username.into(),
            address: address.into(),
            connected_at: ts,
            last_activity: ts,
            message_count: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = now();
    }

    pub fn record_message(&mut self) {
        self.message_count += 1;
        self.touch();
    }

    pub fn idle_secs(&self) -> u64 {
        now().saturating_sub(self.last_activity)
    }

    pub fn session_duration_secs(&self) -> u64 {
        now().saturating_sub(self.connected_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tag_round_trip() {
        for mt in [
            MessageType::Chat,
            MessageType::Server,
            MessageType::UserList,
            MessageType::Command,
            MessageType::UserCommand,
        ] {
            assert_eq!(MessageType::from_wire_tag(mt.wire_tag()), Some(mt));
        }
        assert_eq!(MessageType::from_wire_tag("NOPE"), None);
    }

    #[test]
    fn test_user_message_count() {
        let mut user = User::new("alice", "127.0.0.1:5001");
        assert_eq!(user.message_count, 0);
        user.record_message();
        user.record_message();
        assert_eq!(user.message_count, 2);
    }
}

//! Shared types for switchboard-core

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One normalized message event produced by a channel adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Platform-native id (Slack uses the message `ts`)
    pub id: String,
    pub chat_jid: String,
    pub sender: String,
    pub sender_name: String,
    pub content: String,
    /// ISO-8601
    pub timestamp: String,
    /// Sent by the bridge's own bot identity
    #[serde(default)]
    pub is_from_me: bool,
    /// Sent by any bot, used to break feedback loops
    #[serde(default)]
    pub is_bot_message: bool,
}

/// Discovery information about a conversation, reported whether or not it is registered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMetadata {
    pub chat_jid: String,
    /// Last activity, ISO-8601
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Platform tag, e.g. "slack"
    pub channel: String,
    pub is_group: bool,
}

/// A conversation the bridge delivers full messages for.
///
/// The set is owned by whoever bootstraps the bridge; adapters only read it
/// through a [`RegisteredGroupsFn`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredGroup {
    pub name: String,
    pub folder: String,
    /// Mention pattern, e.g. "@Andy"
    pub trigger: String,
    #[serde(default)]
    pub added_at: String,
    #[serde(default = "default_requires_trigger")]
    pub requires_trigger: bool,
}

fn default_requires_trigger() -> bool {
    true
}

/// Caller-supplied lookup of registered groups keyed by JID
pub type RegisteredGroupsFn = Arc<dyn Fn() -> HashMap<String, RegisteredGroup> + Send + Sync>;

/// Events an adapter emits towards the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A normalized message for a registered chat
    Message {
        chat_jid: String,
        message: InboundMessage,
    },
    /// A conversation was observed
    ChatMetadata(ChatMetadata),
}

impl InboundEvent {
    pub fn chat_jid(&self) -> &str {
        match self {
            Self::Message { chat_jid, .. } => chat_jid,
            Self::ChatMetadata(meta) => &meta.chat_jid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_group_defaults() {
        let group: RegisteredGroup = serde_json::from_str(
            r#"{"name": "General", "folder": "general", "trigger": "@Andy"}"#,
        )
        .unwrap();
        assert!(group.requires_trigger);
        assert!(group.added_at.is_empty());
    }

    #[test]
    fn test_inbound_message_flags_default_false() {
        let msg: InboundMessage = serde_json::from_str(
            r#"{
                "id": "1700000000.000100",
                "chat_jid": "slack:C1",
                "sender": "U1",
                "sender_name": "Alice",
                "content": "hi",
                "timestamp": "2023-11-14T22:13:20.000Z"
            }"#,
        )
        .unwrap();
        assert!(!msg.is_from_me);
        assert!(!msg.is_bot_message);
    }

    #[test]
    fn test_chat_metadata_skips_missing_name() {
        let meta = ChatMetadata {
            chat_jid: "slack:D1".to_string(),
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
            name: None,
            channel: "slack".to_string(),
            is_group: false,
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(!json.contains("name"));
    }

    #[test]
    fn test_inbound_event_chat_jid() {
        let event = InboundEvent::ChatMetadata(ChatMetadata {
            chat_jid: "slack:C9".to_string(),
            timestamp: String::new(),
            name: Some("ops".to_string()),
            channel: "slack".to_string(),
            is_group: true,
        });
        assert_eq!(event.chat_jid(), "slack:C9");
    }
}

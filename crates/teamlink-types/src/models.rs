use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned member identifier.
pub type MemberSeq = i64;

/// Server-assigned room identifier.
pub type RoomSeq = i64;

/// Per-room message sequence id. Negative values are local placeholders.
pub type ChatSeq = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    Text,
    Image,
    File,
    Link,
    Emoji,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub file_seq: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Preview of the message being replied to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentRef {
    pub chat_seq: ChatSeq,
    pub sender_seq: MemberSeq,
    #[serde(default)]
    pub content: String,
}

/// One member's reaction to one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub chat_seq: ChatSeq,
    pub member_seq: MemberSeq,
    pub code: String,
}

/// A chat message as persisted by the server (or a local placeholder when
/// `chat_seq` is negative).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub chat_seq: ChatSeq,
    pub room_seq: RoomSeq,
    pub sender_seq: MemberSeq,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub file: Option<FileRef>,
    #[serde(default)]
    pub parent: Option<ParentRef>,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub read_by: Vec<MemberSeq>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// True for locally inserted entries the server has not acknowledged.
    pub fn is_optimistic(&self) -> bool {
        self.chat_seq < 0
    }

    pub fn is_read_by(&self, member: MemberSeq) -> bool {
        self.read_by.contains(&member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_server_record_with_missing_optionals() {
        let raw = r#"{
            "chatSeq": 42,
            "roomSeq": 7,
            "senderSeq": 3,
            "type": "TEXT",
            "content": "hello",
            "createdAt": "2024-05-01T09:30:00Z"
        }"#;
        let msg: ChatMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.chat_seq, 42);
        assert_eq!(msg.kind, MessageKind::Text);
        assert!(msg.read_by.is_empty());
        assert!(msg.reactions.is_empty());
        assert!(!msg.deleted);
        assert!(!msg.is_optimistic());
    }

    #[test]
    fn negative_seq_is_optimistic() {
        let raw = r#"{"chatSeq":-1714555800000,"roomSeq":7,"senderSeq":3,"type":"EMOJI","createdAt":"2024-05-01T09:30:00Z"}"#;
        let msg: ChatMessage = serde_json::from_str(raw).unwrap();
        assert!(msg.is_optimistic());
    }
}

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::models::{ChatSeq, FileRef, MemberSeq, MessageKind, RoomSeq};

/// Body published to `newMessage/{room}` when the local user sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub content: String,
    pub sender_name: String,
    pub room_name: String,
    pub room_seq: RoomSeq,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_seq: Option<ChatSeq>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
}

/// Body published to `read/room/{room}/{seq}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadPayload {
    pub member_seq: MemberSeq,
}

/// Read receipt pushed on `joinRoom/{room}`: the member has read every
/// message up to and including `chat_seq`. Extra fields are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub member_seq: MemberSeq,
    pub chat_seq: ChatSeq,
}

/// Body of a pushed broker message. JSON bodies are parsed; anything else is
/// kept as raw text so one bad message never kills a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    Raw(String),
}

impl Payload {
    pub fn parse(body: &str) -> Self {
        match serde_json::from_str(body) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Raw(body.to_string()),
        }
    }

    /// Decode a JSON payload into a typed event.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            Payload::Json(value) => T::deserialize(value),
            Payload::Raw(text) => serde_json::from_str(text),
        }
    }

    pub fn as_raw(&self) -> Option<&str> {
        match self {
            Payload::Raw(text) => Some(text),
            Payload::Json(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_json_body_falls_back_to_raw() {
        let payload = Payload::parse("hello <not json>");
        assert_eq!(payload.as_raw(), Some("hello <not json>"));
        assert!(payload.decode::<ReadReceipt>().is_err());
    }

    #[test]
    fn read_receipt_ignores_extra_fields() {
        let payload = Payload::parse(r#"{"memberSeq":5,"chatSeq":120,"roomSeq":9}"#);
        let receipt: ReadReceipt = payload.decode().unwrap();
        assert_eq!(receipt, ReadReceipt { member_seq: 5, chat_seq: 120 });
    }

    #[test]
    fn send_payload_omits_absent_references() {
        let payload = SendMessagePayload {
            content: "hi".into(),
            sender_name: "Kim".into(),
            room_name: "ops".into(),
            room_seq: 9,
            kind: MessageKind::Text,
            file: None,
            parent_seq: None,
            emoji: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "TEXT");
        assert_eq!(json["roomSeq"], 9);
        assert!(json.get("file").is_none());
        assert!(json.get("parentSeq").is_none());
    }
}

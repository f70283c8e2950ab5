use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, ChatSeq};

pub const DEFAULT_PAGE_SIZE: u32 = 30;

// -- History --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryDirection {
    Older,
    Newer,
}

/// Query string of `GET /api/chat/rooms/{room}/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    #[serde(rename = "size")]
    pub page_size: u32,
    pub direction: HistoryDirection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_seq: Option<ChatSeq>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_seq: Option<ChatSeq>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_seq: Option<ChatSeq>,
    pub include_base: bool,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self::latest(DEFAULT_PAGE_SIZE)
    }
}

impl HistoryQuery {
    /// Most recent page of a room.
    pub fn latest(page_size: u32) -> Self {
        Self {
            page_size,
            direction: HistoryDirection::Older,
            base_seq: None,
            min_seq: None,
            max_seq: None,
            include_base: false,
        }
    }

    /// Page of messages strictly older than `min_seq`.
    pub fn older_than(min_seq: ChatSeq, page_size: u32) -> Self {
        Self {
            page_size,
            direction: HistoryDirection::Older,
            base_seq: Some(min_seq),
            min_seq: Some(min_seq),
            max_seq: None,
            include_base: false,
        }
    }

    /// Attach the newest id already loaded.
    pub fn with_max_seq(mut self, max_seq: Option<ChatSeq>) -> Self {
        self.max_seq = max_seq;
        self
    }
}

/// One page of room history. `has_prev` means older messages exist,
/// `has_next` means newer ones do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub has_next: bool,
    #[serde(default)]
    pub has_prev: bool,
    #[serde(default)]
    pub min_seq: Option<ChatSeq>,
    #[serde(default)]
    pub max_seq: Option<ChatSeq>,
}

impl HistoryPage {
    pub fn has_older(&self) -> bool {
        self.has_prev
    }

    /// Batch bounds, falling back to the messages themselves when the server
    /// leaves them out.
    pub fn bounds(&self) -> Option<(ChatSeq, ChatSeq)> {
        let from_messages = || {
            let min = self.messages.iter().map(|m| m.chat_seq).min()?;
            let max = self.messages.iter().map(|m| m.chat_seq).max()?;
            Some((min, max))
        };
        match (self.min_seq, self.max_seq) {
            (Some(min), Some(max)) => Some((min, max)),
            _ => from_messages(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn older_query_serializes_camel_case() {
        let query = HistoryQuery::older_than(100, 20);
        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json["size"], 20);
        assert_eq!(json["direction"], "older");
        assert_eq!(json["baseSeq"], 100);
        assert_eq!(json["includeBase"], false);
        assert!(json.get("maxSeq").is_none());
    }

    #[test]
    fn known_max_is_sent_when_present() {
        let query = HistoryQuery::older_than(100, 20).with_max_seq(Some(130));
        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json["minSeq"], 100);
        assert_eq!(json["maxSeq"], 130);

        let query = HistoryQuery::older_than(100, 20).with_max_seq(None);
        assert!(serde_json::to_value(&query).unwrap().get("maxSeq").is_none());
    }

    #[test]
    fn bounds_fall_back_to_messages() {
        let raw = r#"{
            "messages": [
                {"chatSeq": 4, "roomSeq": 1, "senderSeq": 1, "type": "TEXT", "createdAt": "2024-05-01T09:30:00Z"},
                {"chatSeq": 2, "roomSeq": 1, "senderSeq": 1, "type": "TEXT", "createdAt": "2024-05-01T09:29:00Z"}
            ],
            "hasPrev": true
        }"#;
        let page: HistoryPage = serde_json::from_str(raw).unwrap();
        assert!(page.has_older());
        assert!(!page.has_next);
        assert_eq!(page.bounds(), Some((2, 4)));
    }
}

#![allow(dead_code)]

use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::future::BoxFuture;
use serde_json::json;
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;

use teamlink_api::{ApiError, HistorySource};
use teamlink_gateway::memory::MemoryBroker;
use teamlink_gateway::{ConnectOptions, ConnectionStatus, SubscriptionRegistry, TransportClient};
use teamlink_sync::{RoomContext, RoomSession};
use teamlink_types::api::{HistoryPage, HistoryQuery};
use teamlink_types::models::{ChatMessage, ChatSeq, MessageKind, RoomSeq};

pub const WAIT: Duration = Duration::from_secs(2);
pub const ME: i64 = 7;
pub const PARTICIPANTS: [i64; 4] = [7, 8, 9, 10];

pub enum Reply {
    Page(HistoryPage),
    Fail(u16),
    /// Resolves when the test sends the page.
    Gate(oneshot::Receiver<HistoryPage>),
}

/// History source that answers from a script, oldest reply first. An empty
/// script answers with an empty page.
#[derive(Default)]
pub struct ScriptedHistory {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<(RoomSeq, HistoryQuery)>>,
}

impl ScriptedHistory {
    pub fn reply(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Queue a reply that resolves only when the returned sender fires.
    pub fn gate(&self) -> oneshot::Sender<HistoryPage> {
        let (tx, rx) = oneshot::channel();
        self.reply(Reply::Gate(rx));
        tx
    }

    pub fn requests(&self) -> Vec<(RoomSeq, HistoryQuery)> {
        self.requests.lock().unwrap().clone()
    }

    pub async fn wait_for_requests(&self, count: usize) {
        timeout(WAIT, async {
            while self.requests().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("history request never made");
    }
}

impl HistorySource for ScriptedHistory {
    fn fetch(&self, room: RoomSeq, query: HistoryQuery) -> BoxFuture<'_, Result<HistoryPage, ApiError>> {
        self.requests.lock().unwrap().push((room, query));
        let reply = self.replies.lock().unwrap().pop_front();
        Box::pin(async move {
            match reply {
                Some(Reply::Page(page)) => Ok(page),
                Some(Reply::Fail(status)) => Err(ApiError::Status {
                    status,
                    body: "scripted failure".into(),
                }),
                Some(Reply::Gate(rx)) => rx.await.map_err(|_| ApiError::Http("gate dropped".into())),
                None => Ok(page(1, 1..=0, false)),
            }
        })
    }
}

pub fn message(room: RoomSeq, seq: ChatSeq) -> ChatMessage {
    ChatMessage {
        chat_seq: seq,
        room_seq: room,
        sender_seq: 8,
        sender_name: Some("Dana".into()),
        kind: MessageKind::Text,
        content: format!("message {}", seq),
        file: None,
        parent: None,
        emoji: None,
        read_by: Vec::new(),
        reactions: Vec::new(),
        deleted: false,
        created_at: Utc.timestamp_opt(1_700_000_000 + seq, 0).unwrap(),
    }
}

pub fn message_json(room: RoomSeq, seq: ChatSeq) -> String {
    serde_json::to_string(&message(room, seq)).unwrap()
}

pub fn receipt_json(member: i64, seq: ChatSeq) -> String {
    json!({ "memberSeq": member, "chatSeq": seq, "roomSeq": 1 }).to_string()
}

/// Page holding `seqs`, newest first, as the server sends it.
pub fn page(room: RoomSeq, seqs: RangeInclusive<ChatSeq>, has_prev: bool) -> HistoryPage {
    let messages: Vec<ChatMessage> = seqs.clone().rev().map(|s| message(room, s)).collect();
    let (min_seq, max_seq) = if messages.is_empty() {
        (None, None)
    } else {
        (Some(*seqs.start()), Some(*seqs.end()))
    };
    HistoryPage {
        messages,
        has_next: false,
        has_prev,
        min_seq,
        max_seq,
    }
}

pub fn room(room_seq: RoomSeq) -> RoomContext {
    RoomContext {
        room_seq,
        room_name: format!("room-{}", room_seq),
        me: ME,
        my_name: "Me".into(),
        participants: PARTICIPANTS.to_vec(),
    }
}

pub fn quick_options() -> ConnectOptions {
    ConnectOptions {
        heartbeat_outgoing: Duration::ZERO,
        heartbeat_incoming: Duration::ZERO,
        reconnect_delay: Duration::from_millis(50),
        ..Default::default()
    }
}

pub struct Harness {
    pub broker: MemoryBroker,
    pub client: TransportClient,
    pub registry: SubscriptionRegistry,
    pub history: Arc<ScriptedHistory>,
}

impl Harness {
    /// Everything wired, nothing connected.
    pub fn offline() -> Self {
        let broker = MemoryBroker::new();
        let client = TransportClient::new(broker.connector());
        let registry = SubscriptionRegistry::new(client.clone());
        Self {
            broker,
            client,
            registry,
            history: Arc::new(ScriptedHistory::default()),
        }
    }

    pub async fn connected() -> Self {
        let harness = Self::offline();
        harness.client.connect("memory://broker", "t", quick_options());
        timeout(WAIT, harness.client.wait_for_status(ConnectionStatus::Connected))
            .await
            .expect("never connected");
        harness
    }

    pub fn session(&self, room_seq: RoomSeq) -> RoomSession {
        RoomSession::new(room(room_seq), self.registry.clone(), self.history.clone())
    }
}

/// Wait until `cond` holds, re-checking on every timeline change.
pub async fn settle(session: &RoomSession, cond: impl Fn(&RoomSession) -> bool) {
    let mut updates = session.updates();
    timeout(WAIT, async {
        while !cond(session) {
            if updates.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .expect("timeline never settled");
}

/// Wait until a counter watch satisfies `cond`.
pub async fn settle_count(mut rx: watch::Receiver<u64>, cond: impl Fn(u64) -> bool) {
    timeout(WAIT, rx.wait_for(|n| cond(*n)))
        .await
        .expect("count never settled")
        .expect("counter dropped");
}

pub fn assert_sorted_unique(seqs: &[ChatSeq]) {
    for pair in seqs.windows(2) {
        assert!(pair[0] > pair[1], "not strictly descending: {:?}", seqs);
    }
}

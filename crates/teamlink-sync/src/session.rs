use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use teamlink_api::HistorySource;
use teamlink_gateway::SubscriptionRegistry;
use teamlink_types::api::{DEFAULT_PAGE_SIZE, HistoryQuery};
use teamlink_types::destinations;
use teamlink_types::events::{Payload, ReadPayload, ReadReceipt, SendMessagePayload};
use teamlink_types::models::{
    ChatMessage, ChatSeq, FileRef, MemberSeq, MessageKind, ParentRef, Reaction, RoomSeq,
};

use crate::aggregate::{self, ReactionSummary, ReadPartition};
use crate::cursor::PageCursor;
use crate::error::SyncError;
use crate::timeline::Timeline;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Who we are and which room this is.
#[derive(Debug, Clone)]
pub struct RoomContext {
    pub room_seq: RoomSeq,
    pub room_name: String,
    pub me: MemberSeq,
    pub my_name: String,
    pub participants: Vec<MemberSeq>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    /// First history page in flight. Pushes are already being merged.
    Opening,
    Open,
}

/// A message the local user is about to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub kind: MessageKind,
    pub content: String,
    pub file: Option<FileRef>,
    pub parent: Option<ParentRef>,
    pub emoji: Option<String>,
}

impl Draft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            content: content.into(),
            file: None,
            parent: None,
            emoji: None,
        }
    }

    pub fn emoji(code: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Emoji,
            content: String::new(),
            file: None,
            parent: None,
            emoji: Some(code.into()),
        }
    }

    pub fn file(kind: MessageKind, file: FileRef) -> Self {
        Self {
            kind,
            content: file.name.clone(),
            file: Some(file),
            parent: None,
            emoji: None,
        }
    }

    pub fn reply_to(mut self, parent: ParentRef) -> Self {
        self.parent = Some(parent);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOutcome {
    /// Negative id of the local placeholder now in the timeline.
    pub placeholder_seq: ChatSeq,
    /// False when the connection was down; the placeholder stays anyway.
    pub published: bool,
}

/// Controller for one open chat room. Merges the latest history page, older
/// pages, pushed messages and local sends into one [`Timeline`].
#[derive(Clone)]
pub struct RoomSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    room: RoomContext,
    registry: SubscriptionRegistry,
    history: Arc<dyn HistorySource>,
    page_size: u32,
    listener_key: String,
    state: Mutex<RoomState>,
    revision: watch::Sender<u64>,
}

struct RoomState {
    phase: SessionState,
    /// Bumped by `close()`. Responses carrying an older epoch are dropped.
    epoch: u64,
    timeline: Timeline,
    cursor: PageCursor,
    last_placeholder: ChatSeq,
}

impl RoomSession {
    pub fn new(
        room: RoomContext,
        registry: SubscriptionRegistry,
        history: Arc<dyn HistorySource>,
    ) -> Self {
        Self::with_page_size(room, registry, history, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(
        room: RoomContext,
        registry: SubscriptionRegistry,
        history: Arc<dyn HistorySource>,
        page_size: u32,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        let listener_key = format!(
            "room-session/{}",
            NEXT_SESSION.fetch_add(1, Ordering::Relaxed)
        );
        Self {
            inner: Arc::new(SessionInner {
                room,
                registry,
                history,
                page_size,
                listener_key,
                state: Mutex::new(RoomState {
                    phase: SessionState::Closed,
                    epoch: 0,
                    timeline: Timeline::new(),
                    cursor: PageCursor::default(),
                    last_placeholder: 0,
                }),
                revision,
            }),
        }
    }

    pub fn room(&self) -> &RoomContext {
        &self.inner.room
    }

    /// Subscribe to the room's topics and load the most recent page.
    ///
    /// Topics are registered before the fetch starts so nothing pushed in the
    /// meantime is lost. If the session is closed before the page arrives the
    /// page is dropped and `SessionClosed` is returned.
    pub async fn open(&self) -> Result<(), SyncError> {
        let room = self.inner.room.room_seq;
        let epoch = {
            let mut state = self.inner.lock();
            if state.phase != SessionState::Closed {
                debug!("Room {} already {:?}", room, state.phase);
                return Ok(());
            }
            state.phase = SessionState::Opening;
            state.epoch
        };
        info!("Opening room {}", room);
        self.register_topics();

        let result = self
            .inner
            .history
            .fetch(room, HistoryQuery::latest(self.inner.page_size))
            .await;

        let mut state = self.inner.lock();
        if state.epoch != epoch {
            warn!("Room {} closed while loading, dropping first page", room);
            return Err(SyncError::SessionClosed(room));
        }
        match result {
            Ok(page) => {
                // The opening page seeds the cursor even when pushes already
                // delivered every id it holds.
                let (has_older, bounds) = (page.has_older(), page.bounds());
                state.timeline.merge_batch(page.messages);
                state.cursor.absorb(has_older, bounds);
                state.phase = SessionState::Open;
                let loaded = state.timeline.len();
                drop(state);
                self.inner.bump();
                info!("Room {} open with {} messages", room, loaded);
                Ok(())
            }
            Err(e) => {
                warn!("Room {} failed to open: {}", room, e);
                state.phase = SessionState::Closed;
                state.timeline.clear();
                drop(state);
                self.inner.release_topics();
                self.inner.bump();
                Err(e.into())
            }
        }
    }

    /// Fetch the page before the oldest loaded message. Returns how many
    /// messages were new; zero when there is nothing older.
    pub async fn load_older(&self) -> Result<usize, SyncError> {
        let room = self.inner.room.room_seq;
        let (epoch, query) = {
            let state = self.inner.lock();
            if state.phase != SessionState::Open {
                return Err(SyncError::NotOpen(room));
            }
            match state.cursor.min_seq {
                Some(min) if state.cursor.has_older => (
                    state.epoch,
                    HistoryQuery::older_than(min, self.inner.page_size)
                        .with_max_seq(state.cursor.max_seq),
                ),
                _ => return Ok(0),
            }
        };

        let result = self.inner.history.fetch(room, query).await;

        let mut state = self.inner.lock();
        if state.epoch != epoch {
            warn!("Room {} closed while loading older page, dropping it", room);
            return Err(SyncError::SessionClosed(room));
        }
        let page = result?;
        let (has_older, bounds) = (page.has_older(), page.bounds());
        let added = state.timeline.merge_batch(page.messages);
        // Bounds only move when the page brought something new.
        state.cursor.absorb(has_older, bounds.filter(|_| !added.is_empty()));
        drop(state);

        debug!("Room {}: older page added {} messages", room, added.len());
        if !added.is_empty() {
            self.inner.bump();
        }
        Ok(added.len())
    }

    /// Insert a placeholder and publish the message. The placeholder stays
    /// whether or not the publish went out.
    pub fn send(&self, draft: Draft) -> Result<SendOutcome, SyncError> {
        let ctx = &self.inner.room;
        let placeholder_seq = {
            let mut state = self.inner.lock();
            if state.phase == SessionState::Closed {
                return Err(SyncError::NotOpen(ctx.room_seq));
            }
            let seq = next_placeholder(&mut state.last_placeholder, Utc::now().timestamp_millis());
            state.timeline.insert(ChatMessage {
                chat_seq: seq,
                room_seq: ctx.room_seq,
                sender_seq: ctx.me,
                sender_name: Some(ctx.my_name.clone()),
                kind: draft.kind,
                content: draft.content.clone(),
                file: draft.file.clone(),
                parent: draft.parent.clone(),
                emoji: draft.emoji.clone(),
                read_by: vec![ctx.me],
                reactions: Vec::new(),
                deleted: false,
                created_at: Utc::now(),
            });
            seq
        };
        self.inner.bump();

        let payload = SendMessagePayload {
            content: draft.content,
            sender_name: ctx.my_name.clone(),
            room_name: ctx.room_name.clone(),
            room_seq: ctx.room_seq,
            kind: draft.kind,
            file: draft.file,
            parent_seq: draft.parent.map(|p| p.chat_seq),
            emoji: draft.emoji,
        };
        let published = self
            .inner
            .registry
            .client()
            .publish(&destinations::new_message(ctx.room_seq), &payload);
        if !published {
            warn!(
                "Room {}: send not published, placeholder {} left in place",
                ctx.room_seq, placeholder_seq
            );
        }
        Ok(SendOutcome {
            placeholder_seq,
            published,
        })
    }

    /// Tell the server we have read up to `seq`.
    pub fn mark_read(&self, seq: ChatSeq) -> bool {
        let ctx = &self.inner.room;
        self.inner.registry.client().publish(
            &destinations::read(ctx.room_seq, seq),
            &ReadPayload { member_seq: ctx.me },
        )
    }

    /// Mark the newest server message read, if there is one.
    pub fn mark_latest_read(&self) -> bool {
        match self.inner.lock().timeline.newest_seq() {
            Some(seq) => self.mark_read(seq),
            None => false,
        }
    }

    /// Replace a message's reactions after a toggle round trip.
    pub fn update_reactions(&self, seq: ChatSeq, reactions: Vec<Reaction>) -> bool {
        let changed = self.inner.lock().timeline.replace_reactions(seq, reactions);
        if changed {
            self.inner.bump();
        }
        changed
    }

    pub fn mark_deleted(&self, seq: ChatSeq) -> bool {
        let changed = self.inner.lock().timeline.mark_deleted(seq);
        if changed {
            self.inner.bump();
        }
        changed
    }

    /// Release the room's topics and discard its timeline. In-flight history
    /// requests are left to finish; their results are dropped.
    pub fn close(&self) {
        {
            let mut state = self.inner.lock();
            if state.phase == SessionState::Closed {
                return;
            }
            state.phase = SessionState::Closed;
            state.epoch += 1;
            state.timeline.clear();
            state.cursor = PageCursor::default();
        }
        self.inner.release_topics();
        self.inner.bump();
        info!("Closed room {}", self.inner.room.room_seq);
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().phase
    }

    pub fn cursor(&self) -> PageCursor {
        self.inner.lock().cursor
    }

    /// Current timeline, newest first.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.inner.lock().timeline.messages()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().timeline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Changes every time the timeline does.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Placeholders never matched by a server message. Nothing reconciles
    /// them, so a failed send shows up here until the room is closed.
    pub fn orphaned_placeholders(&self) -> Vec<ChatSeq> {
        self.inner
            .lock()
            .timeline
            .optimistic()
            .iter()
            .map(|m| m.chat_seq)
            .collect()
    }

    pub fn reactions_for(&self, seq: ChatSeq) -> Option<Vec<ReactionSummary>> {
        let state = self.inner.lock();
        let message = state.timeline.get(seq)?;
        Some(aggregate::group_reactions(&message.reactions, self.inner.room.me))
    }

    pub fn readers_for(&self, seq: ChatSeq) -> Option<ReadPartition> {
        let state = self.inner.lock();
        let message = state.timeline.get(seq)?;
        Some(aggregate::partition_readers(
            &message.read_by,
            &self.inner.room.participants,
        ))
    }

    fn register_topics(&self) {
        let room = self.inner.room.room_seq;
        let key = &self.inner.listener_key;

        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        self.inner
            .registry
            .ensure_for(&destinations::new_message(room), key, move |payload| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_message(payload);
                }
            });

        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        self.inner
            .registry
            .ensure_for(&destinations::join_room(room), key, move |payload| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_read(payload);
                }
            });
    }
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().expect("room state lock poisoned")
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    fn release_topics(&self) {
        let room = self.room.room_seq;
        self.registry
            .release_for(&destinations::new_message(room), &self.listener_key);
        self.registry
            .release_for(&destinations::join_room(room), &self.listener_key);
    }

    fn on_message(&self, payload: Payload) {
        let message: ChatMessage = match payload.decode() {
            Ok(message) => message,
            Err(e) => {
                warn!("Room {}: ignoring malformed message push: {}", self.room.room_seq, e);
                return;
            }
        };
        if message.room_seq != self.room.room_seq {
            debug!(
                "Room {}: push for room {} ignored",
                self.room.room_seq, message.room_seq
            );
            return;
        }
        let seq = message.chat_seq;
        let added = {
            let mut state = self.lock();
            if state.phase == SessionState::Closed {
                return;
            }
            state.timeline.insert(message)
        };
        if added {
            debug!("Room {}: pushed message {}", self.room.room_seq, seq);
            self.bump();
        }
    }

    fn on_read(&self, payload: Payload) {
        let receipt: ReadReceipt = match payload.decode() {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!("Room {}: ignoring malformed read receipt: {}", self.room.room_seq, e);
                return;
            }
        };
        let changed = {
            let mut state = self.lock();
            if state.phase == SessionState::Closed {
                return;
            }
            state.timeline.apply_read(receipt.member_seq, receipt.chat_seq)
        };
        if changed > 0 {
            self.bump();
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.release_topics();
    }
}

/// Next placeholder id: minus the current unix millis, pushed further down
/// when that would not be below the previous one.
fn next_placeholder(last: &mut ChatSeq, now_millis: i64) -> ChatSeq {
    let candidate = -now_millis;
    let seq = if *last != 0 && candidate >= *last {
        *last - 1
    } else {
        candidate
    };
    *last = seq;
    seq
}

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;
use tracing::{debug, trace};

use teamlink_gateway::SubscriptionRegistry;
use teamlink_types::destinations;
use teamlink_types::events::Payload;
use teamlink_types::models::RoomSeq;

/// Listener key the counter registers under, so it never displaces a room
/// session's handler on the same topic.
pub const UNREAD_LISTENER: &str = "unread-counter";

/// Global unread badge. Keeps a standing subscription to every joined room
/// and counts each pushed message for a room other than the active one.
///
/// Independent of any [`RoomSession`](crate::RoomSession): a message seen
/// by an open session of an inactive room is still counted.
#[derive(Clone)]
pub struct UnreadAggregator {
    inner: Arc<UnreadInner>,
}

struct UnreadInner {
    registry: SubscriptionRegistry,
    state: Mutex<UnreadState>,
    count: watch::Sender<u64>,
}

#[derive(Default)]
struct UnreadState {
    joined: BTreeSet<RoomSeq>,
    active: Option<RoomSeq>,
}

impl UnreadAggregator {
    pub fn new(registry: SubscriptionRegistry) -> Self {
        let (count, _) = watch::channel(0);
        Self {
            inner: Arc::new(UnreadInner {
                registry,
                state: Mutex::new(UnreadState::default()),
                count,
            }),
        }
    }

    /// Replace the joined-room list. Every joined room is (re)ensured and
    /// rooms no longer joined are released.
    pub fn set_joined_rooms<I>(&self, rooms: I)
    where
        I: IntoIterator<Item = RoomSeq>,
    {
        let next: BTreeSet<RoomSeq> = rooms.into_iter().collect();
        let left: Vec<RoomSeq> = {
            let mut state = self.inner.lock();
            let left = state.joined.difference(&next).copied().collect();
            state.joined = next.clone();
            left
        };

        for room in &left {
            self.inner
                .registry
                .release_for(&destinations::new_message(*room), UNREAD_LISTENER);
        }
        for &room in &next {
            let weak: Weak<UnreadInner> = Arc::downgrade(&self.inner);
            self.inner.registry.ensure_for(
                &destinations::new_message(room),
                UNREAD_LISTENER,
                move |payload| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_message(room, payload);
                    }
                },
            );
        }
        debug!("Unread counter watching {} rooms, left {}", next.len(), left.len());
    }

    pub fn joined_rooms(&self) -> Vec<RoomSeq> {
        self.inner.lock().joined.iter().copied().collect()
    }

    /// Room whose messages are not counted (the one on screen).
    pub fn set_active_room(&self, room: Option<RoomSeq>) {
        self.inner.lock().active = room;
    }

    pub fn active_room(&self) -> Option<RoomSeq> {
        self.inner.lock().active
    }

    pub fn count(&self) -> u64 {
        *self.inner.count.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<u64> {
        self.inner.count.subscribe()
    }

    pub fn reset(&self) {
        self.inner.count.send_replace(0);
    }
}

impl UnreadInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, UnreadState> {
        self.state.lock().expect("unread state lock poisoned")
    }

    fn on_message(&self, room: RoomSeq, _payload: Payload) {
        {
            let state = self.lock();
            if state.active == Some(room) || !state.joined.contains(&room) {
                return;
            }
        }
        self.count.send_modify(|n| *n += 1);
        trace!("Unread +1 from room {}", room);
    }
}

impl Drop for UnreadInner {
    fn drop(&mut self) {
        let joined = std::mem::take(&mut self.lock().joined);
        for room in joined {
            self.registry
                .release_for(&destinations::new_message(room), UNREAD_LISTENER);
        }
    }
}

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEventKind {
    Open,
    Close,
    Error,
}

/// Connection lifecycle event delivered to listeners.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// CONNECTED received. `generation` identifies this connection.
    Open { generation: u64 },
    /// The link is gone. Every wire subscription died with it.
    Close { reason: String },
    Error { error: Arc<TransportError> },
}

impl ConnectionEvent {
    pub fn kind(&self) -> ConnectionEventKind {
        match self {
            ConnectionEvent::Open { .. } => ConnectionEventKind::Open,
            ConnectionEvent::Close { .. } => ConnectionEventKind::Close,
            ConnectionEvent::Error { .. } => ConnectionEventKind::Error,
        }
    }
}

pub type Listener = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Observer list keyed by event kind. Registration order is preserved.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<BTreeMap<ListenerId, (ConnectionEventKind, Listener)>>,
}

impl Listeners {
    pub fn add(&self, kind: ConnectionEventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .expect("listener lock poisoned")
            .insert(id, (kind, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        self.entries
            .lock()
            .expect("listener lock poisoned")
            .remove(&id)
            .is_some()
    }

    /// Call every listener for the event's kind. Runs on a snapshot with the
    /// lock released, so listeners may add or remove listeners.
    pub fn emit(&self, event: &ConnectionEvent) {
        let kind = event.kind();
        let snapshot: Vec<Listener> = self
            .entries
            .lock()
            .expect("listener lock poisoned")
            .values()
            .filter(|(k, _)| *k == kind)
            .map(|(_, l)| l.clone())
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }
}

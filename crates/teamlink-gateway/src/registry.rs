use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info};

use teamlink_types::events::Payload;

use crate::client::{MessageHandler, TransportClient, Unsubscribe};
use crate::listeners::{ConnectionEventKind, ListenerId};

/// Listener key used by [`SubscriptionRegistry::ensure`].
pub const DEFAULT_LISTENER: &str = "default";

type Handlers = Arc<RwLock<Vec<(String, MessageHandler)>>>;

/// Keeps at most one wire subscription per logical topic and rebuilds all
/// of them after every reconnect.
///
/// The desired set (topics with at least one handler) is the source of
/// truth. Wire subscriptions are derived from it: created when a topic is
/// first ensured while connected, and recreated from a snapshot of the
/// desired set on every `open` event.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    client: TransportClient,
    topics: Mutex<BTreeMap<String, TopicEntry>>,
    resubscribing: AtomicBool,
    /// A pass was requested; cleared by whoever runs it.
    pending: AtomicBool,
    listener_ids: Vec<ListenerId>,
}

struct TopicEntry {
    handlers: Handlers,
    live: Option<Unsubscribe>,
}

impl TopicEntry {
    fn is_current(&self, generation: Option<u64>) -> bool {
        generation.is_some() && self.live.as_ref().and_then(Unsubscribe::generation) == generation
    }
}

impl SubscriptionRegistry {
    pub fn new(client: TransportClient) -> Self {
        let inner = Arc::new_cyclic(|weak: &std::sync::Weak<RegistryInner>| {
            let on_open = weak.clone();
            let open_id = client.on(ConnectionEventKind::Open, move |_| {
                if let Some(inner) = on_open.upgrade() {
                    SubscriptionRegistry { inner }.resubscribe();
                }
            });
            let on_close = weak.clone();
            let close_id = client.on(ConnectionEventKind::Close, move |_| {
                if let Some(inner) = on_close.upgrade() {
                    SubscriptionRegistry { inner }.forget_live();
                }
            });
            RegistryInner {
                client: client.clone(),
                topics: Mutex::new(BTreeMap::new()),
                resubscribing: AtomicBool::new(false),
                pending: AtomicBool::new(false),
                listener_ids: vec![open_id, close_id],
            }
        });
        Self { inner }
    }

    pub fn client(&self) -> &TransportClient {
        &self.inner.client
    }

    /// Register `handler` for `topic` under the default listener key. A
    /// second call replaces the handler without a second wire subscription.
    pub fn ensure<F>(&self, topic: &str, handler: F)
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        self.ensure_for(topic, DEFAULT_LISTENER, handler);
    }

    /// Register `handler` for `topic` under `key`. Different keys share the
    /// topic's single wire subscription; the same key replaces in place.
    pub fn ensure_for<F>(&self, topic: &str, key: &str, handler: F)
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        let handler: MessageHandler = Arc::new(handler);
        let mut topics = self.lock();
        let entry = topics.entry(topic.to_string()).or_insert_with(|| TopicEntry {
            handlers: Arc::new(RwLock::new(Vec::new())),
            live: None,
        });

        {
            let mut handlers = entry.handlers.write().expect("handlers lock poisoned");
            match handlers.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = handler,
                None => handlers.push((key.to_string(), handler)),
            }
        }

        let generation = self.inner.client.session_generation();
        if entry.is_current(generation) {
            return;
        }
        if generation.is_none() {
            debug!("{} desired, waiting for the next open", topic);
            return;
        }
        entry.live = self.subscribe_wire(topic, &entry.handlers);
    }

    /// Drop the default listener of `topic`. Safe to repeat.
    pub fn release(&self, topic: &str) {
        self.release_for(topic, DEFAULT_LISTENER);
    }

    /// Drop the `key` listener of `topic`. The wire subscription goes away
    /// with the last listener.
    pub fn release_for(&self, topic: &str, key: &str) {
        let mut topics = self.lock();
        let Some(entry) = topics.get_mut(topic) else {
            return;
        };
        let now_empty = {
            let mut handlers = entry.handlers.write().expect("handlers lock poisoned");
            handlers.retain(|(k, _)| k != key);
            handlers.is_empty()
        };
        if !now_empty {
            return;
        }
        if let Some(entry) = topics.remove(topic) {
            debug!("Released {}", topic);
            if let Some(live) = entry.live {
                live.unsubscribe();
            }
        }
    }

    /// Re-issue every desired subscription that is not live on the current
    /// connection. Runs on every `open`. A call that lands while a pass is
    /// running is queued, and the running caller does one more pass for it.
    pub fn resubscribe(&self) {
        self.inner.pending.store(true, Ordering::Release);
        self.drain_pending();
    }

    fn drain_pending(&self) {
        while !self.inner.resubscribing.swap(true, Ordering::AcqRel) {
            while self.inner.pending.swap(false, Ordering::AcqRel) {
                self.resubscribe_pass();
            }
            self.inner.resubscribing.store(false, Ordering::Release);
            // A request may have been queued after the last check.
            if !self.inner.pending.load(Ordering::Acquire) {
                return;
            }
        }
        debug!("Resubscribe already running, pass queued");
    }

    fn resubscribe_pass(&self) {
        let generation = self.inner.client.session_generation();
        let desired = self.desired_topics();
        let mut restored = 0;
        if generation.is_some() {
            for topic in &desired {
                let mut topics = self.lock();
                // Released since the snapshot was taken.
                let Some(entry) = topics.get_mut(topic) else {
                    continue;
                };
                if entry.is_current(generation) {
                    continue;
                }
                entry.live = self.subscribe_wire(topic, &entry.handlers);
                if entry.live.is_some() {
                    restored += 1;
                }
            }
        }
        info!("Resubscribed {} of {} topics", restored, desired.len());
    }

    /// Topics that currently have at least one listener.
    pub fn desired_topics(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Number of topics with a wire subscription on the live connection.
    pub fn live_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|e| e.live.as_ref().is_some_and(Unsubscribe::is_live))
            .count()
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.lock()
            .get(topic)
            .map(|e| e.handlers.read().expect("handlers lock poisoned").len())
            .unwrap_or(0)
    }

    fn forget_live(&self) {
        let mut topics = self.lock();
        for entry in topics.values_mut() {
            entry.live = None;
        }
    }

    fn subscribe_wire(&self, topic: &str, handlers: &Handlers) -> Option<Unsubscribe> {
        let handlers = handlers.clone();
        let fan_out: MessageHandler = Arc::new(move |payload: Payload| {
            let snapshot: Vec<MessageHandler> = handlers
                .read()
                .expect("handlers lock poisoned")
                .iter()
                .map(|(_, h)| h.clone())
                .collect();
            for handler in snapshot {
                handler(payload.clone());
            }
        });
        let handle = self.inner.client.subscribe(topic, fan_out);
        handle.generation().is_some().then_some(handle)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, TopicEntry>> {
        self.inner.topics.lock().expect("registry lock poisoned")
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        for id in &self.listener_ids {
            self.client.off(*id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::memory::MemoryBroker;
    use crate::{ConnectOptions, ConnectionStatus};

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn request_during_a_running_pass_is_not_lost() {
        let broker = MemoryBroker::new();
        let client = TransportClient::new(broker.connector());
        let options = ConnectOptions {
            heartbeat_outgoing: Duration::ZERO,
            heartbeat_incoming: Duration::ZERO,
            reconnect_delay: Duration::ZERO,
            ..Default::default()
        };
        client.connect("memory://broker", "t", options);
        timeout(WAIT, client.wait_for_status(ConnectionStatus::Connected))
            .await
            .unwrap();

        let registry = SubscriptionRegistry::new(client.clone());
        registry.ensure("newMessage/1", |_| {});
        registry.ensure("newMessage/2", |_| {});
        assert_eq!(registry.live_count(), 2);

        // The link dropped its subscriptions while another pass is underway.
        registry.forget_live();
        registry.inner.resubscribing.store(true, Ordering::Release);

        registry.resubscribe();
        assert_eq!(registry.live_count(), 0);
        assert!(registry.inner.pending.load(Ordering::Acquire));

        // The running pass finishes and picks up the queued request.
        registry.inner.resubscribing.store(false, Ordering::Release);
        registry.drain_pending();
        assert_eq!(registry.live_count(), 2);
        assert!(!registry.inner.pending.load(Ordering::Acquire));
        assert!(!registry.inner.resubscribing.load(Ordering::Acquire));
    }
}

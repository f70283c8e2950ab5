use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use teamlink_types::events::Payload;

use crate::connection;
use crate::connector::{Connector, WebSocketConnector};
use crate::destination::DestinationResolver;
use crate::frame::Frame;
use crate::listeners::{ConnectionEvent, ConnectionEventKind, ListenerId, Listeners};
use crate::options::ConnectOptions;
use crate::token::TokenProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Callback for MESSAGE frames on one subscription. Runs on the connection
/// task, so it must not block.
pub type MessageHandler = Arc<dyn Fn(Payload) + Send + Sync>;

/// The single shared broker connection. Cheap to clone; every clone drives
/// the same connection.
#[derive(Clone)]
pub struct TransportClient {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    connector: Arc<dyn Connector>,
    status: watch::Sender<ConnectionStatus>,
    pub(crate) listeners: Listeners,
    link: Mutex<Option<LinkHandle>>,
    supervisor: Mutex<Option<Supervisor>>,
    generation: AtomicU64,
    next_sub_id: AtomicU64,
}

/// Routes from subscription id to handler for one live connection.
pub(crate) type Routes = Arc<Mutex<HashMap<String, Route>>>;

pub(crate) struct Route {
    pub destination: String,
    pub handler: MessageHandler,
}

/// What the rest of the client sees of a live connection.
pub(crate) struct LinkHandle {
    pub generation: u64,
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub routes: Routes,
    pub resolver: DestinationResolver,
}

struct Supervisor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TransportClient {
    pub fn new(connector: impl Connector) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(ClientInner {
                connector: Arc::new(connector),
                status,
                listeners: Listeners::default(),
                link: Mutex::new(None),
                supervisor: Mutex::new(None),
                generation: AtomicU64::new(0),
                next_sub_id: AtomicU64::new(0),
            }),
        }
    }

    /// Client over a real websocket.
    pub fn websocket() -> Self {
        Self::new(WebSocketConnector)
    }

    /// Start connecting. No-op while connecting or connected. Otherwise any
    /// pending reconnect is abandoned and a fresh attempt starts now.
    pub fn connect(
        &self,
        endpoint: impl Into<String>,
        token: impl Into<TokenProvider>,
        options: ConnectOptions,
    ) {
        let mut supervisor = self.inner.supervisor.lock().expect("supervisor lock poisoned");
        let status = self.status();
        if matches!(status, ConnectionStatus::Connecting | ConnectionStatus::Connected) {
            debug!("Connect() ignored, already {}", status);
            return;
        }
        if let Some(old) = supervisor.take() {
            old.cancel.cancel();
        }

        let endpoint = endpoint.into();
        info!("Connecting to {}", endpoint);
        self.inner.set_status(ConnectionStatus::Connecting);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(connection::supervise(
            self.inner.clone(),
            endpoint,
            token.into(),
            options,
            cancel.clone(),
        ));
        *supervisor = Some(Supervisor { cancel, task });
    }

    /// Close the connection and stop reconnecting. Every wire subscription is
    /// gone afterwards. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        let supervisor = self
            .inner
            .supervisor
            .lock()
            .expect("supervisor lock poisoned")
            .take();
        if let Some(supervisor) = supervisor {
            supervisor.cancel.cancel();
            if let Err(e) = supervisor.task.await {
                warn!("Connection task ended abnormally: {}", e);
            }
            info!("Disconnected");
        }
        self.inner.clear_link(None);
        self.inner.set_status(ConnectionStatus::Disconnected);
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.link.lock().expect("link lock poisoned").is_some()
    }

    /// Generation of the live connection, if any. Bumped on every CONNECTED.
    pub fn session_generation(&self) -> Option<u64> {
        self.inner
            .link
            .lock()
            .expect("link lock poisoned")
            .as_ref()
            .map(|l| l.generation)
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Resolves once the status equals `target`.
    pub async fn wait_for_status(&self, target: ConnectionStatus) {
        let mut rx = self.watch_status();
        let _ = rx.wait_for(|s| *s == target).await;
    }

    pub fn on<F>(&self, kind: ConnectionEventKind, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(kind, Arc::new(listener))
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Serialize `payload` as JSON and SEND it. Returns false without
    /// queueing anything when not connected.
    pub fn publish<T: Serialize + ?Sized>(&self, destination: &str, payload: &T) -> bool {
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                warn!("Could not serialize payload for {}: {}", destination, e);
                return false;
            }
        };
        let link = self.inner.link.lock().expect("link lock poisoned");
        let Some(link) = link.as_ref() else {
            debug!("Publish to {} dropped, not connected", destination);
            return false;
        };
        let path = link.resolver.publish(destination);
        link.outbound.send(Frame::send(&path, json)).is_ok()
    }

    /// Subscribe on the live connection. While disconnected this returns a
    /// no-op handle and the caller must subscribe again after the next open.
    pub fn subscribe(&self, destination: &str, handler: MessageHandler) -> Unsubscribe {
        let link = self.inner.link.lock().expect("link lock poisoned");
        let Some(link) = link.as_ref() else {
            debug!("Subscribe to {} skipped, not connected", destination);
            return Unsubscribe::noop(destination);
        };

        let id = format!("sub-{}", self.inner.next_sub_id.fetch_add(1, Ordering::Relaxed));
        let path = link.resolver.subscribe(destination);
        link.routes.lock().expect("routes lock poisoned").insert(
            id.clone(),
            Route {
                destination: destination.to_string(),
                handler,
            },
        );
        if link.outbound.send(Frame::subscribe(&id, &path)).is_err() {
            link.routes.lock().expect("routes lock poisoned").remove(&id);
            return Unsubscribe::noop(destination);
        }
        debug!("Subscribed {} as {} ({})", destination, id, path);

        Unsubscribe {
            destination: destination.to_string(),
            live: Some(LiveSubscription {
                client: Arc::downgrade(&self.inner),
                id,
                generation: link.generation,
            }),
        }
    }
}

impl ClientInner {
    pub(crate) fn connector(&self) -> Arc<dyn Connector> {
        self.connector.clone()
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn install_link(&self, link: LinkHandle) {
        *self.link.lock().expect("link lock poisoned") = Some(link);
    }

    /// Forget the live link. With `Some(generation)` only that connection's
    /// link is cleared.
    pub(crate) fn clear_link(&self, generation: Option<u64>) {
        let mut link = self.link.lock().expect("link lock poisoned");
        let matches = match (link.as_ref(), generation) {
            (Some(current), Some(g)) => current.generation == g,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if matches {
            *link = None;
        }
    }

    pub(crate) fn emit(&self, event: ConnectionEvent) {
        self.listeners.emit(&event);
    }
}

/// Handle returned by [`TransportClient::subscribe`]. Only affects the
/// connection it was created on; after a reconnect it does nothing.
#[must_use = "dropping the handle keeps the subscription but loses the way to cancel it"]
pub struct Unsubscribe {
    destination: String,
    live: Option<LiveSubscription>,
}

struct LiveSubscription {
    client: Weak<ClientInner>,
    id: String,
    generation: u64,
}

impl Unsubscribe {
    fn noop(destination: &str) -> Self {
        Self {
            destination: destination.to_string(),
            live: None,
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Connection generation this subscription belongs to.
    pub fn generation(&self) -> Option<u64> {
        self.live.as_ref().map(|l| l.generation)
    }

    /// True while the connection that created this subscription is up.
    pub fn is_live(&self) -> bool {
        let Some(live) = &self.live else {
            return false;
        };
        let Some(client) = live.client.upgrade() else {
            return false;
        };
        let link = client.link.lock().expect("link lock poisoned");
        match link.as_ref() {
            Some(l) if l.generation == live.generation => l
                .routes
                .lock()
                .expect("routes lock poisoned")
                .contains_key(&live.id),
            _ => false,
        }
    }

    pub fn unsubscribe(self) {
        let Some(live) = self.live else {
            return;
        };
        let Some(client) = live.client.upgrade() else {
            return;
        };
        let link = client.link.lock().expect("link lock poisoned");
        let Some(link) = link.as_ref().filter(|l| l.generation == live.generation) else {
            return;
        };
        let removed = link
            .routes
            .lock()
            .expect("routes lock poisoned")
            .remove(&live.id);
        if let Some(route) = removed {
            debug!("Unsubscribing {} ({})", route.destination, live.id);
            let _ = link.outbound.send(Frame::unsubscribe(&live.id));
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("destination", &self.destination)
            .field("generation", &self.generation())
            .finish()
    }
}

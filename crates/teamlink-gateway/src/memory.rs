//! In-process STOMP broker for tests. Speaks the same text
//! frames as a real broker but never leaves the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{sink, stream};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, trace};

use crate::connector::{Connector, Link};
use crate::error::TransportError;
use crate::frame::{self, Command, Frame};

/// Handle to a shared in-memory broker. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

#[derive(Default)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    changed: Notify,
}

struct BrokerState {
    accepting: bool,
    reject_with: Option<String>,
    heart_beat: String,
    next_session: u64,
    next_message: u64,
    sessions: HashMap<u64, Session>,
    frames: Vec<Frame>,
    tokens: Vec<String>,
    endpoints: Vec<String>,
    heartbeats_received: usize,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            accepting: true,
            reject_with: None,
            heart_beat: "0,0".into(),
            next_session: 0,
            next_message: 0,
            sessions: HashMap::new(),
            frames: Vec::new(),
            tokens: Vec::new(),
            endpoints: Vec::new(),
            heartbeats_received: 0,
        }
    }
}

struct Session {
    to_client: mpsc::UnboundedSender<String>,
    connected: bool,
    /// subscription id -> destination
    subscriptions: HashMap<String, String>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector whose links terminate in this broker.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            broker: self.clone(),
        }
    }

    /// When false, new links fail as if the network were down.
    pub fn set_accepting(&self, accepting: bool) {
        self.lock().accepting = accepting;
    }

    /// Answer CONNECT with an ERROR frame carrying `message`.
    pub fn reject_connects(&self, message: Option<&str>) {
        self.lock().reject_with = message.map(str::to_string);
    }

    /// Value of the `heart-beat` header sent in CONNECTED.
    pub fn set_heart_beat(&self, value: &str) {
        self.lock().heart_beat = value.to_string();
    }

    /// Deliver `body` to every subscription on `destination`. Returns the
    /// number of MESSAGE frames sent.
    pub fn push(&self, destination: &str, body: &str) -> usize {
        let mut state = self.lock();
        state.next_message += 1;
        let message_id = state.next_message;
        let mut delivered = 0;
        for session in state.sessions.values().filter(|s| s.connected) {
            for (id, dest) in &session.subscriptions {
                if dest != destination {
                    continue;
                }
                let frame = Frame::new(Command::Message)
                    .with_header("subscription", id.as_str())
                    .with_header("message-id", message_id.to_string())
                    .with_header("destination", destination)
                    .with_header("content-type", "application/json")
                    .with_body(body.to_string());
                if session.to_client.send(frame.encode()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Send raw text to every connected client.
    pub fn push_raw(&self, text: &str) {
        for session in self.lock().sessions.values() {
            let _ = session.to_client.send(text.to_string());
        }
    }

    /// Send an ERROR frame to every connected client.
    pub fn send_error(&self, message: &str) {
        let frame = Frame::new(Command::Error).with_header("message", message);
        self.push_raw(&frame.encode());
    }

    /// Drop every link, as a network outage would.
    pub fn drop_connections(&self) {
        let dropped = {
            let mut state = self.lock();
            std::mem::take(&mut state.sessions)
        };
        debug!("Memory broker dropped {} sessions", dropped.len());
        self.inner.changed.notify_waiters();
    }

    /// Every client frame received so far with the given command.
    pub fn frames(&self, command: Command) -> Vec<Frame> {
        self.lock()
            .frames
            .iter()
            .filter(|f| f.command == command)
            .cloned()
            .collect()
    }

    /// SEND frames addressed to `destination`.
    pub fn sends_to(&self, destination: &str) -> Vec<Frame> {
        self.frames(Command::Send)
            .into_iter()
            .filter(|f| f.header("destination") == Some(destination))
            .collect()
    }

    /// Destinations of the live subscriptions of all sessions, sorted.
    pub fn active_subscriptions(&self) -> Vec<String> {
        let state = self.lock();
        let mut out: Vec<String> = state
            .sessions
            .values()
            .flat_map(|s| s.subscriptions.values().cloned())
            .collect();
        out.sort();
        out
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.values().filter(|s| s.connected).count()
    }

    pub fn connect_count(&self) -> usize {
        self.lock().tokens.len()
    }

    pub fn last_token(&self) -> Option<String> {
        self.lock().tokens.last().cloned()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.lock().endpoints.clone()
    }

    pub fn heartbeats_received(&self) -> usize {
        self.lock().heartbeats_received
    }

    pub async fn wait_for_subscriptions(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |s| {
            s.sessions.values().map(|x| x.subscriptions.len()).sum::<usize>() == count
        })
        .await
    }

    pub async fn wait_for_connects(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |s| s.tokens.len() >= count).await
    }

    pub async fn wait_for_sends(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |s| {
            s.frames.iter().filter(|f| f.command == Command::Send).count() >= count
        })
        .await
    }

    async fn wait_until(&self, timeout: Duration, cond: impl Fn(&BrokerState) -> bool) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.inner.changed.notified();
                if cond(&self.lock()) {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.inner.state.lock().expect("broker lock poisoned")
    }

    fn open_session(&self, endpoint: &str) -> Result<Link, TransportError> {
        let (to_client, from_broker) = mpsc::unbounded_channel::<String>();
        let (to_broker, from_client) = mpsc::unbounded_channel::<String>();

        let session_id = {
            let mut state = self.lock();
            if !state.accepting {
                return Err(TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    reason: "connection refused".into(),
                });
            }
            state.endpoints.push(endpoint.to_string());
            state.next_session += 1;
            let id = state.next_session;
            state.sessions.insert(
                id,
                Session {
                    to_client,
                    connected: false,
                    subscriptions: HashMap::new(),
                },
            );
            id
        };

        tokio::spawn(self.clone().serve(session_id, from_client));

        let sink = sink::unfold(to_broker, |tx, text: String| async move {
            tx.send(text).map_err(|_| TransportError::Closed)?;
            Ok::<_, TransportError>(tx)
        });
        let stream = stream::unfold(from_broker, |mut rx| async move {
            rx.recv().await.map(|text| (Ok(text), rx))
        });
        Ok(Link {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }

    async fn serve(self, session_id: u64, mut from_client: mpsc::UnboundedReceiver<String>) {
        while let Some(text) = from_client.recv().await {
            if frame::is_heartbeat(&text) {
                self.lock().heartbeats_received += 1;
                continue;
            }
            let frame = match Frame::decode(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("Memory broker got bad frame: {}", e);
                    continue;
                }
            };
            trace!("Memory broker <- {}", frame.command);
            let keep_going = self.handle(session_id, frame);
            self.inner.changed.notify_waiters();
            if !keep_going {
                break;
            }
        }
        self.lock().sessions.remove(&session_id);
        self.inner.changed.notify_waiters();
    }

    fn handle(&self, session_id: u64, frame: Frame) -> bool {
        let mut state = self.lock();
        state.frames.push(frame.clone());
        let reject = state.reject_with.clone();
        let heart_beat = state.heart_beat.clone();
        if frame.command == Command::Connect {
            let token = frame
                .header("Authorization")
                .map(|v| v.trim_start_matches("Bearer ").to_string())
                .unwrap_or_default();
            state.tokens.push(token);
        }
        let Some(session) = state.sessions.get_mut(&session_id) else {
            return false;
        };

        match frame.command {
            Command::Connect => match reject {
                Some(message) => {
                    let error = Frame::new(Command::Error).with_header("message", message);
                    let _ = session.to_client.send(error.encode());
                    state.sessions.remove(&session_id);
                    false
                }
                None => {
                    session.connected = true;
                    let connected = Frame::new(Command::Connected)
                        .with_header("version", "1.2")
                        .with_header("heart-beat", heart_beat);
                    let _ = session.to_client.send(connected.encode());
                    true
                }
            },
            Command::Subscribe => {
                if let (Some(id), Some(dest)) = (frame.header("id"), frame.header("destination")) {
                    session.subscriptions.insert(id.to_string(), dest.to_string());
                }
                true
            }
            Command::Unsubscribe => {
                if let Some(id) = frame.header("id") {
                    session.subscriptions.remove(id);
                }
                true
            }
            Command::Disconnect => {
                state.sessions.remove(&session_id);
                false
            }
            _ => true,
        }
    }
}

/// [`Connector`] for a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryConnector {
    broker: MemoryBroker,
}

impl Connector for MemoryConnector {
    fn open(&self, endpoint: &str) -> BoxFuture<'static, Result<Link, TransportError>> {
        let result = self.broker.open_session(endpoint);
        Box::pin(async move { result })
    }
}

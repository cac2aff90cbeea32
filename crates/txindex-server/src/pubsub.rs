//! Topic-based pub/sub over websocket connections.
//!
//! Clients send JSON frames `{"action", "topic", "message"}`:
//!
//! | action        | effect                                            |
//! |---------------|---------------------------------------------------|
//! | `watchTxs`    | subscribe to `topic` (an address)                 |
//! | `unsubscribe` | drop the subscription to `topic`                  |
//! | `publish`     | fan `message` out to every subscriber of `topic`  |
//!
//! The sync driver publishes through the same hub via [`Publisher`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use txindex_core::notify::Publisher;

pub type ClientId = u64;

pub const ACTION_SUBSCRIBE: &str = "watchTxs";
pub const ACTION_UNSUBSCRIBE: &str = "unsubscribe";
pub const ACTION_PUBLISH: &str = "publish";

/// A frame received from a client.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub action: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub message: serde_json::Value,
}

/// Frames queued per client before it is treated as too slow and dropped.
pub const DEFAULT_CLIENT_BUFFER: usize = 256;

#[derive(Default)]
struct HubInner {
    clients: HashMap<ClientId, mpsc::Sender<String>>,
    topics: HashMap<String, HashSet<ClientId>>,
}

impl HubInner {
    fn remove(&mut self, id: ClientId) -> bool {
        self.topics.retain(|_, subscribers| {
            subscribers.remove(&id);
            !subscribers.is_empty()
        });
        self.clients.remove(&id).is_some()
    }
}

/// Registry of connected clients and their topic subscriptions.
pub struct PubSub {
    next_id: AtomicU64,
    client_buffer: usize,
    inner: Mutex<HubInner>,
}

impl Default for PubSub {
    fn default() -> Self {
        Self::with_client_buffer(DEFAULT_CLIENT_BUFFER)
    }
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hub whose clients may each have at most `client_buffer` frames
    /// waiting to be written.
    pub fn with_client_buffer(client_buffer: usize) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            client_buffer: client_buffer.max(1),
            inner: Mutex::new(HubInner::default()),
        }
    }

    /// Register a client and queue its greeting. Frames for the client
    /// arrive on the returned receiver.
    pub fn add_client(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(self.client_buffer);
        let _ = tx.try_send(format!("Hello Client ID:{id}"));
        self.inner.lock().clients.insert(id, tx);
        tracing::info!(client = id, "ws client connected");
        (id, rx)
    }

    /// Forget a client and every subscription it holds.
    pub fn remove_client(&self, id: ClientId) {
        if self.inner.lock().remove(id) {
            tracing::info!(client = id, "ws client disconnected");
        }
    }

    /// Returns `false` if the client was already subscribed.
    pub fn subscribe(&self, id: ClientId, topic: &str) -> bool {
        self.inner
            .lock()
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(id)
    }

    pub fn unsubscribe(&self, id: ClientId, topic: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(subscribers) = inner.topics.get_mut(topic) else {
            return false;
        };
        let removed = subscribers.remove(&id);
        if subscribers.is_empty() {
            inner.topics.remove(topic);
        }
        removed
    }

    /// Send `payload` to every subscriber of `topic`. Returns the number of
    /// clients it was queued for.
    ///
    /// A client whose buffer is full is disconnected: its sender is dropped,
    /// which ends its socket writer.
    pub fn broadcast(&self, topic: &str, payload: &str) -> usize {
        let mut inner = self.inner.lock();
        let Some(subscribers) = inner.topics.get(topic) else {
            return 0;
        };

        let mut sent = 0;
        let mut dropped = Vec::new();
        for id in subscribers {
            let Some(tx) = inner.clients.get(id) else {
                continue;
            };
            match tx.try_send(payload.to_string()) {
                Ok(()) => sent += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(client = id, topic = %topic, "ws client too slow, disconnecting");
                    dropped.push(*id);
                }
                Err(TrySendError::Closed(_)) => dropped.push(*id),
            }
        }

        for id in dropped {
            inner.remove(id);
        }
        sent
    }

    /// Apply one client frame. Malformed frames and unknown actions are
    /// logged and ignored.
    pub fn handle_message(&self, id: ClientId, raw: &str) {
        let msg: ClientMessage = match serde_json::from_str(raw) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(client = id, error = %e, "ignoring malformed frame");
                return;
            }
        };
        match msg.action.as_str() {
            ACTION_SUBSCRIBE => {
                self.subscribe(id, &msg.topic);
                tracing::debug!(client = id, topic = %msg.topic, "subscribed");
            }
            ACTION_UNSUBSCRIBE => {
                self.unsubscribe(id, &msg.topic);
                tracing::debug!(client = id, topic = %msg.topic, "unsubscribed");
            }
            ACTION_PUBLISH => {
                let sent = self.broadcast(&msg.topic, &msg.message.to_string());
                tracing::debug!(client = id, topic = %msg.topic, sent, "client publish");
            }
            other => tracing::debug!(client = id, action = %other, "ignoring unknown action"),
        }
    }

    pub fn client_count(&self) -> usize {
        self.inner.lock().clients.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.lock().topics.get(topic).map_or(0, HashSet::len)
    }
}

impl Publisher for PubSub {
    fn publish(&self, topic: &str, payload: &str) {
        self.broadcast(topic, payload);
    }
}

/// Drive one upgraded websocket until either side closes.
pub async fn handle_socket(socket: WebSocket, hub: Arc<PubSub>) {
    let (id, mut outbound) = hub.add_client();
    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => hub.handle_message(id, &text),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(client = id, error = %e, "ws read failed");
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    hub.remove_client(id);
    writer.abort();
}

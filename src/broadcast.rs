//! Broadcast hub: fan-out of session events to connected participants.
//!
//! Every connection owns a bounded outbound queue. Sends never wait: a
//! connection whose queue is full is dropped from the hub, which ends its
//! socket task once the already-queued events are flushed. No replay buffer
//! is kept; late joiners catch up through a session snapshot.

use crate::protocol::ServerMessage;
use crate::types::{ConnectionId, Identity, Role};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default per-connection outbound queue length
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

type SubscriberMap = HashMap<ConnectionId, Subscriber>;

struct Subscriber {
    identity: Option<Identity>,
    tx: mpsc::Sender<ServerMessage>,
}

#[derive(Clone)]
pub struct BroadcastHub {
    subscribers: Arc<Mutex<SubscriberMap>>,
    capacity: usize,
}

/// Scoped subscription handle; unsubscribes on drop
pub struct Subscription {
    id: ConnectionId,
    rx: mpsc::Receiver<ServerMessage>,
    hub: Weak<Mutex<SubscriberMap>>,
}

impl Subscription {
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Next queued event. `None` once the hub has let go of this connection
    /// and everything queued before that has been handed out.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }

    /// Non-blocking variant, mostly for tests
    pub fn try_recv(&mut self) -> Option<ServerMessage> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.hub.upgrade() {
            subscribers.lock().remove(&self.id);
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Register a new connection
    pub fn subscribe(&self, role: Role) -> Subscription {
        let id = ulid::Ulid::new().to_string();
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.lock().insert(
            id.clone(),
            Subscriber {
                identity: None,
                tx,
            },
        );
        tracing::debug!(connection_id = %id, ?role, "Subscribed connection");

        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.subscribers),
        }
    }

    /// Attach the joined identity to a connection so it can be addressed directly
    pub fn bind_identity(&self, connection_id: &str, identity: &str) -> bool {
        match self.subscribers.lock().get_mut(connection_id) {
            Some(sub) => {
                sub.identity = Some(identity.to_string());
                true
            }
            None => false,
        }
    }

    /// Send to every connection. Returns how many queues accepted the event.
    pub fn broadcast(&self, msg: ServerMessage) -> usize {
        self.deliver(|_| true, msg)
    }

    /// Send to whichever connection currently carries `identity`
    pub fn send_to_identity(&self, identity: &str, msg: ServerMessage) -> bool {
        self.deliver(|sub| sub.identity.as_deref() == Some(identity), msg) > 0
    }

    pub fn send_to_connection(&self, connection_id: &str, msg: ServerMessage) -> bool {
        let mut subscribers = self.subscribers.lock();
        let Some(sub) = subscribers.get(connection_id) else {
            return false;
        };
        match sub.tx.try_send(msg) {
            Ok(()) => true,
            Err(e) => {
                Self::log_drop(connection_id, &e);
                subscribers.remove(connection_id);
                false
            }
        }
    }

    /// Forcibly end a connection's delivery. Events already queued are still
    /// handed to the socket task before its subscription reports closed.
    pub fn close_connection(&self, connection_id: &str) -> bool {
        let removed = self.subscribers.lock().remove(connection_id).is_some();
        if removed {
            tracing::debug!(connection_id, "Closed connection delivery");
        }
        removed
    }

    pub fn connection_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    #[cfg(test)]
    fn is_subscribed(&self, connection_id: &str) -> bool {
        self.subscribers.lock().contains_key(connection_id)
    }

    fn deliver(&self, filter: impl Fn(&Subscriber) -> bool, msg: ServerMessage) -> usize {
        let mut subscribers = self.subscribers.lock();
        let mut delivered = 0;
        let mut dropped = Vec::new();

        for (id, sub) in subscribers.iter() {
            if !filter(sub) {
                continue;
            }
            match sub.tx.try_send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    Self::log_drop(id, &e);
                    dropped.push(id.clone());
                }
            }
        }

        for id in dropped {
            subscribers.remove(&id);
        }
        delivered
    }

    fn log_drop(connection_id: &str, err: &TrySendError<ServerMessage>) {
        match err {
            TrySendError::Full(_) => tracing::warn!(
                connection_id,
                "Outbound queue full, disconnecting slow connection"
            ),
            TrySendError::Closed(_) => {
                tracing::debug!(connection_id, "Receiver gone, dropping subscriber")
            }
        }
    }
}

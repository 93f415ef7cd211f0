use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use uuid::Uuid;

pub mod events;
pub mod handlers;
pub mod message_types;

/// Live connection table: one user may hold many connections, each
/// connection subscribes to the conversations it has joined. Delivery is
/// best-effort and at-most-once per connection; a send failure means the
/// connection is gone and it is pruned on the spot. The registry is never
/// authoritative — clients re-sync from the ledger on reconnect.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<Uuid, ConnectionHandle>,
    /// conversation -> subscribed connections
    rooms: HashMap<Uuid, HashSet<Uuid>>,
    /// user -> connections
    users: HashMap<Uuid, HashSet<Uuid>>,
}

struct ConnectionHandle {
    user_id: Uuid,
    subscriptions: HashSet<Uuid>,
    tx: UnboundedSender<Message>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an authenticated connection and returns its id plus the
    /// receiving half the socket task forwards to the client.
    pub async fn register(&self, user_id: Uuid) -> (Uuid, UnboundedReceiver<Message>) {
        let (tx, rx) = unbounded_channel();
        let connection_id = Uuid::new_v4();
        let mut guard = self.inner.write().await;
        guard.connections.insert(
            connection_id,
            ConnectionHandle {
                user_id,
                subscriptions: HashSet::new(),
                tx,
            },
        );
        guard.users.entry(user_id).or_default().insert(connection_id);
        (connection_id, rx)
    }

    pub async fn unregister(&self, connection_id: Uuid) {
        let mut guard = self.inner.write().await;
        guard.remove_connection(connection_id);
    }

    /// Subscribes a connection to a conversation's room. Callers must have
    /// confirmed active participation first.
    pub async fn subscribe(&self, connection_id: Uuid, conversation_id: Uuid) {
        let mut guard = self.inner.write().await;
        if let Some(handle) = guard.connections.get_mut(&connection_id) {
            handle.subscriptions.insert(conversation_id);
        } else {
            return;
        }
        guard
            .rooms
            .entry(conversation_id)
            .or_default()
            .insert(connection_id);
    }

    /// Drops every subscription a user holds on one conversation, used when
    /// the user leaves it.
    pub async fn unsubscribe_user(&self, conversation_id: Uuid, user_id: Uuid) {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let conns: Vec<Uuid> = inner
            .users
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for connection_id in conns {
            if let Some(handle) = inner.connections.get_mut(&connection_id) {
                handle.subscriptions.remove(&conversation_id);
            }
        }
        let mut room_empty = false;
        if let Some(room) = inner.rooms.get_mut(&conversation_id) {
            let connections = &inner.connections;
            room.retain(|conn| connections.get(conn).map(|h| h.user_id) != Some(user_id));
            room_empty = room.is_empty();
        }
        if room_empty {
            inner.rooms.remove(&conversation_id);
        }
    }

    /// Fan-out to every connection subscribed to the conversation.
    pub async fn broadcast_room(&self, conversation_id: Uuid, msg: Message) {
        let mut guard = self.inner.write().await;
        let targets: Vec<Uuid> = guard
            .rooms
            .get(&conversation_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        guard.send_each(&targets, &msg);
    }

    /// Fan-out to every live connection (presence changes).
    pub async fn broadcast_all(&self, msg: Message) {
        let mut guard = self.inner.write().await;
        let targets: Vec<Uuid> = guard.connections.keys().copied().collect();
        guard.send_each(&targets, &msg);
    }

    /// Deliver to a single connection (typed error events).
    pub async fn send_to(&self, connection_id: Uuid, msg: Message) {
        let mut guard = self.inner.write().await;
        let delivered = match guard.connections.get(&connection_id) {
            Some(handle) => handle.tx.send(msg).is_ok(),
            None => true,
        };
        if !delivered {
            guard.remove_connection(connection_id);
        }
    }

    #[cfg(test)]
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}

impl RegistryInner {
    fn send_each(&mut self, targets: &[Uuid], msg: &Message) {
        let mut dead = Vec::new();
        for connection_id in targets {
            if let Some(handle) = self.connections.get(connection_id) {
                if handle.tx.send(msg.clone()).is_err() {
                    dead.push(*connection_id);
                }
            }
        }
        for connection_id in dead {
            self.remove_connection(connection_id);
        }
    }

    fn remove_connection(&mut self, connection_id: Uuid) {
        let Some(handle) = self.connections.remove(&connection_id) else {
            return;
        };
        for conversation_id in &handle.subscriptions {
            let mut room_empty = false;
            if let Some(room) = self.rooms.get_mut(conversation_id) {
                room.remove(&connection_id);
                room_empty = room.is_empty();
            }
            if room_empty {
                self.rooms.remove(conversation_id);
            }
        }
        let mut user_empty = false;
        if let Some(conns) = self.users.get_mut(&handle.user_id) {
            conns.remove(&connection_id);
            user_empty = conns.is_empty();
        }
        if user_empty {
            self.users.remove(&handle.user_id);
        }
    }
}

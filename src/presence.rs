//! In-memory presence and typing state.
//!
//! `PresenceTracker` owns the user -> live-connection mapping and the
//! per-conversation typing sets. It records transitions and returns facts
//! about them; broadcasting and the durable presence mirror live in
//! `services::presence_service`, which keeps this state machine testable
//! without sockets.
//!
//! Typing entries carry a generation counter. The expiry task scheduled for
//! a `typing_start` captures the generation it saw; a refresh bumps the
//! generation, so a stale task's `expire_typing` call is a no-op instead of
//! clearing a newer indicator. Cleared entries make pending tasks no-ops the
//! same way, so timers never need explicit cancellation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default, Clone)]
pub struct PresenceTracker {
    inner: Arc<RwLock<TrackerInner>>,
}

#[derive(Default)]
struct TrackerInner {
    /// user -> open connection ids
    connections: HashMap<Uuid, HashSet<Uuid>>,
    /// conversation -> (typing user -> generation)
    typing: HashMap<Uuid, HashMap<Uuid, u64>>,
    /// user -> conversations they are currently typing in
    typing_by_user: HashMap<Uuid, HashSet<Uuid>>,
    next_generation: u64,
}

/// What actually changed when a connection closed.
#[derive(Debug)]
pub struct DisconnectOutcome {
    /// True when this was the user's last open connection.
    pub went_offline: bool,
    /// Conversations whose typing indicator for this user was cleared and
    /// still needs a `is_typing: false` broadcast.
    pub cleared_typing: Vec<Uuid>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection; returns true when the user transitioned to
    /// online (first connection).
    pub async fn connect(&self, user_id: Uuid, connection_id: Uuid) -> bool {
        let mut guard = self.inner.write().await;
        let conns = guard.connections.entry(user_id).or_default();
        let came_online = conns.is_empty();
        conns.insert(connection_id);
        came_online
    }

    /// Unregisters a connection. Typing state is cleared only when the last
    /// connection closes; with another device still connected the user may
    /// legitimately still be typing.
    pub async fn disconnect(&self, user_id: Uuid, connection_id: Uuid) -> DisconnectOutcome {
        let mut guard = self.inner.write().await;
        let mut went_offline = false;
        if let Some(conns) = guard.connections.get_mut(&user_id) {
            conns.remove(&connection_id);
            went_offline = conns.is_empty();
        }
        if went_offline {
            guard.connections.remove(&user_id);
        }

        let mut cleared_typing = Vec::new();
        if went_offline {
            if let Some(conversations) = guard.typing_by_user.remove(&user_id) {
                for conversation_id in conversations {
                    let mut now_empty = false;
                    if let Some(set) = guard.typing.get_mut(&conversation_id) {
                        if set.remove(&user_id).is_some() {
                            cleared_typing.push(conversation_id);
                        }
                        now_empty = set.is_empty();
                    }
                    if now_empty {
                        guard.typing.remove(&conversation_id);
                    }
                }
            }
        }

        DisconnectOutcome {
            went_offline,
            cleared_typing,
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.read().await.connections.contains_key(&user_id)
    }

    /// Marks the user as typing and returns the generation the caller's
    /// expiry task must present to `expire_typing`.
    pub async fn start_typing(&self, conversation_id: Uuid, user_id: Uuid) -> u64 {
        let mut guard = self.inner.write().await;
        guard.next_generation += 1;
        let generation = guard.next_generation;
        guard
            .typing
            .entry(conversation_id)
            .or_default()
            .insert(user_id, generation);
        guard
            .typing_by_user
            .entry(user_id)
            .or_default()
            .insert(conversation_id);
        generation
    }

    /// Explicit stop; returns whether the user was actually typing (callers
    /// skip the broadcast otherwise).
    pub async fn stop_typing(&self, conversation_id: Uuid, user_id: Uuid) -> bool {
        let mut guard = self.inner.write().await;
        guard.clear_typing(conversation_id, user_id)
    }

    /// Timer-driven stop. Clears the indicator only when the generation
    /// still matches, i.e. no refresh happened since the timer was set.
    pub async fn expire_typing(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        generation: u64,
    ) -> bool {
        let mut guard = self.inner.write().await;
        let current = guard
            .typing
            .get(&conversation_id)
            .and_then(|set| set.get(&user_id))
            .copied();
        if current != Some(generation) {
            return false;
        }
        guard.clear_typing(conversation_id, user_id)
    }

    pub async fn typing_users(&self, conversation_id: Uuid) -> Vec<Uuid> {
        self.inner
            .read()
            .await
            .typing
            .get(&conversation_id)
            .map(|set| set.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl TrackerInner {
    fn clear_typing(&mut self, conversation_id: Uuid, user_id: Uuid) -> bool {
        let mut removed = false;
        let mut conversation_empty = false;
        if let Some(set) = self.typing.get_mut(&conversation_id) {
            removed = set.remove(&user_id).is_some();
            conversation_empty = set.is_empty();
        }
        if conversation_empty {
            self.typing.remove(&conversation_id);
        }

        let mut user_empty = false;
        if let Some(convs) = self.typing_by_user.get_mut(&user_id) {
            convs.remove(&conversation_id);
            user_empty = convs.is_empty();
        }
        if user_empty {
            self.typing_by_user.remove(&user_id);
        }
        removed
    }
}

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppResult;
use crate::models::{PresenceRecord, PresenceState};
use crate::presence::PresenceTracker;
use crate::services::collections::PRESENCE;
use crate::services::conversation_service::ConversationService;
use crate::services::to_doc;
use crate::store::DocumentStore;
use crate::websocket::events::{broadcast_global, broadcast_to_conversation, GatewayEvent};
use crate::websocket::ConnectionRegistry;

pub struct PresenceService;

impl PresenceService {
    /// A user's first live connection flips them online; later connections
    /// from other devices are silent.
    pub async fn connect(
        store: Arc<dyn DocumentStore>,
        registry: &ConnectionRegistry,
        tracker: &PresenceTracker,
        user_id: Uuid,
        connection_id: Uuid,
    ) {
        if tracker.connect(user_id, connection_id).await {
            let record = PresenceRecord {
                user_id,
                state: PresenceState::Online,
                last_seen_at: Utc::now(),
            };
            broadcast_global(
                registry,
                &GatewayEvent::UserPresence {
                    user_id,
                    state: record.state,
                    last_seen_at: record.last_seen_at,
                },
            )
            .await;
            mirror_presence(store, record);
        }
    }

    /// The last connection dropping flips the user offline and withdraws
    /// any typing indicators they still held.
    pub async fn disconnect(
        store: Arc<dyn DocumentStore>,
        registry: &ConnectionRegistry,
        tracker: &PresenceTracker,
        user_id: Uuid,
        connection_id: Uuid,
    ) {
        let outcome = tracker.disconnect(user_id, connection_id).await;

        for conversation_id in outcome.cleared_typing {
            broadcast_to_conversation(
                registry,
                conversation_id,
                &GatewayEvent::UserTyping {
                    conversation_id,
                    user_id,
                    is_typing: false,
                },
            )
            .await;
        }

        if outcome.went_offline {
            let record = PresenceRecord {
                user_id,
                state: PresenceState::Offline,
                last_seen_at: Utc::now(),
            };
            broadcast_global(
                registry,
                &GatewayEvent::UserPresence {
                    user_id,
                    state: record.state,
                    last_seen_at: record.last_seen_at,
                },
            )
            .await;
            mirror_presence(store, record);
        }
    }

    /// Starts or stops a typing indicator. A started indicator expires on
    /// its own after the configured window unless refreshed; refreshing
    /// bumps a generation counter so a stale expiry task cannot clear a
    /// newer indicator.
    pub async fn set_typing(
        store: &dyn DocumentStore,
        registry: &ConnectionRegistry,
        tracker: &PresenceTracker,
        config: &Config,
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    ) -> AppResult<()> {
        ConversationService::require_active_participant(store, conversation_id, user_id).await?;

        if is_typing {
            let generation = tracker.start_typing(conversation_id, user_id).await;
            broadcast_to_conversation(
                registry,
                conversation_id,
                &GatewayEvent::UserTyping {
                    conversation_id,
                    user_id,
                    is_typing: true,
                },
            )
            .await;

            let registry = registry.clone();
            let tracker = tracker.clone();
            let expiry = config.typing_expiry;
            tokio::spawn(async move {
                tokio::time::sleep(expiry).await;
                if tracker
                    .expire_typing(conversation_id, user_id, generation)
                    .await
                {
                    broadcast_to_conversation(
                        &registry,
                        conversation_id,
                        &GatewayEvent::UserTyping {
                            conversation_id,
                            user_id,
                            is_typing: false,
                        },
                    )
                    .await;
                }
            });
        } else if tracker.stop_typing(conversation_id, user_id).await {
            broadcast_to_conversation(
                registry,
                conversation_id,
                &GatewayEvent::UserTyping {
                    conversation_id,
                    user_id,
                    is_typing: false,
                },
            )
            .await;
        }

        Ok(())
    }
}

/// Best-effort write of the latest presence snapshot. Presence stays
/// correct from live connection state even when the store is down, so a
/// failed mirror is logged and dropped rather than surfaced.
fn mirror_presence(store: Arc<dyn DocumentStore>, record: PresenceRecord) {
    tokio::spawn(async move {
        let doc = match to_doc(&record) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode presence record");
                return;
            }
        };
        if let Err(e) = store.set(PRESENCE, &record.user_id.to_string(), doc).await {
            tracing::warn!(
                error = %e,
                user_id = %record.user_id,
                "failed to mirror presence to store"
            );
        }
    });
}

//! Outbound wire events.
//!
//! Every event is a flat JSON object carrying `type`, a server `timestamp`,
//! and the affected entity. Serialization happens in one place
//! (`to_payload_value`); handlers never hand-build event JSON.
//!
//! Events for durable mutations are emitted strictly after the transaction
//! commits — a client never sees an event for data it cannot read back.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Conversation, MessageDto, PresenceState};
use crate::websocket::ConnectionRegistry;

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum GatewayEvent {
    NewMessage {
        conversation_id: Uuid,
        message: MessageDto,
    },
    /// Edits, soft deletes and reaction changes all ride this event; a
    /// deleted message arrives redacted with `deleted: true`.
    MessageUpdated {
        conversation_id: Uuid,
        message: MessageDto,
    },
    UserTyping {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },
    UserPresence {
        user_id: Uuid,
        state: PresenceState,
        last_seen_at: DateTime<Utc>,
    },
    ConversationUpdated {
        conversation: Conversation,
    },
    Error {
        code: String,
        message: String,
    },
}

impl GatewayEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new_message",
            Self::MessageUpdated { .. } => "message_updated",
            Self::UserTyping { .. } => "user_typing",
            Self::UserPresence { .. } => "user_presence",
            Self::ConversationUpdated { .. } => "conversation_updated",
            Self::Error { .. } => "error",
        }
    }

    pub fn to_payload_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut payload = serde_json::json!({
            "type": self.event_type(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        let fields = serde_json::to_value(self)?;
        if let serde_json::Value::Object(map) = fields {
            for (key, value) in map {
                payload[key] = value;
            }
        }
        Ok(payload)
    }

    fn to_ws_message(&self) -> Option<axum::extract::ws::Message> {
        match self.to_payload_value() {
            Ok(value) => Some(axum::extract::ws::Message::Text(value.to_string())),
            Err(e) => {
                tracing::error!(error = %e, event = self.event_type(), "failed to serialize gateway event");
                None
            }
        }
    }
}

/// One broadcast per durable mutation, to the conversation's subscribers.
pub async fn broadcast_to_conversation(
    registry: &ConnectionRegistry,
    conversation_id: Uuid,
    event: &GatewayEvent,
) {
    if let Some(msg) = event.to_ws_message() {
        registry.broadcast_room(conversation_id, msg).await;
    }
}

/// Presence changes go to every live connection.
pub async fn broadcast_global(registry: &ConnectionRegistry, event: &GatewayEvent) {
    if let Some(msg) = event.to_ws_message() {
        registry.broadcast_all(msg).await;
    }
}

/// Typed delivery to one connection (error events).
pub async fn send_to_connection(
    registry: &ConnectionRegistry,
    connection_id: Uuid,
    event: &GatewayEvent,
) {
    if let Some(msg) = event.to_ws_message() {
        registry.send_to(connection_id, msg).await;
    }
}

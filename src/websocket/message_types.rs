use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{MediaDescriptor, MessageKind};

/// Inbound client events on a live connection. Validation and error
/// semantics match the request/response surface exactly; both paths call
/// the same services.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinConversation {
        conversation_id: Uuid,
    },
    SendMessage {
        conversation_id: Uuid,
        kind: MessageKind,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        media: Option<MediaDescriptor>,
        #[serde(default)]
        reply_to: Option<Uuid>,
    },
    TypingStart {
        conversation_id: Uuid,
    },
    TypingStop {
        conversation_id: Uuid,
    },
    MarkRead {
        conversation_id: Uuid,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    EditMessage {
        message_id: Uuid,
        text: String,
    },
    DeleteMessage {
        message_id: Uuid,
    },
}

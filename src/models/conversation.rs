use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub title: Option<String>,
    pub icon_url: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    pub last_message_preview: Option<String>,
    pub locked: bool,
    pub active: bool,
    /// Count of active participants, maintained on create/join/leave.
    pub participant_count: i32,
}

impl Conversation {
    /// Key into the `direct_pairs` index; order-independent for the pair.
    pub fn direct_pair_key(a: Uuid, b: Uuid) -> String {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        format!("{lo}:{hi}")
    }
}

/// A user's membership record in a conversation. One record per user per
/// conversation; leaving flips `active` rather than deleting the record so
/// history survives a re-join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub muted: bool,
    pub active: bool,
}

impl Participant {
    pub fn key(conversation_id: Uuid, user_id: Uuid) -> String {
        format!("{conversation_id}:{user_id}")
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Online,
    Offline,
}

/// Best-effort mirror of live presence, written to the `presence`
/// collection for cross-instance visibility. The gateway's connection table
/// is the source of truth; this record is a cache and never authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: Uuid,
    pub state: PresenceState,
    pub last_seen_at: DateTime<Utc>,
}

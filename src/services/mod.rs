pub mod conversation_service;
pub mod message_service;
pub mod presence_service;
pub mod read_state;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub(crate) mod collections {
    pub const CONVERSATIONS: &str = "conversations";
    pub const PARTICIPANTS: &str = "participants";
    pub const MESSAGES: &str = "messages";
    pub const DIRECT_PAIRS: &str = "direct_pairs";
    pub const PRESENCE: &str = "presence";
}

/// Who is performing an operation. `moderator` is an elevated capability
/// asserted by a trusted upstream (the moderation collaborator); the core
/// accepts it without verifying the elevation itself.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub user_id: Uuid,
    pub moderator: bool,
}

impl Actor {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id,
            moderator: false,
        }
    }

    pub fn moderator(user_id: Uuid) -> Self {
        Self {
            user_id,
            moderator: true,
        }
    }
}

/// One page of a cursor-paginated listing. `next_cursor` is present only
/// when fetching limit+1 rows proved there is more.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

pub(crate) fn encode_cursor(id: Uuid) -> String {
    URL_SAFE_NO_PAD.encode(id.as_bytes())
}

pub(crate) fn decode_cursor(cursor: &str) -> AppResult<Uuid> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| AppError::BadRequest("malformed cursor".into()))?;
    Uuid::from_slice(&bytes).map_err(|_| AppError::BadRequest("malformed cursor".into()))
}

pub(crate) fn to_doc<T: Serialize>(value: &T) -> AppResult<Value> {
    serde_json::to_value(value).map_err(|e| AppError::Internal(format!("encode document: {e}")))
}

pub(crate) fn from_doc<T: DeserializeOwned>(doc: Value) -> AppResult<T> {
    serde_json::from_value(doc).map_err(|e| AppError::Internal(format!("decode document: {e}")))
}

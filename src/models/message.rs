use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    Video,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Audio => "audio",
            MessageKind::Video => "video",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub url: String,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub duration_ms: Option<u32>,
}

/// Message payload as a tagged sum type: each variant carries exactly the
/// fields its kind requires, enforced at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    Text { text: String },
    Image { media: MediaDescriptor },
    Audio { media: MediaDescriptor },
    Video { media: MediaDescriptor },
}

impl MessageBody {
    /// Builds a body from loose wire fields, rejecting anything that does
    /// not satisfy the type invariant. `text` is expected to be sanitized
    /// already.
    pub fn from_parts(
        kind: MessageKind,
        text: Option<String>,
        media: Option<MediaDescriptor>,
    ) -> Result<Self, AppError> {
        match kind {
            MessageKind::Text => {
                if media.is_some() {
                    return Err(AppError::InvalidMessage(
                        "text message must not carry media".into(),
                    ));
                }
                let text = text.unwrap_or_default();
                if text.is_empty() {
                    return Err(AppError::InvalidMessage("text content is empty".into()));
                }
                Ok(MessageBody::Text { text })
            }
            kind => {
                if text.as_deref().is_some_and(|t| !t.is_empty()) {
                    return Err(AppError::InvalidMessage(format!(
                        "{} message must not carry text",
                        kind.as_str()
                    )));
                }
                let media = media.ok_or_else(|| {
                    AppError::InvalidMessage(format!(
                        "{} message requires a media descriptor",
                        kind.as_str()
                    ))
                })?;
                if media.url.trim().is_empty() {
                    return Err(AppError::InvalidMessage("media url is empty".into()));
                }
                Ok(match kind {
                    MessageKind::Image => MessageBody::Image { media },
                    MessageKind::Audio => MessageBody::Audio { media },
                    MessageKind::Video => MessageBody::Video { media },
                    MessageKind::Text => unreachable!("handled above"),
                })
            }
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::Text { .. } => MessageKind::Text,
            MessageBody::Image { .. } => MessageKind::Image,
            MessageBody::Audio { .. } => MessageKind::Audio,
            MessageBody::Video { .. } => MessageKind::Video,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            MessageBody::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn media(&self) -> Option<&MediaDescriptor> {
        match self {
            MessageBody::Text { .. } => None,
            MessageBody::Image { media }
            | MessageBody::Audio { media }
            | MessageBody::Video { media } => Some(media),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub author_id: Uuid,
    pub body: MessageBody,
    pub reply_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Reaction value -> set of reacting users; counts are derived.
    pub reactions: BTreeMap<String, BTreeSet<Uuid>>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Wire representation. Content of soft-deleted messages is retained in
    /// the store for audit but never leaves the ledger, so the DTO of a
    /// deleted message keeps its kind and drops text/media.
    pub fn to_dto(&self) -> MessageDto {
        let deleted = self.is_deleted();
        MessageDto {
            id: self.id,
            conversation_id: self.conversation_id,
            author_id: self.author_id,
            kind: self.body.kind(),
            text: if deleted {
                None
            } else {
                self.body.text().map(str::to_owned)
            },
            media: if deleted { None } else { self.body.media().cloned() },
            reply_to: self.reply_to,
            created_at: self.created_at,
            edited_at: self.edited_at,
            deleted,
            reaction_counts: self
                .reactions
                .iter()
                .filter(|(_, users)| !users.is_empty())
                .map(|(value, users)| (value.clone(), users.len()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageDto {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub author_id: Uuid,
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub reaction_counts: BTreeMap<String, usize>,
}

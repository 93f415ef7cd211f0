use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Message, Participant};
use crate::services::collections::{CONVERSATIONS, MESSAGES, PARTICIPANTS};
use crate::services::{from_doc, to_doc};
use crate::store::{DocumentStore, Filter};

pub struct ReadStateService;

impl ReadStateService {
    /// Advances the caller's read marker. Monotonic: a marker earlier than
    /// the stored one is ignored, so delayed acknowledgements from a slow
    /// device never regress the unread count. Returns the effective marker.
    pub async fn mark_as_read(
        store: &dyn DocumentStore,
        conversation_id: Uuid,
        user_id: Uuid,
        at: Option<DateTime<Utc>>,
    ) -> AppResult<DateTime<Utc>> {
        let marker = at.unwrap_or_else(Utc::now);
        let participant_key = Participant::key(conversation_id, user_id);
        let mut effective: Option<DateTime<Utc>> = None;

        store
            .transact(&mut |txn| {
                let doc = txn
                    .get(PARTICIPANTS, &participant_key)
                    .ok_or(AppError::NotParticipant)?;
                let mut participant: Participant = from_doc(doc)?;
                if !participant.active {
                    return Err(AppError::NotParticipant);
                }

                match participant.last_read_at {
                    Some(existing) if existing >= marker => {
                        effective = Some(existing);
                    }
                    _ => {
                        participant.last_read_at = Some(marker);
                        txn.set(PARTICIPANTS, &participant_key, to_doc(&participant)?);
                        effective = Some(marker);
                    }
                }
                Ok(())
            })
            .await?;

        effective.ok_or_else(|| AppError::Internal("transaction produced no result".into()))
    }

    /// Messages from other participants newer than the caller's read
    /// marker, soft-deleted ones excluded. No marker means everything is
    /// unread.
    pub async fn unread_count(
        store: &dyn DocumentStore,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<u64> {
        if store
            .get(CONVERSATIONS, &conversation_id.to_string())
            .await?
            .is_none()
        {
            return Err(AppError::NotFound);
        }

        let participant_key = Participant::key(conversation_id, user_id);
        let participant: Participant = match store.get(PARTICIPANTS, &participant_key).await? {
            Some(doc) => from_doc(doc)?,
            None => return Err(AppError::NotParticipant),
        };
        if !participant.active {
            return Err(AppError::NotParticipant);
        }

        let docs = store
            .query(
                MESSAGES,
                &Filter::Eq("conversation_id", json!(conversation_id)),
            )
            .await?;
        let mut count = 0u64;
        for doc in docs {
            let message: Message = from_doc(doc)?;
            if message.is_deleted() || message.author_id == user_id {
                continue;
            }
            if participant
                .last_read_at
                .map_or(true, |marker| message.created_at > marker)
            {
                count += 1;
            }
        }
        Ok(count)
    }
}

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Conversation, ConversationKind, Participant, ParticipantRole};
use crate::services::collections::{CONVERSATIONS, DIRECT_PAIRS, PARTICIPANTS};
use crate::services::{decode_cursor, encode_cursor, from_doc, to_doc, Actor, Page};
use crate::store::{DocumentStore, Filter, Txn};

#[derive(Debug)]
pub struct ConversationWithParticipants {
    pub conversation: Conversation,
    pub participants: Vec<Participant>,
}

/// Admin-gated metadata patch. `None` fields are left untouched.
#[derive(Debug, Default, Deserialize)]
pub struct ConversationPatch {
    pub title: Option<String>,
    pub icon_url: Option<String>,
    pub locked: Option<bool>,
}

pub struct ConversationService;

impl ConversationService {
    /// Resolves or creates a conversation. Direct conversations are
    /// idempotent per user pair: the `direct_pairs` index is re-checked
    /// inside the transaction, so two racing calls settle on one canonical
    /// conversation. A direct re-resolve reactivates participants who had
    /// left (history is retained for re-join).
    pub async fn create_or_get(
        store: &dyn DocumentStore,
        requester: Uuid,
        others: Vec<Uuid>,
        kind: ConversationKind,
        title: Option<String>,
    ) -> AppResult<ConversationWithParticipants> {
        let mut user_ids = vec![requester];
        for id in others {
            if !user_ids.contains(&id) {
                user_ids.push(id);
            }
        }
        if user_ids.len() < 2 {
            return Err(AppError::InvalidParticipants(
                "at least 2 distinct participants required".into(),
            ));
        }

        match kind {
            ConversationKind::Direct => {
                if user_ids.len() != 2 {
                    return Err(AppError::InvalidParticipants(
                        "direct conversation requires exactly 2 participants".into(),
                    ));
                }
                Self::create_or_get_direct(store, requester, user_ids[0], user_ids[1]).await
            }
            ConversationKind::Group => {
                let title = title
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| {
                        AppError::InvalidTitle("group conversation requires a non-empty title".into())
                    })?;
                Self::create_group(store, requester, user_ids, title).await
            }
        }
    }

    async fn create_or_get_direct(
        store: &dyn DocumentStore,
        requester: Uuid,
        a: Uuid,
        b: Uuid,
    ) -> AppResult<ConversationWithParticipants> {
        let pair_key = Conversation::direct_pair_key(a, b);
        let new_id = Uuid::new_v4();
        let mut result: Option<ConversationWithParticipants> = None;

        store
            .transact(&mut |txn| {
                if let Some(index_doc) = txn.get(DIRECT_PAIRS, &pair_key) {
                    let conversation_id: Uuid = from_doc(
                        index_doc
                            .get("conversation_id")
                            .cloned()
                            .unwrap_or(serde_json::Value::Null),
                    )?;
                    result = Some(Self::resolve_existing_direct(txn, conversation_id, [a, b])?);
                    return Ok(());
                }

                let now = Utc::now();
                let conversation = Conversation {
                    id: new_id,
                    kind: ConversationKind::Direct,
                    title: None,
                    icon_url: None,
                    created_by: requester,
                    created_at: now,
                    last_message_at: now,
                    last_message_preview: None,
                    locked: false,
                    active: true,
                    participant_count: 2,
                };
                let mut participants = Vec::with_capacity(2);
                for user_id in [a, b] {
                    let participant = Participant {
                        conversation_id: new_id,
                        user_id,
                        role: ParticipantRole::Member,
                        joined_at: now,
                        last_read_at: None,
                        muted: false,
                        active: true,
                    };
                    txn.set(
                        PARTICIPANTS,
                        &Participant::key(new_id, user_id),
                        to_doc(&participant)?,
                    );
                    participants.push(participant);
                }
                txn.set(CONVERSATIONS, &new_id.to_string(), to_doc(&conversation)?);
                txn.set(
                    DIRECT_PAIRS,
                    &pair_key,
                    json!({ "conversation_id": new_id }),
                );
                result = Some(ConversationWithParticipants {
                    conversation,
                    participants,
                });
                Ok(())
            })
            .await?;

        result.ok_or_else(|| AppError::Internal("transaction produced no result".into()))
    }

    fn resolve_existing_direct(
        txn: &mut dyn Txn,
        conversation_id: Uuid,
        pair: [Uuid; 2],
    ) -> AppResult<ConversationWithParticipants> {
        let conv_doc = txn
            .get(CONVERSATIONS, &conversation_id.to_string())
            .ok_or_else(|| {
                AppError::Internal("direct pair index points at missing conversation".into())
            })?;
        let mut conversation: Conversation = from_doc(conv_doc)?;

        let mut participants = Vec::with_capacity(2);
        let mut reactivated = 0;
        for user_id in pair {
            let key = Participant::key(conversation_id, user_id);
            let doc = txn.get(PARTICIPANTS, &key).ok_or_else(|| {
                AppError::Internal("direct conversation missing participant record".into())
            })?;
            let mut participant: Participant = from_doc(doc)?;
            if !participant.active {
                participant.active = true;
                reactivated += 1;
                txn.set(PARTICIPANTS, &key, to_doc(&participant)?);
            }
            participants.push(participant);
        }
        if reactivated > 0 {
            conversation.participant_count += reactivated;
            conversation.active = true;
            txn.set(
                CONVERSATIONS,
                &conversation_id.to_string(),
                to_doc(&conversation)?,
            );
        }

        Ok(ConversationWithParticipants {
            conversation,
            participants,
        })
    }

    async fn create_group(
        store: &dyn DocumentStore,
        creator: Uuid,
        user_ids: Vec<Uuid>,
        title: String,
    ) -> AppResult<ConversationWithParticipants> {
        let new_id = Uuid::new_v4();
        let mut result: Option<ConversationWithParticipants> = None;

        store
            .transact(&mut |txn| {
                let now = Utc::now();
                let conversation = Conversation {
                    id: new_id,
                    kind: ConversationKind::Group,
                    title: Some(title.clone()),
                    icon_url: None,
                    created_by: creator,
                    created_at: now,
                    last_message_at: now,
                    last_message_preview: None,
                    locked: false,
                    active: true,
                    participant_count: user_ids.len() as i32,
                };
                let mut participants = Vec::with_capacity(user_ids.len());
                for user_id in &user_ids {
                    let role = if *user_id == creator {
                        ParticipantRole::Admin
                    } else {
                        ParticipantRole::Member
                    };
                    let participant = Participant {
                        conversation_id: new_id,
                        user_id: *user_id,
                        role,
                        joined_at: now,
                        last_read_at: None,
                        muted: false,
                        active: true,
                    };
                    txn.set(
                        PARTICIPANTS,
                        &Participant::key(new_id, *user_id),
                        to_doc(&participant)?,
                    );
                    participants.push(participant);
                }
                txn.set(CONVERSATIONS, &new_id.to_string(), to_doc(&conversation)?);
                result = Some(ConversationWithParticipants {
                    conversation,
                    participants,
                });
                Ok(())
            })
            .await?;

        result.ok_or_else(|| AppError::Internal("transaction produced no result".into()))
    }

    pub async fn get_conversation(
        store: &dyn DocumentStore,
        conversation_id: Uuid,
        requester: Uuid,
    ) -> AppResult<ConversationWithParticipants> {
        let conversation: Conversation = from_doc(
            store
                .get(CONVERSATIONS, &conversation_id.to_string())
                .await?
                .ok_or(AppError::NotFound)?,
        )?;

        let participants = Self::active_participants(store, conversation_id).await?;
        if !participants.iter().any(|p| p.user_id == requester) {
            return Err(AppError::NotParticipant);
        }

        Ok(ConversationWithParticipants {
            conversation,
            participants,
        })
    }

    pub async fn active_participants(
        store: &dyn DocumentStore,
        conversation_id: Uuid,
    ) -> AppResult<Vec<Participant>> {
        let docs = store
            .query(
                PARTICIPANTS,
                &Filter::Eq("conversation_id", json!(conversation_id)),
            )
            .await?;
        let mut participants = Vec::with_capacity(docs.len());
        for doc in docs {
            let participant: Participant = from_doc(doc)?;
            if participant.active {
                participants.push(participant);
            }
        }
        participants.sort_by_key(|p| p.joined_at);
        Ok(participants)
    }

    /// Membership is the sole authorization gate for conversation and
    /// message operations; every entry point funnels through here.
    pub async fn require_active_participant(
        store: &dyn DocumentStore,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Participant> {
        let doc = store
            .get(PARTICIPANTS, &Participant::key(conversation_id, user_id))
            .await?
            .ok_or(AppError::NotParticipant)?;
        let participant: Participant = from_doc(doc)?;
        if !participant.active {
            return Err(AppError::NotParticipant);
        }
        Ok(participant)
    }

    /// The requester's active conversations, most recently active first.
    ///
    /// Uses a participant-indexed query (single-field equality on
    /// `user_id`) rather than the bounded conversation scan of earlier
    /// designs; ordering and pagination happen in memory.
    pub async fn list_conversations(
        store: &dyn DocumentStore,
        requester: Uuid,
        limit: usize,
        cursor: Option<&str>,
    ) -> AppResult<Page<Conversation>> {
        let memberships = store
            .query(PARTICIPANTS, &Filter::Eq("user_id", json!(requester)))
            .await?;

        let mut conversations = Vec::new();
        for doc in memberships {
            let participant: Participant = from_doc(doc)?;
            if !participant.active {
                continue;
            }
            let Some(conv_doc) = store
                .get(CONVERSATIONS, &participant.conversation_id.to_string())
                .await?
            else {
                continue;
            };
            let conversation: Conversation = from_doc(conv_doc)?;
            if conversation.active {
                conversations.push(conversation);
            }
        }

        conversations.sort_by(|x, y| {
            y.last_message_at
                .cmp(&x.last_message_at)
                .then(y.id.cmp(&x.id))
        });

        let start = match cursor {
            Some(cursor) => {
                let after = decode_cursor(cursor)?;
                match conversations.iter().position(|c| c.id == after) {
                    Some(pos) => pos + 1,
                    None => return Err(AppError::BadRequest("unknown cursor".into())),
                }
            }
            None => 0,
        };

        let mut window: Vec<Conversation> =
            conversations.into_iter().skip(start).take(limit + 1).collect();
        let has_more = window.len() > limit;
        window.truncate(limit);
        let next_cursor = if has_more {
            window.last().map(|c| encode_cursor(c.id))
        } else {
            None
        };

        Ok(Page {
            items: window,
            next_cursor,
        })
    }

    /// Re-join. Group conversations accept new members; direct
    /// conversations only readmit their original pair.
    pub async fn join_conversation(
        store: &dyn DocumentStore,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Conversation> {
        let mut result: Option<Conversation> = None;

        store
            .transact(&mut |txn| {
                let conv_doc = txn
                    .get(CONVERSATIONS, &conversation_id.to_string())
                    .ok_or(AppError::NotFound)?;
                let mut conversation: Conversation = from_doc(conv_doc)?;

                let key = Participant::key(conversation_id, user_id);
                let now = Utc::now();
                match txn.get(PARTICIPANTS, &key) {
                    Some(doc) => {
                        let mut participant: Participant = from_doc(doc)?;
                        if participant.active {
                            return Err(AppError::ConflictingState(
                                "already an active participant".into(),
                            ));
                        }
                        participant.active = true;
                        txn.set(PARTICIPANTS, &key, to_doc(&participant)?);
                    }
                    None => {
                        if conversation.kind == ConversationKind::Direct {
                            return Err(AppError::Forbidden);
                        }
                        let participant = Participant {
                            conversation_id,
                            user_id,
                            role: ParticipantRole::Member,
                            joined_at: now,
                            last_read_at: None,
                            muted: false,
                            active: true,
                        };
                        txn.set(PARTICIPANTS, &key, to_doc(&participant)?);
                    }
                }

                conversation.participant_count += 1;
                conversation.active = true;
                txn.set(
                    CONVERSATIONS,
                    &conversation_id.to_string(),
                    to_doc(&conversation)?,
                );
                result = Some(conversation);
                Ok(())
            })
            .await?;

        result.ok_or_else(|| AppError::Internal("transaction produced no result".into()))
    }

    /// Leaving never deletes the participant record. On a direct
    /// conversation this deactivates it for the leaver only; a group whose
    /// last active participant leaves is soft-deactivated.
    pub async fn leave_conversation(
        store: &dyn DocumentStore,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Conversation> {
        let mut result: Option<Conversation> = None;

        store
            .transact(&mut |txn| {
                let conv_doc = txn
                    .get(CONVERSATIONS, &conversation_id.to_string())
                    .ok_or(AppError::NotFound)?;
                let mut conversation: Conversation = from_doc(conv_doc)?;

                let key = Participant::key(conversation_id, user_id);
                let doc = txn.get(PARTICIPANTS, &key).ok_or(AppError::NotParticipant)?;
                let mut participant: Participant = from_doc(doc)?;
                if !participant.active {
                    return Err(AppError::NotParticipant);
                }
                participant.active = false;
                txn.set(PARTICIPANTS, &key, to_doc(&participant)?);

                conversation.participant_count = (conversation.participant_count - 1).max(0);
                if conversation.participant_count == 0 {
                    conversation.active = false;
                }
                txn.set(
                    CONVERSATIONS,
                    &conversation_id.to_string(),
                    to_doc(&conversation)?,
                );
                result = Some(conversation);
                Ok(())
            })
            .await?;

        result.ok_or_else(|| AppError::Internal("transaction produced no result".into()))
    }

    /// Title/icon/lock changes, restricted to admin-role participants.
    /// Moderation callers bypass the role check via their asserted
    /// capability.
    pub async fn update_conversation(
        store: &dyn DocumentStore,
        conversation_id: Uuid,
        actor: Actor,
        patch: ConversationPatch,
    ) -> AppResult<Conversation> {
        let mut result: Option<Conversation> = None;

        store
            .transact(&mut |txn| {
                let conv_doc = txn
                    .get(CONVERSATIONS, &conversation_id.to_string())
                    .ok_or(AppError::NotFound)?;
                let mut conversation: Conversation = from_doc(conv_doc)?;

                if !actor.moderator {
                    let key = Participant::key(conversation_id, actor.user_id);
                    let doc = txn.get(PARTICIPANTS, &key).ok_or(AppError::NotParticipant)?;
                    let participant: Participant = from_doc(doc)?;
                    if !participant.active {
                        return Err(AppError::NotParticipant);
                    }
                    if participant.role != ParticipantRole::Admin {
                        return Err(AppError::Forbidden);
                    }
                }

                if let Some(title) = &patch.title {
                    if conversation.kind == ConversationKind::Direct {
                        return Err(AppError::InvalidTitle(
                            "direct conversations have no title".into(),
                        ));
                    }
                    let title = title.trim();
                    if title.is_empty() {
                        return Err(AppError::InvalidTitle("title must not be empty".into()));
                    }
                    conversation.title = Some(title.to_string());
                }
                if let Some(icon_url) = &patch.icon_url {
                    conversation.icon_url = Some(icon_url.clone());
                }
                if let Some(locked) = patch.locked {
                    conversation.locked = locked;
                }

                txn.set(
                    CONVERSATIONS,
                    &conversation_id.to_string(),
                    to_doc(&conversation)?,
                );
                result = Some(conversation);
                Ok(())
            })
            .await?;

        result.ok_or_else(|| AppError::Internal("transaction produced no result".into()))
    }
}

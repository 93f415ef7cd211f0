use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, MediaDescriptor, Message, MessageBody, MessageDto, MessageKind, Participant,
};
use crate::services::collections::{CONVERSATIONS, MESSAGES, PARTICIPANTS};
use crate::services::conversation_service::ConversationService;
use crate::services::{decode_cursor, encode_cursor, from_doc, to_doc, Actor, Page};
use crate::store::{DocumentStore, Filter, Txn};

/// Loose wire fields for a new message; validated into a `MessageBody` at
/// construction, after sanitation.
#[derive(Debug, Deserialize)]
pub struct NewMessage {
    pub kind: MessageKind,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media: Option<MediaDescriptor>,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::Desc
    }
}

pub struct MessageService;

impl MessageService {
    /// Appends a message. One transaction covers the message append, the
    /// conversation's last-message time/preview, and the author's own
    /// last-read marker (an author is always caught up on their own
    /// message). Fan-out is the caller's job, after this returns.
    pub async fn send_message(
        store: &dyn DocumentStore,
        config: &Config,
        conversation_id: Uuid,
        author_id: Uuid,
        input: NewMessage,
    ) -> AppResult<Message> {
        let text = input.text.as_deref().map(sanitize_text);
        let body = MessageBody::from_parts(input.kind, text, input.media)?;
        let reply_to = input.reply_to;
        let preview = build_preview(&body, config.preview_max_chars);
        let message_id = Uuid::new_v4();
        let mut result: Option<Message> = None;

        store
            .transact(&mut |txn| {
                let conv_doc = txn
                    .get(CONVERSATIONS, &conversation_id.to_string())
                    .ok_or(AppError::NotFound)?;
                let mut conversation: Conversation = from_doc(conv_doc)?;
                if !conversation.active {
                    return Err(AppError::NotFound);
                }

                let participant_key = Participant::key(conversation_id, author_id);
                let participant_doc = txn
                    .get(PARTICIPANTS, &participant_key)
                    .ok_or(AppError::NotParticipant)?;
                let mut participant: Participant = from_doc(participant_doc)?;
                if !participant.active {
                    return Err(AppError::NotParticipant);
                }

                if conversation.locked {
                    return Err(AppError::ConversationLocked);
                }

                if let Some(reply_to) = reply_to {
                    let replied = txn
                        .get(MESSAGES, &reply_to.to_string())
                        .ok_or_else(|| {
                            AppError::InvalidMessage("replied-to message does not exist".into())
                        })?;
                    let replied: Message = from_doc(replied)?;
                    if replied.conversation_id != conversation_id {
                        return Err(AppError::InvalidMessage(
                            "replied-to message belongs to another conversation".into(),
                        ));
                    }
                }

                let now = Utc::now();
                let message = Message {
                    id: message_id,
                    conversation_id,
                    author_id,
                    body: body.clone(),
                    reply_to,
                    created_at: now,
                    edited_at: None,
                    deleted_at: None,
                    reactions: Default::default(),
                };
                txn.set(MESSAGES, &message_id.to_string(), to_doc(&message)?);

                conversation.last_message_at = now;
                conversation.last_message_preview = Some(preview.clone());
                txn.set(
                    CONVERSATIONS,
                    &conversation_id.to_string(),
                    to_doc(&conversation)?,
                );

                // The author never has their own message counted as unread.
                if participant.last_read_at.map_or(true, |t| t < now) {
                    participant.last_read_at = Some(now);
                }
                txn.set(PARTICIPANTS, &participant_key, to_doc(&participant)?);

                result = Some(message);
                Ok(())
            })
            .await?;

        result.ok_or_else(|| AppError::Internal("transaction produced no result".into()))
    }

    /// Author-only, within the edit window measured from creation. Editing
    /// exactly at the window boundary still succeeds; one tick past it does
    /// not.
    pub async fn edit_message(
        store: &dyn DocumentStore,
        config: &Config,
        message_id: Uuid,
        requester: Uuid,
        new_text: &str,
    ) -> AppResult<Message> {
        let text = sanitize_text(new_text);
        if text.is_empty() {
            return Err(AppError::InvalidMessage("text content is empty".into()));
        }
        let window = Duration::minutes(config.edit_window_minutes);
        let max_edit_minutes = config.edit_window_minutes;
        let preview_max_chars = config.preview_max_chars;
        let mut result: Option<Message> = None;

        store
            .transact(&mut |txn| {
                let doc = txn
                    .get(MESSAGES, &message_id.to_string())
                    .ok_or(AppError::NotFound)?;
                let mut message: Message = from_doc(doc)?;

                if message.is_deleted() {
                    return Err(AppError::ConflictingState("message is deleted".into()));
                }
                if message.author_id != requester {
                    return Err(AppError::NotAuthor);
                }
                let now = Utc::now();
                if !Self::within_edit_window(message.created_at, now, window) {
                    return Err(AppError::EditWindowExpired { max_edit_minutes });
                }
                if !matches!(message.body, MessageBody::Text { .. }) {
                    return Err(AppError::InvalidMessage(
                        "only text messages can be edited".into(),
                    ));
                }

                message.body = MessageBody::Text { text: text.clone() };
                message.edited_at = Some(now);
                txn.set(MESSAGES, &message_id.to_string(), to_doc(&message)?);

                Self::refresh_preview_if_latest(txn, &message, preview_max_chars)?;

                result = Some(message);
                Ok(())
            })
            .await?;

        result.ok_or_else(|| AppError::Internal("transaction produced no result".into()))
    }

    /// Soft delete by the author, or by a moderation actor asserting its
    /// capability. Content stays in the store for audit; it is redacted
    /// from every read and fan-out from here on. Terminal: no further
    /// mutation of a deleted message.
    pub async fn delete_message(
        store: &dyn DocumentStore,
        message_id: Uuid,
        actor: Actor,
    ) -> AppResult<Message> {
        let mut result: Option<Message> = None;

        store
            .transact(&mut |txn| {
                let doc = txn
                    .get(MESSAGES, &message_id.to_string())
                    .ok_or(AppError::NotFound)?;
                let mut message: Message = from_doc(doc)?;

                if message.is_deleted() {
                    return Err(AppError::ConflictingState("message already deleted".into()));
                }
                if message.author_id != actor.user_id && !actor.moderator {
                    return Err(AppError::NotAuthor);
                }

                message.deleted_at = Some(Utc::now());
                txn.set(MESSAGES, &message_id.to_string(), to_doc(&message)?);
                result = Some(message);
                Ok(())
            })
            .await?;

        result.ok_or_else(|| AppError::Internal("transaction produced no result".into()))
    }

    /// Paginated history in `(created_at, id)` order, deleted messages
    /// excluded. Fetches limit+1 to decide `has_more` without a count
    /// query; the cursor is the last returned message's id.
    pub async fn get_messages(
        store: &dyn DocumentStore,
        conversation_id: Uuid,
        requester: Uuid,
        limit: usize,
        cursor: Option<&str>,
        order: SortOrder,
    ) -> AppResult<Page<MessageDto>> {
        if store
            .get(CONVERSATIONS, &conversation_id.to_string())
            .await?
            .is_none()
        {
            return Err(AppError::NotFound);
        }
        ConversationService::require_active_participant(store, conversation_id, requester).await?;

        let docs = store
            .query(
                MESSAGES,
                &Filter::Eq("conversation_id", json!(conversation_id)),
            )
            .await?;
        let mut messages = Vec::with_capacity(docs.len());
        for doc in docs {
            let message: Message = from_doc(doc)?;
            if !message.is_deleted() {
                messages.push(message);
            }
        }
        messages.sort_by(|x, y| {
            x.created_at
                .cmp(&y.created_at)
                .then(x.id.cmp(&y.id))
        });
        if order == SortOrder::Desc {
            messages.reverse();
        }

        let start = match cursor {
            Some(cursor) => {
                let after_id = decode_cursor(cursor)?;
                // The cursor message may itself have been soft-deleted since
                // the previous page; position by its ordering key instead of
                // by membership in the filtered list.
                let after_doc = store
                    .get(MESSAGES, &after_id.to_string())
                    .await?
                    .ok_or_else(|| AppError::BadRequest("unknown cursor".into()))?;
                let after: Message = from_doc(after_doc)?;
                let past_cursor = |m: &Message| match order {
                    SortOrder::Asc => {
                        (m.created_at, m.id) > (after.created_at, after.id)
                    }
                    SortOrder::Desc => {
                        (m.created_at, m.id) < (after.created_at, after.id)
                    }
                };
                messages
                    .iter()
                    .position(past_cursor)
                    .unwrap_or(messages.len())
            }
            None => 0,
        };

        let mut window: Vec<Message> =
            messages.into_iter().skip(start).take(limit + 1).collect();
        let has_more = window.len() > limit;
        window.truncate(limit);
        let next_cursor = if has_more {
            window.last().map(|m| encode_cursor(m.id))
        } else {
            None
        };

        Ok(Page {
            items: window.iter().map(Message::to_dto).collect(),
            next_cursor,
        })
    }

    /// Adds one reaction by one user. Repeat additions of the same value
    /// conflict instead of inflating the count.
    pub async fn add_reaction(
        store: &dyn DocumentStore,
        message_id: Uuid,
        user_id: Uuid,
        reaction: &str,
    ) -> AppResult<Message> {
        Self::mutate_reaction(store, message_id, user_id, reaction, true).await
    }

    pub async fn remove_reaction(
        store: &dyn DocumentStore,
        message_id: Uuid,
        user_id: Uuid,
        reaction: &str,
    ) -> AppResult<Message> {
        Self::mutate_reaction(store, message_id, user_id, reaction, false).await
    }

    async fn mutate_reaction(
        store: &dyn DocumentStore,
        message_id: Uuid,
        user_id: Uuid,
        reaction: &str,
        add: bool,
    ) -> AppResult<Message> {
        let reaction = reaction.trim();
        if reaction.is_empty() || reaction.chars().count() > 32 {
            return Err(AppError::BadRequest("invalid reaction value".into()));
        }
        let reaction = reaction.to_string();
        let mut result: Option<Message> = None;

        store
            .transact(&mut |txn| {
                let doc = txn
                    .get(MESSAGES, &message_id.to_string())
                    .ok_or(AppError::NotFound)?;
                let mut message: Message = from_doc(doc)?;
                if message.is_deleted() {
                    return Err(AppError::ConflictingState("message is deleted".into()));
                }

                let participant_key = Participant::key(message.conversation_id, user_id);
                let participant_doc = txn
                    .get(PARTICIPANTS, &participant_key)
                    .ok_or(AppError::NotParticipant)?;
                let participant: Participant = from_doc(participant_doc)?;
                if !participant.active {
                    return Err(AppError::NotParticipant);
                }

                if add {
                    let users = message
                        .reactions
                        .entry(reaction.clone())
                        .or_insert_with(BTreeSet::new);
                    if !users.insert(user_id) {
                        return Err(AppError::ConflictingState("reaction already added".into()));
                    }
                } else {
                    let mut value_empty = false;
                    match message.reactions.get_mut(&reaction) {
                        Some(users) if users.contains(&user_id) => {
                            users.remove(&user_id);
                            value_empty = users.is_empty();
                        }
                        _ => {
                            return Err(AppError::ConflictingState("reaction not present".into()));
                        }
                    }
                    if value_empty {
                        message.reactions.remove(&reaction);
                    }
                }

                txn.set(MESSAGES, &message_id.to_string(), to_doc(&message)?);
                result = Some(message);
                Ok(())
            })
            .await?;

        result.ok_or_else(|| AppError::Internal("transaction produced no result".into()))
    }

    /// The boundary is inclusive: an edit at exactly `window` after
    /// creation is still allowed.
    fn within_edit_window(created_at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
        now - created_at <= window
    }

    fn refresh_preview_if_latest(
        txn: &mut dyn Txn,
        message: &Message,
        preview_max_chars: usize,
    ) -> AppResult<()> {
        let Some(conv_doc) = txn.get(CONVERSATIONS, &message.conversation_id.to_string()) else {
            return Ok(());
        };
        let mut conversation: Conversation = from_doc(conv_doc)?;
        if conversation.last_message_at == message.created_at {
            conversation.last_message_preview =
                Some(build_preview(&message.body, preview_max_chars));
            txn.set(
                CONVERSATIONS,
                &message.conversation_id.to_string(),
                to_doc(&conversation)?,
            );
        }
        Ok(())
    }
}

/// Strips markup and control characters and collapses runs of whitespace
/// before a message body or edit is persisted.
pub fn sanitize_text(input: &str) -> String {
    fn push_plain(out: &mut String, ch: char) {
        match ch {
            '\n' => out.push('\n'),
            '\t' => out.push(' '),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }

    let mut stripped = String::with_capacity(input.len());
    // Buffered run after a `<`: dropped when a closing `>` proves it was
    // markup, re-emitted literally when the input ends without one.
    let mut tag_run: Option<String> = None;
    for ch in input.chars() {
        if let Some(run) = tag_run.as_mut() {
            if ch == '>' {
                tag_run = None;
            } else {
                run.push(ch);
            }
            continue;
        }
        if ch == '<' {
            tag_run = Some(String::new());
        } else {
            push_plain(&mut stripped, ch);
        }
    }
    if let Some(run) = tag_run {
        stripped.push('<');
        for ch in run.chars() {
            push_plain(&mut stripped, ch);
        }
    }

    let mut out = String::with_capacity(stripped.len());
    let mut spaces = 0usize;
    let mut newlines = 0usize;
    for ch in stripped.chars() {
        match ch {
            ' ' => {
                spaces += 1;
                if spaces == 1 {
                    out.push(' ');
                }
            }
            '\n' => {
                newlines += 1;
                spaces = 0;
                // At most one blank line in a row.
                if newlines <= 2 {
                    out.push('\n');
                }
            }
            c => {
                spaces = 0;
                newlines = 0;
                out.push(c);
            }
        }
    }
    out.trim().to_string()
}

/// Bounded human-readable preview for the conversation list. Media kinds
/// get fixed labels; text is truncated on a character boundary.
pub fn build_preview(body: &MessageBody, max_chars: usize) -> String {
    match body {
        MessageBody::Text { text } => truncate_chars(text, max_chars),
        MessageBody::Image { .. } => "[photo]".to_string(),
        MessageBody::Audio { .. } => "[voice message]".to_string(),
        MessageBody::Video { .. } => "[video]".to_string(),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

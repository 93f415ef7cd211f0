use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::guards::User;
use crate::models::{Conversation, ConversationKind, Participant};
use crate::routes::PageParams;
use crate::services::conversation_service::{
    ConversationPatch, ConversationService, ConversationWithParticipants,
};
use crate::services::read_state::ReadStateService;
use crate::services::Page;
use crate::state::AppState;
use crate::websocket::events::{broadcast_to_conversation, GatewayEvent};

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub kind: ConversationKind,
    pub participant_ids: Vec<Uuid>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation: Conversation,
    pub participants: Vec<Participant>,
}

impl From<ConversationWithParticipants> for ConversationResponse {
    fn from(value: ConversationWithParticipants) -> Self {
        Self {
            conversation: value.conversation,
            participants: value.participants,
        }
    }
}

/// Create a conversation, or resolve the existing one for a direct pair.
pub async fn create_conversation(
    State(state): State<AppState>,
    user: User,
    Json(body): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<ConversationResponse>), AppError> {
    let result = ConversationService::create_or_get(
        state.store.as_ref(),
        user.id,
        body.participant_ids,
        body.kind,
        body.title,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(result.into())))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    user: User,
    Query(params): Query<PageParams>,
) -> Result<Json<Page<Conversation>>, AppError> {
    let page = ConversationService::list_conversations(
        state.store.as_ref(),
        user.id,
        params.effective_limit(&state.config),
        params.cursor.as_deref(),
    )
    .await?;
    Ok(Json(page))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationResponse>, AppError> {
    let result = ConversationService::get_conversation(state.store.as_ref(), id, user.id).await?;
    Ok(Json(result.into()))
}

pub async fn update_conversation(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(patch): Json<ConversationPatch>,
) -> Result<Json<Conversation>, AppError> {
    let conversation =
        ConversationService::update_conversation(state.store.as_ref(), id, user.actor(&headers), patch)
            .await?;
    broadcast_to_conversation(
        &state.registry,
        id,
        &GatewayEvent::ConversationUpdated {
            conversation: conversation.clone(),
        },
    )
    .await;
    Ok(Json(conversation))
}

pub async fn join_conversation(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Conversation>, AppError> {
    let conversation =
        ConversationService::join_conversation(state.store.as_ref(), id, user.id).await?;
    broadcast_to_conversation(
        &state.registry,
        id,
        &GatewayEvent::ConversationUpdated {
            conversation: conversation.clone(),
        },
    )
    .await;
    Ok(Json(conversation))
}

pub async fn leave_conversation(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Conversation>, AppError> {
    let conversation =
        ConversationService::leave_conversation(state.store.as_ref(), id, user.id).await?;
    // A leaver stops receiving the room's fan-out immediately.
    state.registry.unsubscribe_user(id, user.id).await;
    broadcast_to_conversation(
        &state.registry,
        id,
        &GatewayEvent::ConversationUpdated {
            conversation: conversation.clone(),
        },
    )
    .await;
    Ok(Json(conversation))
}

#[derive(Debug, Default, Deserialize)]
pub struct MarkAsReadRequest {
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct MarkAsReadResponse {
    pub last_read_at: DateTime<Utc>,
}

pub async fn mark_as_read(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
    body: Option<Json<MarkAsReadRequest>>,
) -> Result<Json<MarkAsReadResponse>, AppError> {
    let at = body.and_then(|Json(b)| b.at);
    let last_read_at =
        ReadStateService::mark_as_read(state.store.as_ref(), id, user.id, at).await?;
    Ok(Json(MarkAsReadResponse { last_read_at }))
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub unread_count: u64,
}

pub async fn unread_count(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<UnreadCountResponse>, AppError> {
    let unread_count = ReadStateService::unread_count(state.store.as_ref(), id, user.id).await?;
    Ok(Json(UnreadCountResponse { unread_count }))
}

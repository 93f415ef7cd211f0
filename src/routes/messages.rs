use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::guards::User;
use crate::models::{Message, MessageDto};
use crate::routes::PageParams;
use crate::services::message_service::{MessageService, NewMessage, SortOrder};
use crate::services::Page;
use crate::state::AppState;
use crate::websocket::events::{broadcast_to_conversation, GatewayEvent};

pub async fn send_message(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<NewMessage>,
) -> Result<(StatusCode, Json<MessageDto>), AppError> {
    let message = MessageService::send_message(
        state.store.as_ref(),
        &state.config,
        conversation_id,
        user.id,
        body,
    )
    .await?;
    fan_out_new(&state, &message).await;
    Ok((StatusCode::CREATED, Json(message.to_dto())))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    #[serde(default)]
    pub order: SortOrder,
}

impl HistoryParams {
    fn page(&self) -> PageParams {
        PageParams {
            limit: self.limit,
            cursor: self.cursor.clone(),
        }
    }
}

pub async fn get_message_history(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Page<MessageDto>>, AppError> {
    let page = MessageService::get_messages(
        state.store.as_ref(),
        conversation_id,
        user.id,
        params.page().effective_limit(&state.config),
        params.cursor.as_deref(),
        params.order,
    )
    .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMessageRequest {
    pub text: String,
}

pub async fn update_message(
    State(state): State<AppState>,
    user: User,
    Path(message_id): Path<Uuid>,
    Json(body): Json<UpdateMessageRequest>,
) -> Result<Json<MessageDto>, AppError> {
    let message = MessageService::edit_message(
        state.store.as_ref(),
        &state.config,
        message_id,
        user.id,
        &body.text,
    )
    .await?;
    fan_out_updated(&state, &message).await;
    Ok(Json(message.to_dto()))
}

/// Soft delete. Subscribers receive the redacted message as an update
/// rather than a distinct removal event, so every client converges on the
/// same tombstone rendering.
pub async fn delete_message(
    State(state): State<AppState>,
    user: User,
    Path(message_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<MessageDto>, AppError> {
    let message =
        MessageService::delete_message(state.store.as_ref(), message_id, user.actor(&headers))
            .await?;
    fan_out_updated(&state, &message).await;
    Ok(Json(message.to_dto()))
}

#[derive(Debug, Deserialize)]
pub struct AddReactionRequest {
    pub reaction: String,
}

pub async fn add_reaction(
    State(state): State<AppState>,
    user: User,
    Path(message_id): Path<Uuid>,
    Json(body): Json<AddReactionRequest>,
) -> Result<Json<MessageDto>, AppError> {
    let message =
        MessageService::add_reaction(state.store.as_ref(), message_id, user.id, &body.reaction)
            .await?;
    fan_out_updated(&state, &message).await;
    Ok(Json(message.to_dto()))
}

pub async fn remove_reaction(
    State(state): State<AppState>,
    user: User,
    Path((message_id, reaction)): Path<(Uuid, String)>,
) -> Result<Json<MessageDto>, AppError> {
    let message =
        MessageService::remove_reaction(state.store.as_ref(), message_id, user.id, &reaction)
            .await?;
    fan_out_updated(&state, &message).await;
    Ok(Json(message.to_dto()))
}

async fn fan_out_new(state: &AppState, message: &Message) {
    broadcast_to_conversation(
        &state.registry,
        message.conversation_id,
        &GatewayEvent::NewMessage {
            conversation_id: message.conversation_id,
            message: message.to_dto(),
        },
    )
    .await;
}

async fn fan_out_updated(state: &AppState, message: &Message) {
    broadcast_to_conversation(
        &state.registry,
        message.conversation_id,
        &GatewayEvent::MessageUpdated {
            conversation_id: message.conversation_id,
            message: message.to_dto(),
        },
    )
    .await;
}

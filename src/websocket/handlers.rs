use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::middleware::auth;
use crate::services::conversation_service::ConversationService;
use crate::services::message_service::{MessageService, NewMessage};
use crate::services::presence_service::PresenceService;
use crate::services::read_state::ReadStateService;
use crate::services::Actor;
use crate::state::AppState;
use crate::websocket::events::{broadcast_to_conversation, send_to_connection, GatewayEvent};
use crate::websocket::message_types::ClientEvent;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Upgrade endpoint. Authentication happens before the upgrade: the token
/// comes from the `token` query parameter (browsers cannot set headers on
/// an upgrade request) or the Authorization header.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = params.token.clone().or_else(|| {
        headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|s| s.to_string())
    });

    let user_id = match token.and_then(|t| auth::authenticate(&state.config.jwt_secret, &t).ok()) {
        Some(user_id) => user_id,
        None => return axum::http::StatusCode::UNAUTHORIZED.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Uuid) {
    let (connection_id, mut outbound) = state.registry.register(user_id).await;
    PresenceService::connect(
        state.store.clone(),
        &state.registry,
        &state.presence,
        user_id,
        connection_id,
    )
    .await;
    tracing::debug!(%user_id, %connection_id, "websocket connected");

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            msg = outbound.recv() => match msg {
                Some(msg) => {
                    if sink.send(msg).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_client_message(&state, connection_id, user_id, &text).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong handled by the framework
                Some(Err(e)) => {
                    tracing::debug!(%connection_id, error = %e, "websocket read error");
                    break;
                }
            },
        }
    }

    state.registry.unregister(connection_id).await;
    PresenceService::disconnect(
        state.store.clone(),
        &state.registry,
        &state.presence,
        user_id,
        connection_id,
    )
    .await;
    tracing::debug!(%user_id, %connection_id, "websocket disconnected");
}

/// A failed event never tears down the connection; the client gets a typed
/// error frame and the stream continues.
async fn handle_client_message(
    state: &AppState,
    connection_id: Uuid,
    user_id: Uuid,
    text: &str,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            send_to_connection(
                &state.registry,
                connection_id,
                &GatewayEvent::Error {
                    code: "INVALID_REQUEST".into(),
                    message: format!("unrecognized client event: {e}"),
                },
            )
            .await;
            return;
        }
    };

    if let Err(err) = dispatch_event(state, connection_id, user_id, event).await {
        send_to_connection(
            &state.registry,
            connection_id,
            &GatewayEvent::Error {
                code: err.code().into(),
                message: err.to_string(),
            },
        )
        .await;
    }
}

async fn dispatch_event(
    state: &AppState,
    connection_id: Uuid,
    user_id: Uuid,
    event: ClientEvent,
) -> crate::error::AppResult<()> {
    let store = state.store.as_ref();
    match event {
        ClientEvent::JoinConversation { conversation_id } => {
            ConversationService::require_active_participant(store, conversation_id, user_id)
                .await?;
            state.registry.subscribe(connection_id, conversation_id).await;
        }
        ClientEvent::SendMessage {
            conversation_id,
            kind,
            text,
            media,
            reply_to,
        } => {
            let message = MessageService::send_message(
                store,
                &state.config,
                conversation_id,
                user_id,
                NewMessage {
                    kind,
                    text,
                    media,
                    reply_to,
                },
            )
            .await?;
            broadcast_to_conversation(
                &state.registry,
                conversation_id,
                &GatewayEvent::NewMessage {
                    conversation_id,
                    message: message.to_dto(),
                },
            )
            .await;
        }
        ClientEvent::TypingStart { conversation_id } => {
            PresenceService::set_typing(
                store,
                &state.registry,
                &state.presence,
                &state.config,
                conversation_id,
                user_id,
                true,
            )
            .await?;
        }
        ClientEvent::TypingStop { conversation_id } => {
            PresenceService::set_typing(
                store,
                &state.registry,
                &state.presence,
                &state.config,
                conversation_id,
                user_id,
                false,
            )
            .await?;
        }
        ClientEvent::MarkRead { conversation_id, at } => {
            // Read markers are private state; no fan-out.
            ReadStateService::mark_as_read(store, conversation_id, user_id, at).await?;
        }
        ClientEvent::EditMessage { message_id, text } => {
            let message =
                MessageService::edit_message(store, &state.config, message_id, user_id, &text)
                    .await?;
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
        ClientEvent::DeleteMessage { message_id } => {
            let message =
                MessageService::delete_message(store, message_id, Actor::user(user_id)).await?;
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
    }
    Ok(())
}

use axum::{
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::state::AppState;

pub mod conversations;
use conversations::{
    create_conversation, get_conversation, join_conversation, leave_conversation,
    list_conversations, mark_as_read, unread_count, update_conversation,
};
pub mod messages;
use messages::{
    add_reaction, delete_message, get_message_history, remove_reaction, send_message,
    update_message,
};

use crate::websocket::handlers::ws_handler;

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Cursor-pagination query parameters shared by the listing endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

impl PageParams {
    /// Out-of-range limits are clamped, not rejected.
    pub fn effective_limit(&self, config: &Config) -> usize {
        self.limit
            .unwrap_or(config.default_page_size)
            .clamp(1, config.max_page_size)
    }
}

pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route(
            "/conversations",
            post(create_conversation).get(list_conversations),
        )
        .route(
            "/conversations/:id",
            get(get_conversation).patch(update_conversation),
        )
        .route("/conversations/:id/join", post(join_conversation))
        .route("/conversations/:id/leave", post(leave_conversation))
        .route("/conversations/:id/read", post(mark_as_read))
        .route("/conversations/:id/unread", get(unread_count))
        .route(
            "/conversations/:id/messages",
            post(send_message).get(get_message_history),
        )
        .route(
            "/messages/:id",
            axum::routing::patch(update_message).delete(delete_message),
        )
        .route("/messages/:id/reactions", post(add_reaction))
        .route("/messages/:id/reactions/:reaction", delete(remove_reaction))
        .route("/ws", get(ws_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::auth::auth_middleware,
        ));

    crate::middleware::with_defaults(router).with_state(state)
}

use crate::middleware::error_handling;
use crate::store::StoreError;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error_handling::into_response(self).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("not a participant of this conversation")]
    NotParticipant,

    #[error("only the author may modify this message")]
    NotAuthor,

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid participants: {0}")]
    InvalidParticipants(String),

    #[error("invalid title: {0}")]
    InvalidTitle(String),

    #[error("conversation is locked")]
    ConversationLocked,

    #[error("edit window expired (max_edit_minutes: {max_edit_minutes})")]
    EditWindowExpired { max_edit_minutes: i64 },

    #[error("conflicting state: {0}")]
    ConflictingState(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl AppError {
    /// Transient errors the caller may retry; everything else is permanent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Store(_))
    }

    /// Stable machine-readable code, shared by REST responses and the
    /// gateway's typed `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::StartServer(_) => "SERVER_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::BadRequest(_) => "INVALID_REQUEST",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::NotFound => "NOT_FOUND",
            AppError::NotParticipant => "NOT_PARTICIPANT",
            AppError::NotAuthor => "NOT_AUTHOR",
            AppError::InvalidMessage(_) => "INVALID_MESSAGE",
            AppError::InvalidParticipants(_) => "INVALID_PARTICIPANTS",
            AppError::InvalidTitle(_) => "INVALID_TITLE",
            AppError::ConversationLocked => "CONVERSATION_LOCKED",
            AppError::EditWindowExpired { .. } => "EDIT_WINDOW_EXPIRED",
            AppError::ConflictingState(_) => "CONFLICTING_STATE",
            AppError::Store(_) => "STORE_UNAVAILABLE",
        }
    }

    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_)
            | AppError::InvalidMessage(_)
            | AppError::InvalidParticipants(_)
            | AppError::InvalidTitle(_) => 400,
            AppError::Unauthorized => 401,
            AppError::Forbidden
            | AppError::NotParticipant
            | AppError::NotAuthor
            | AppError::EditWindowExpired { .. } => 403,
            AppError::NotFound => 404,
            AppError::ConflictingState(_) => 409,
            AppError::ConversationLocked => 423, // 423 Locked
            AppError::Store(_) => 503,
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal(_) => 500,
        }
    }
}

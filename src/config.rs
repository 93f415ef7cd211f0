use dotenvy::dotenv;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// HS256 secret shared with the identity collaborator that mints tokens.
    pub jwt_secret: String,
    /// How long after creation a message may still be edited by its author.
    pub edit_window_minutes: i64,
    /// Typing indicators auto-clear after this much silence.
    pub typing_expiry: Duration,
    /// Upper bound for conversation-list previews, in characters.
    pub preview_max_chars: usize,
    /// Default and maximum page sizes for cursor pagination.
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| crate::error::AppError::Config("JWT_SECRET missing".into()))?;
        if jwt_secret.trim().is_empty() {
            return Err(crate::error::AppError::Config("JWT_SECRET empty".into()));
        }
        let edit_window_minutes = env::var("EDIT_WINDOW_MINUTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(15);
        let typing_expiry_ms = env::var("TYPING_EXPIRY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3_000);
        let preview_max_chars = env::var("PREVIEW_MAX_CHARS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(80);

        Ok(Self {
            port,
            jwt_secret,
            edit_window_minutes,
            typing_expiry: Duration::from_millis(typing_expiry_ms),
            preview_max_chars,
            default_page_size: 50,
            max_page_size: 100,
        })
    }

    pub fn test_defaults() -> Self {
        Self {
            port: 3000,
            jwt_secret: "test-secret".into(),
            edit_window_minutes: 15,
            typing_expiry: Duration::from_millis(200),
            preview_max_chars: 80,
            default_page_size: 50,
            max_page_size: 100,
        }
    }
}

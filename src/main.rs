use std::sync::Arc;

use messaging_core::config::Config;
use messaging_core::error::AppError;
use messaging_core::logging;
use messaging_core::routes::build_router;
use messaging_core::state::AppState;
use messaging_core::store::MemoryStore;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();

    let config = Config::from_env()?;
    let port = config.port;

    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(store, config);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| AppError::StartServer(format!("bind port {port}: {e}")))?;
    tracing::info!(%port, "messaging core listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::StartServer(format!("serve: {e}")))?;
    Ok(())
}

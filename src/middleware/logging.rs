use axum::http;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::Level;

use crate::state::AppState;

/// Add HTTP trace logging layer (request/response + latency)
pub fn add_tracing(router: Router<AppState>) -> Router<AppState> {
    router.layer(
        TraceLayer::new_for_http()
            .make_span_with(|req: &http::Request<_>| {
                tracing::span!(
                    Level::INFO,
                    "request",
                    method = %req.method(),
                    path = %req.uri().path(),
                    // Flag gateway upgrades; most traffic on /ws never shows
                    // up as a response below.
                    upgrade = req.headers().contains_key(http::header::UPGRADE),
                )
            })
            .on_response(
                |res: &http::Response<_>, latency: std::time::Duration, _span: &tracing::Span| {
                    let status = res.status();
                    if status.is_server_error() {
                        tracing::error!(status = status.as_u16(), elapsed_ms = latency.as_millis() as u64, "request failed");
                    } else {
                        tracing::info!(status = status.as_u16(), elapsed_ms = latency.as_millis() as u64, "request completed");
                    }
                },
            ),
    )
}

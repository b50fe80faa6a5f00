use axum::{
    routing::{delete, get, post},
    Router,
};

use super::handlers;
use super::AppState;

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Session lifecycle
        .route("/streams/:stream_id/join", post(handlers::join_stream))
        .route(
            "/streams/:stream_id/sessions/:user_id",
            delete(handlers::leave_stream),
        )
        // Playback sync
        .route("/streams/:stream_id/events", post(handlers::publish_event))
        .route("/streams/:stream_id/status", get(handlers::stream_status))
        .route("/streams/:stream_id/sync", post(handlers::resync))
        .with_state(state)
}

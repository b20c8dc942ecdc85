use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Day session control
        .route("/day/start", post(handlers::start_day))
        .route("/day/stop", post(handlers::stop_day))
        .route("/day/groups/start", post(handlers::start_group))
        .route("/day/groups/stop", post(handlers::stop_group))
        .route(
            "/day/groups/:group_id/retranscribe",
            post(handlers::retranscribe_group),
        )
        // Queries
        .route("/day/status", get(handlers::get_status))
        .route("/day/transcript", get(handlers::get_transcript))
        .route("/day/segments/uploaded", post(handlers::mark_uploaded))
        // Crash recovery decisions
        .route("/recovery", get(handlers::get_recovery))
        .route("/recovery/resume", post(handlers::resume_recovery))
        .route("/recovery/discard", post(handlers::discard_recovery))
        .route("/recovery/fresh", post(handlers::fresh_recovery))
        // Host visibility signals
        .route("/lifecycle/hidden", post(handlers::lifecycle_hidden))
        .route("/lifecycle/visible", post(handlers::lifecycle_visible))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

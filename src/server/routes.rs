//! Router configuration for the admin API.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the admin router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Batch lifecycle operations
        .route("/api/batch/register", post(handlers::register_batch))
        .route("/api/batch/register/all", post(handlers::register_batch_all))
        .route("/api/batch/submit", post(handlers::submit_batches))
        .route("/api/batch/check", post(handlers::check_batches))
        .route("/api/batch/complete", post(handlers::complete_batches))
        .route("/api/batch/reset", post(handlers::reset_batches))
        .route("/api/batch/stats", get(handlers::batch_statistics))
        // Crawler kickoff
        .route("/api/crawler/start", post(handlers::start_crawler))
        // Status
        .route("/api/status", get(handlers::api_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

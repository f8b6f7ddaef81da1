//! API Module
//!
//! HTTP surface for the controller: read-only status plus manual scaling
//! triggers. Writes go through the same controller mutex as the periodic
//! tasks.

pub mod error;
pub mod health;
pub mod status;
pub mod workers;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::controller::Controller;

/// Create the API router with all endpoints
pub fn create_router(controller: Arc<Controller>) -> Router {
    Router::new()
        // Liveness
        .route("/health", get(health::health_check))
        // Read-only surface
        .route("/api/v1/status", get(status::get_status))
        .route("/api/v1/metrics", get(status::get_metrics))
        .route("/api/v1/workers", get(workers::list_workers))
        .route("/api/v1/workers/{id}/logs", get(workers::worker_logs))
        // Manual control
        .route("/api/v1/workers/scale-up", post(workers::scale_up))
        .route("/api/v1/workers/scale-down", post(workers::scale_down))
        .route("/api/v1/workers/{id}", delete(workers::delete_worker))
        // Add state and middleware
        .with_state(controller)
        .layer(TraceLayer::new_for_http())
}

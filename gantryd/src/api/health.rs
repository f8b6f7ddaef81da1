//! Health Check API Handler

use std::sync::Arc;

use axum::{extract::State, Json};

use gantry_core::dto::status::HealthResponse;

use crate::controller::Controller;

/// GET /health
/// Liveness probe
pub async fn health_check(State(controller): State<Arc<Controller>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        running: controller.is_running(),
    })
}

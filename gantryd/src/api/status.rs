//! Status & Metrics API Handlers

use std::sync::Arc;

use axum::{extract::State, http::header, response::IntoResponse, Json};

use gantry_core::dto::status::StatusResponse;

use crate::controller::Controller;

/// GET /api/v1/status
/// Full controller state with derived counters. Always answers, flagging
/// degraded subsystems instead of failing.
pub async fn get_status(State(controller): State<Arc<Controller>>) -> Json<StatusResponse> {
    Json(controller.status().await)
}

/// GET /api/v1/metrics
/// Counters in Prometheus text exposition format
pub async fn get_metrics(State(controller): State<Arc<Controller>>) -> impl IntoResponse {
    let body = controller.metrics_text().await;
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

//! Worker API Handlers
//!
//! Joined worker views, manual scaling triggers, per-worker teardown and
//! log proxying.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use gantry_core::dto::status::{LogsResponse, ScaleResponse, WorkersResponse};

use crate::api::error::ApiResult;
use crate::controller::Controller;

const DEFAULT_LOG_TAIL: usize = 100;

/// GET /api/v1/workers
/// Runtime view, registry view and the controller's own index, joined
pub async fn list_workers(
    State(controller): State<Arc<Controller>>,
) -> ApiResult<Json<WorkersResponse>> {
    let view = controller.workers_view().await?;
    Ok(Json(view))
}

/// POST /api/v1/workers/scale-up
/// Launches one batch, bypassing the cooldown but respecting the ceiling
pub async fn scale_up(State(controller): State<Arc<Controller>>) -> ApiResult<Json<ScaleResponse>> {
    tracing::info!("manual scale-up requested");

    let launched = controller.manual_scale_up().await?;
    Ok(Json(ScaleResponse {
        message: format!("launched {launched} worker(s)"),
        count: launched,
    }))
}

/// POST /api/v1/workers/scale-down
/// Retires the oldest idle worker, refusing at the floor
pub async fn scale_down(
    State(controller): State<Arc<Controller>>,
) -> ApiResult<Json<ScaleResponse>> {
    tracing::info!("manual scale-down requested");

    let removed = controller.manual_scale_down().await?;
    Ok(Json(ScaleResponse {
        message: format!("retired {removed} worker(s)"),
        count: removed,
    }))
}

/// DELETE /api/v1/workers/{id}
/// Tears down one worker; busy workers are refused with 409
pub async fn delete_worker(
    State(controller): State<Arc<Controller>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    tracing::info!(worker = %id, "manual teardown requested");

    controller.delete_worker(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    tail: Option<usize>,
}

/// GET /api/v1/workers/{id}/logs?tail=N
/// Proxies container logs from the runtime
pub async fn worker_logs(
    State(controller): State<Arc<Controller>>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<LogsResponse>> {
    let tail = query.tail.unwrap_or(DEFAULT_LOG_TAIL);
    let logs = controller.worker_logs(&id, tail).await?;

    Ok(Json(LogsResponse {
        container_id: id,
        logs,
    }))
}

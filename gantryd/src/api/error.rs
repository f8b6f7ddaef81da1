//! API Error Handling
//!
//! Unified error type and conversion for API responses. Every failure
//! renders as a JSON body with a short machine-readable `error` kind and a
//! human-readable `detail`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use gantry_core::ports::AdapterError;

use crate::controller::ControlError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Conflict(String),
    BadRequest(String),
    Upstream(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, detail) = match self {
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "not_found", detail),
            ApiError::Conflict(detail) => (StatusCode::CONFLICT, "conflict", detail),
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, "bad_request", detail),
            ApiError::Upstream(detail) => {
                tracing::error!("upstream failure: {}", detail);
                (StatusCode::BAD_GATEWAY, "upstream", detail)
            }
            ApiError::Internal(detail) => {
                tracing::error!("internal error: {}", detail);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", detail)
            }
        };

        (
            status,
            Json(serde_json::json!({ "error": kind, "detail": detail })),
        )
            .into_response()
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::Busy(_)
            | ControlError::BreakerOpen
            | ControlError::AtCapacity
            | ControlError::AtFloor
            | ControlError::NoCandidate => ApiError::Conflict(err.to_string()),
            ControlError::WorkerNotFound(_) => ApiError::NotFound(err.to_string()),
            ControlError::Adapter(inner) => inner.into(),
        }
    }
}

impl From<AdapterError> for ApiError {
    fn from(err: AdapterError) -> Self {
        match &err {
            AdapterError::NotFound(_) => ApiError::NotFound(err.to_string()),
            AdapterError::Transient(_) | AdapterError::Auth(_) => {
                ApiError::Upstream(err.to_string())
            }
            AdapterError::Fatal(_) => ApiError::Internal(err.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_workers_conflict() {
        let err: ApiError = ControlError::Busy("orchestrated-ab12cd34".to_string()).into();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn missing_workers_are_not_found() {
        let err: ApiError = ControlError::WorkerNotFound("nope".to_string()).into();
        assert!(matches!(err, ApiError::NotFound(_)));

        let err: ApiError = ControlError::Adapter(AdapterError::NotFound("gone".into())).into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn adapter_failures_are_upstream() {
        let err: ApiError =
            ControlError::Adapter(AdapterError::Transient("registry flaked".into())).into();
        assert!(matches!(err, ApiError::Upstream(_)));
    }
}

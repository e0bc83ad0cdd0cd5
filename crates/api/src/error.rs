//! API Error Types

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use coordinator::CoordinatorError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// Errors returned by request handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    /// Request failed validation
    #[error("{0}")]
    Validation(String),

    #[error("Sensor with same name already registered")]
    NameTaken,
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NameTaken => StatusCode::BAD_REQUEST,
            ApiError::Coordinator(e) => match e {
                CoordinatorError::NotFound(_) | CoordinatorError::NoReadingYet(_) => StatusCode::NOT_FOUND,
                CoordinatorError::CorruptReading { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                CoordinatorError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                CoordinatorError::PartialWriteFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::Coordinator(CoordinatorError::NotFound(_)) => "Sensor not found".to_string(),
            ApiError::Coordinator(CoordinatorError::NoReadingYet(_)) => {
                "No data recorded for sensor".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(ErrorBody { detail: self.detail() })).into_response()
    }
}

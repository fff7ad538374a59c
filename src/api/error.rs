use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::api::models::ErrorResponse;
use crate::error::Error;

/// Failure of a single request.
///
/// Input and inference failures both answer HTTP 500 to keep the public
/// contract; `kind` in the body tells them apart.
#[derive(Debug)]
pub enum ApiError {
    InvalidInput(String),
    InferenceFailure(String),
    Overloaded(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) | ApiError::InferenceFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Overloaded(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "invalid_input",
            ApiError::InferenceFailure(_) => "inference_failure",
            ApiError::Overloaded(_) => "overloaded",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::InvalidInput(msg)
            | ApiError::InferenceFailure(msg)
            | ApiError::Overloaded(msg) => msg,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidInput(rejection.body_text())
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::Overloaded { .. } => ApiError::Overloaded(message),
            _ => ApiError::InferenceFailure(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match status {
            StatusCode::SERVICE_UNAVAILABLE => tracing::warn!(kind = self.kind(), "{}", self.message()),
            _ => tracing::error!(kind = self.kind(), "{}", self.message()),
        }
        let body = ErrorResponse {
            error: self.message().to_string(),
            kind: self.kind().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

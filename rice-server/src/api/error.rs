//! API error handling: maps the core error taxonomy onto HTTP.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rice_core::Error;
use serde::Serialize;
use tracing::error;

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Wrapper turning [`Error`] into an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

/// Error body: human message, stable code, optional details. 5xx bodies
/// are sanitized; the log retains the full error.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::Validation(_) | Error::Serialization(_) => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            // 499: client closed request
            Error::Canceled(_) => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Error::Backpressure(_)
            | Error::Unavailable(_)
            | Error::ModelNotAvailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Io(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match &self.0 {
            Error::Validation(_) | Error::Serialization(_) => "INVALID_REQUEST",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::Conflict(_) => "CONFLICT",
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::Forbidden(_) => "FORBIDDEN",
            Error::RateLimited(_) => "RATE_LIMITED",
            Error::Timeout(_) => "TIMEOUT",
            Error::Canceled(_) => "CANCELED",
            Error::Backpressure(_) => "BACKPRESSURE",
            Error::Unavailable(_) | Error::ModelNotAvailable(_) => "SERVICE_UNAVAILABLE",
            Error::Io(_) | Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            // never leak internals on 5xx
            error!("request failed: {}", self.0);
            "internal error".to_string()
        } else {
            self.0.to_string()
        };
        let body = ErrorBody {
            error: message,
            code: self.code(),
            details: None,
        };
        (status, Json(body)).into_response()
    }
}

/// JSON extractor whose rejections surface as 400s in the standard error
/// body, including unknown-field denials.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError(Error::validation(rejection.body_text()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError(Error::validation("bad")).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(Error::not_found("store", "x")).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(Error::conflict("taken")).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError(Error::Forbidden("no".into())).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError(Error::timeout("slow")).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(ApiError(Error::canceled("gone")).status_code().as_u16(), 499);
        assert_eq!(
            ApiError(Error::unavailable("down")).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError(Error::internal("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_codes() {
        assert_eq!(ApiError(Error::validation("x")).code(), "INVALID_REQUEST");
        assert_eq!(
            ApiError(Error::model_not_available("x")).code(),
            "SERVICE_UNAVAILABLE"
        );
        assert_eq!(ApiError(Error::internal("x")).code(), "INTERNAL_ERROR");
    }
}

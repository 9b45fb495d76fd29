//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => {
                error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<gradebox_core::Error> for ApiError {
    fn from(err: gradebox_core::Error) -> Self {
        match err {
            gradebox_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            gradebox_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            gradebox_core::Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            gradebox_core::Error::Conflict(msg) => ApiError::Conflict(msg),
            gradebox_core::Error::CodeHost(_) | gradebox_core::Error::Storage(_) => {
                ApiError::BadGateway(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<gradebox_db::DbError> for ApiError {
    fn from(err: gradebox_db::DbError) -> Self {
        match err {
            gradebox_db::DbError::NotFound(msg) => ApiError::NotFound(msg),
            gradebox_db::DbError::Duplicate(msg) => ApiError::Conflict(msg),
            gradebox_db::DbError::InvalidInput(msg) => ApiError::BadRequest(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_mapping() {
        let cases = [
            (gradebox_core::Error::NotFound("task".into()), StatusCode::NOT_FOUND),
            (gradebox_core::Error::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (gradebox_core::Error::CodeHost("502".into()), StatusCode::BAD_GATEWAY),
            (gradebox_core::Error::Database("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}

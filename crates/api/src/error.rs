use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sitechat_common::SiteChatError;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Core service error: {0}")]
    CoreService(#[from] SiteChatError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, error_code) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg, "VALIDATION_ERROR"),
            ApiError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, msg, "AUTHENTICATION_ERROR")
            }
            ApiError::CoreService(err) => {
                error!("Core service error: {}", err);
                match err {
                    SiteChatError::InvalidInput(msg) => {
                        (StatusCode::BAD_REQUEST, msg, "VALIDATION_ERROR")
                    }
                    SiteChatError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "NOT_FOUND"),
                    SiteChatError::Unauthorized => (
                        StatusCode::UNAUTHORIZED,
                        "Unauthorized".to_string(),
                        "UNAUTHORIZED",
                    ),
                    SiteChatError::RateLimited(_) => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Upstream provider is rate limiting requests".to_string(),
                        "UPSTREAM_RATE_LIMITED",
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error".to_string(),
                        "INTERNAL_ERROR",
                    ),
                }
            }
            ApiError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "INTERNAL_ERROR",
                )
            }
        };

        let response_body = json!({
            "success": false,
            "error": error_message,
            "error_code": error_code,
            "timestamp": chrono::Utc::now()
        });

        (status, Json(response_body)).into_response()
    }
}

pub fn validation_error(message: &str) -> ApiError {
    ApiError::Validation(message.to_string())
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_maps_to_bad_request() {
        let error = ApiError::CoreService(SiteChatError::InvalidInput("empty".to_string()));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let error = ApiError::CoreService(SiteChatError::NotFound("gone".to_string()));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_rate_limit_maps_to_service_unavailable() {
        let error = ApiError::CoreService(SiteChatError::RateLimited("429".to_string()));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_storage_error_is_not_leaked() {
        let error = ApiError::CoreService(SiteChatError::Storage("secret dsn".to_string()));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

pub mod auth;
pub mod error;
pub mod routes;
pub mod server;

use axum::Json;
use sitechat_common::ApiResponse;
use sitechat_core::ChatCore;
use std::sync::Arc;

pub use auth::{AuthConfig, AuthService, AuthenticatedTenant};
pub use server::ApiServer;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// Shared handler state: core services plus the auth verifier.
pub struct AppState {
    pub core: Arc<ChatCore>,
    pub auth: Arc<AuthService>,
}

// Common API utilities
pub fn create_success_response<T: serde::Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(data))
}

pub fn create_error_response(message: String) -> Json<ApiResponse<()>> {
    Json(ApiResponse::error(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_config_default() {
        let config = ApiConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_success_response_creation() {
        let data = json!({"message": "test"});
        let response = create_success_response(data);
        assert!(response.0.success);
    }

    #[test]
    fn test_error_response_creation() {
        let response = create_error_response("Test error".to_string());
        assert!(!response.0.success);
        assert_eq!(response.0.error, Some("Test error".to_string()));
    }
}

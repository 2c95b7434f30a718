pub mod chat;
pub mod health;
pub mod knowledge;

use crate::AppState;
use axum::Router;
use std::sync::Arc;

pub fn create_routes(state: Arc<AppState>) -> Router {
    Router::new()
        // Health checks require no authentication
        .nest("/health", health::routes())
        .nest("/api/chat", chat::routes())
        .nest("/api/knowledge", knowledge::routes())
        .with_state(state)
}

// Fallback handler for unmatched routes
pub async fn not_found_handler() -> axum::http::StatusCode {
    axum::http::StatusCode::NOT_FOUND
}

use axum::{routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(health_check))
        .route("/live", get(liveness_check))
}

async fn health_check() -> Json<serde_json::Value> {
    debug!("Health check requested");
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now(),
    }))
}

async fn liveness_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "alive" }))
}

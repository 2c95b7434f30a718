use crate::{auth::AuthenticatedTenant, create_success_response, error::ApiResult, AppState};
use axum::{
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sitechat_common::ApiResponse;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    /// Optional existing conversation to resume.
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub conversation_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub conversation_id: Uuid,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub conversation_id: Uuid,
    pub reply: String,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/start", post(start_conversation))
        .route("/message", post(send_message))
}

async fn start_conversation(
    State(state): State<Arc<AppState>>,
    tenant: AuthenticatedTenant,
    Json(request): Json<StartRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<StartResponse>>)> {
    let conversation_id = state
        .core
        .conversations
        .get_or_create(tenant.tenant_id, request.conversation_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        create_success_response(StartResponse { conversation_id }),
    ))
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    tenant: AuthenticatedTenant,
    Json(request): Json<MessageRequest>,
) -> ApiResult<Json<ApiResponse<MessageResponse>>> {
    let reply = state
        .core
        .chat
        .answer(tenant.tenant_id, request.conversation_id, &request.message)
        .await?;

    Ok(create_success_response(MessageResponse {
        conversation_id: request.conversation_id,
        reply,
    }))
}

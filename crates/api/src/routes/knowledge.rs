use crate::{
    auth::AuthenticatedTenant,
    create_success_response,
    error::{validation_error, ApiResult},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sitechat_common::{ApiResponse, RankedChunk};
use sitechat_knowledge::jobs::JobStatus;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub chunks: Vec<RankedChunk>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    /// URL to ingest; defaults to the tenant's configured site URL.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IngestAccepted {
    pub job_id: Uuid,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/search", get(search_chunks))
        .route("/ingest", post(trigger_ingestion))
        .route("/jobs/:id", get(job_status))
}

async fn search_chunks(
    State(state): State<Arc<AppState>>,
    tenant: AuthenticatedTenant,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<ApiResponse<SearchResponse>>> {
    let mut chunks = state
        .core
        .retriever
        .search(tenant.tenant_id, &query.q)
        .await?;
    if let Some(limit) = query.limit {
        chunks.truncate(limit);
    }

    Ok(create_success_response(SearchResponse {
        total: chunks.len(),
        chunks,
    }))
}

/// Kicks off background ingestion and answers immediately; the job's outcome
/// is observable via the jobs endpoint.
async fn trigger_ingestion(
    State(state): State<Arc<AppState>>,
    tenant: AuthenticatedTenant,
    Json(request): Json<IngestRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<IngestAccepted>>)> {
    let url = match request.url {
        Some(url) => url,
        None => state
            .core
            .tenants
            .get(tenant.tenant_id)
            .await?
            .and_then(|config| config.site_url)
            .ok_or_else(|| {
                validation_error("no URL given and no site URL configured for this tenant")
            })?,
    };

    let job_id = state
        .core
        .ingestion_queue
        .submit(tenant.tenant_id, url)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        create_success_response(IngestAccepted { job_id }),
    ))
}

async fn job_status(
    State(state): State<Arc<AppState>>,
    _tenant: AuthenticatedTenant,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<JobStatus>>> {
    match state.core.ingestion_queue.status(id).await {
        Some(status) => Ok(create_success_response(status)),
        None => Err(crate::error::ApiError::CoreService(
            sitechat_common::SiteChatError::NotFound(format!("no ingestion job {id}")),
        )),
    }
}

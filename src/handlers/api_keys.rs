//! Key administration HTTP handlers.
//!
//! - POST /api/admin/v1/tenants/{tenant_id}/chatbots/{chatbot_id}/keys - Issue a key
//! - GET /api/admin/v1/tenants/{tenant_id}/chatbots/{chatbot_id}/keys - List keys
//! - POST /api/admin/v1/tenants/{tenant_id}/keys/{key_id}/revoke - Revoke a key
//!
//! All routes require the `X-Admin-Token` header.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::api_key::{ApiKeyResponse, CreateApiKeyRequest},
    services::key_service,
    state::AppState,
};

/// Issue a key for a chatbot.
///
/// # Request Body
///
/// ```json
/// {
///   "name": "whatsapp bot",
///   "environment": "LIVE",
///   "rpm_limit": 120
/// }
/// ```
///
/// # Response (201 Created)
///
/// The key record with `key` holding the raw key. It is never shown again.
pub async fn create_key(
    State(state): State<AppState>,
    Path((tenant_id, chatbot_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<CreateApiKeyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let issued = key_service::issue_key(
        state.keys.as_ref(),
        state.issuance,
        tenant_id,
        chatbot_id,
        request,
        state.clock.now(),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(issued)))
}

/// List the keys of a chatbot, newest first. Hashes are never returned.
pub async fn list_keys(
    State(state): State<AppState>,
    Path((tenant_id, chatbot_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<ApiKeyResponse>>, AppError> {
    let keys = key_service::list_keys(state.keys.as_ref(), tenant_id, chatbot_id).await?;
    Ok(Json(keys))
}

/// Revoke a key.
///
/// # Response
///
/// - **204 No Content**: revoked (also when it already was)
/// - **404 Not Found**: no such key in this tenant
pub async fn revoke_key(
    State(state): State<AppState>,
    Path((tenant_id, key_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    key_service::revoke_key(state.keys.as_ref(), tenant_id, key_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

//! Key issuance, listing and revocation.
//!
//! The raw key exists only inside `issue_key` and in its response. Only the
//! hash and display prefix reach the key store.

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::IssuanceConfig,
    error::{AppError, StoreError},
    hasher,
    models::api_key::{ApiKeyResponse, CreateApiKeyRequest, NewApiKey},
    store::KeyStore,
};

/// Attempts before giving up on hash collisions.
const ISSUE_ATTEMPTS: usize = 3;

/// Issue a new key for a chatbot.
///
/// # Process
///
/// 1. Validate name and limits (omitted limits take the configured defaults)
/// 2. Generate `crb_<ENV>_<32 hex>` and hash it
/// 3. Store hash and prefix; regenerate on the unlikely hash collision
/// 4. Return the key record with the raw key attached (only time it's shown)
///
/// # Errors
///
/// - `InvalidRequest`: empty name, negative or oversized limit
/// - `Store(NotFound)`: the chatbot does not exist within the tenant
pub async fn issue_key(
    keys: &dyn KeyStore,
    defaults: IssuanceConfig,
    tenant_id: Uuid,
    chatbot_id: Uuid,
    request: CreateApiKeyRequest,
    now: DateTime<Utc>,
) -> Result<ApiKeyResponse, AppError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(AppError::InvalidRequest("name must not be empty".to_string()));
    }
    let rpm_limit = resolve_limit("rpm_limit", request.rpm_limit, defaults.default_rpm_limit)?;
    let rpd_limit = resolve_limit("rpd_limit", request.rpd_limit, defaults.default_rpd_limit)?;
    let created_by = request
        .created_by
        .unwrap_or_else(|| "admin".to_string());

    for _ in 0..ISSUE_ATTEMPTS {
        let raw_key = hasher::generate_key(request.environment);
        let hashed = hasher::hash_key(raw_key.as_bytes())
            .map_err(|err| AppError::InvalidRequest(err.to_string()))?;

        let key = NewApiKey {
            id: Uuid::new_v4(),
            tenant_id,
            chatbot_id,
            name: name.to_string(),
            key_prefix: hashed.key_prefix,
            key_hash: hashed.key_hash,
            environment: request.environment,
            rpm_limit,
            rpd_limit,
            created_at: now,
            created_by: created_by.clone(),
        };

        match keys.create(&key).await {
            Ok(()) => {
                info!(
                    api_key_id = %key.id,
                    tenant_id = %tenant_id,
                    chatbot_id = %chatbot_id,
                    key_prefix = %key.key_prefix,
                    "api key issued"
                );
                return Ok(ApiKeyResponse::from(key).with_key(raw_key));
            }
            Err(StoreError::DuplicateHash) => {
                warn!(tenant_id = %tenant_id, "generated key collided, regenerating");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(StoreError::DuplicateHash.into())
}

/// List every key of a chatbot, revoked ones included.
pub async fn list_keys(
    keys: &dyn KeyStore,
    tenant_id: Uuid,
    chatbot_id: Uuid,
) -> Result<Vec<ApiKeyResponse>, AppError> {
    let found = keys.get_by_chatbot(tenant_id, chatbot_id).await?;
    Ok(found.into_iter().map(ApiKeyResponse::from).collect())
}

/// Revoke a key. Revoking twice is not an error.
pub async fn revoke_key(
    keys: &dyn KeyStore,
    tenant_id: Uuid,
    key_id: Uuid,
) -> Result<(), AppError> {
    keys.revoke(tenant_id, key_id).await?;
    info!(api_key_id = %key_id, tenant_id = %tenant_id, "api key revoked");
    Ok(())
}

fn resolve_limit(field: &str, requested: Option<i64>, default: u32) -> Result<u32, AppError> {
    let Some(value) = requested else {
        return Ok(default);
    };
    if value < 0 {
        return Err(AppError::InvalidRequest(format!("{field} must not be negative")));
    }
    // stored as INTEGER
    if value > i64::from(i32::MAX) {
        return Err(AppError::InvalidRequest(format!("{field} is too large")));
    }
    Ok(value as u32)
}

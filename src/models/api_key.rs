//! API Key model for chatbot authentication.
//!
//! API keys authenticate chatbot clients calling the bot API. Only the SHA-256
//! hash of a key and a short display prefix are ever stored.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Deployment environment a key was issued for.
///
/// Stored as the text `LIVE` / `TEST` and embedded in the raw key as
/// `crb_LIVE_` / `crb_TEST_`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Environment {
    Live,
    Test,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Live => "LIVE",
            Environment::Test => "TEST",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LIVE" => Ok(Environment::Live),
            "TEST" => Ok(Environment::Test),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Capability bits copied from the owning chatbot.
///
/// The gateway only carries these through to the resolved identity;
/// authorization against them happens downstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Capabilities {
    pub can_read_complaints: bool,
    pub can_respond: bool,
    pub can_change_state: bool,
    pub can_send_messages: bool,
    pub can_read_metrics: bool,
}

/// A fully populated API key as returned by the key store.
///
/// Besides the `api_keys` columns this carries `chatbot_active` and the
/// chatbot's capability bits, so the gateway never issues a second query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub chatbot_id: Uuid,
    pub name: String,

    /// Non-secret leading 12 characters of the raw key, e.g. `crb_LIVE_abc`
    pub key_prefix: String,

    /// SHA-256 of the raw key (64 lowercase hex characters)
    pub key_hash: String,

    pub environment: Environment,

    /// `false` once revoked. Revocation is terminal.
    pub active: bool,

    /// Requests allowed per sliding 60 seconds for this key. 0 means unlimited.
    pub rpm_limit: u32,

    /// Requests allowed per UTC calendar day for the owning tenant. 0 means unlimited.
    pub rpd_limit: u32,

    pub created_at: DateTime<Utc>,
    pub created_by: String,

    pub chatbot_active: bool,
    pub capabilities: Capabilities,
}

/// Row shape of `api_keys JOIN chatbots`.
#[derive(Debug, sqlx::FromRow)]
pub struct ApiKeyRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub chatbot_id: Uuid,
    pub name: String,
    pub key_prefix: String,
    pub key_hash: String,
    pub environment: String,
    pub active: bool,
    pub rpm_limit: i32,
    pub rpd_limit: i32,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub chatbot_active: bool,
    #[sqlx(flatten)]
    pub capabilities: Capabilities,
}

impl TryFrom<ApiKeyRow> for ApiKey {
    type Error = StoreError;

    fn try_from(row: ApiKeyRow) -> Result<Self, Self::Error> {
        let environment = row.environment.parse().map_err(StoreError::Corrupt)?;
        let rpm_limit = u32::try_from(row.rpm_limit)
            .map_err(|_| StoreError::Corrupt(format!("negative rpm_limit on key {}", row.id)))?;
        let rpd_limit = u32::try_from(row.rpd_limit)
            .map_err(|_| StoreError::Corrupt(format!("negative rpd_limit on key {}", row.id)))?;

        Ok(ApiKey {
            id: row.id,
            tenant_id: row.tenant_id,
            chatbot_id: row.chatbot_id,
            name: row.name,
            key_prefix: row.key_prefix,
            key_hash: row.key_hash,
            environment,
            active: row.active,
            rpm_limit,
            rpd_limit,
            created_at: row.created_at,
            created_by: row.created_by,
            chatbot_active: row.chatbot_active,
            capabilities: row.capabilities,
        })
    }
}

/// The persisted part of a freshly issued key.
///
/// Capabilities and chatbot state are not part of it: they always come from
/// the chatbot row at lookup time.
#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub chatbot_id: Uuid,
    pub name: String,
    pub key_prefix: String,
    pub key_hash: String,
    pub environment: Environment,
    pub rpm_limit: u32,
    pub rpd_limit: u32,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

/// Request body for issuing a key.
///
/// # JSON Example
///
/// ```json
/// {
///   "name": "whatsapp bot",
///   "environment": "LIVE",
///   "rpm_limit": 120,
///   "created_by": "ops@tenant.example"
/// }
/// ```
///
/// Omitted limits fall back to the configured defaults. Negative limits are rejected.
#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    #[serde(default = "default_environment")]
    pub environment: Environment,
    pub rpm_limit: Option<i64>,
    pub rpd_limit: Option<i64>,
    pub created_by: Option<String>,
}

fn default_environment() -> Environment {
    Environment::Live
}

/// Public view of a key. Never includes the hash.
#[derive(Debug, Serialize)]
pub struct ApiKeyResponse {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub chatbot_id: Uuid,
    pub name: String,
    pub key_prefix: String,
    pub environment: Environment,
    pub active: bool,
    pub rpm_limit: u32,
    pub rpd_limit: u32,
    pub created_at: DateTime<Utc>,
    pub created_by: String,

    /// Raw key, present only in the issuance response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl From<ApiKey> for ApiKeyResponse {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            tenant_id: key.tenant_id,
            chatbot_id: key.chatbot_id,
            name: key.name,
            key_prefix: key.key_prefix,
            environment: key.environment,
            active: key.active,
            rpm_limit: key.rpm_limit,
            rpd_limit: key.rpd_limit,
            created_at: key.created_at,
            created_by: key.created_by,
            key: None,
        }
    }
}

impl From<NewApiKey> for ApiKeyResponse {
    fn from(key: NewApiKey) -> Self {
        Self {
            id: key.id,
            tenant_id: key.tenant_id,
            chatbot_id: key.chatbot_id,
            name: key.name,
            key_prefix: key.key_prefix,
            environment: key.environment,
            active: true,
            rpm_limit: key.rpm_limit,
            rpd_limit: key.rpd_limit,
            created_at: key.created_at,
            created_by: key.created_by,
            key: None,
        }
    }
}

impl ApiKeyResponse {
    /// Attach the raw key (only for the issuance response).
    pub fn with_key(mut self, raw_key: String) -> Self {
        self.key = Some(raw_key);
        self
    }
}

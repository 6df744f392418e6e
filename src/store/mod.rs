//! Key and log repositories.
//!
//! The gateway depends only on the `KeyStore` and `LogStore` traits. The
//! Postgres implementations back the service; the in-memory ones back tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
    error::StoreError,
    models::{
        api_key::{ApiKey, NewApiKey},
        chatbot_log::ChatbotLog,
    },
};

pub mod memory;
pub mod postgres;

pub use memory::{InMemoryKeyStore, InMemoryLogStore};
pub use postgres::{PgKeyStore, PgLogStore};

/// Durable mapping from `key_hash` to API key.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Look up a key by hash, joined with its chatbot.
    ///
    /// Revoked keys are returned too; the limiter turns them into denials.
    async fn get_by_hash(&self, key_hash: &str) -> Result<ApiKey, StoreError>;

    /// All keys of one chatbot, newest first.
    async fn get_by_chatbot(
        &self,
        tenant_id: Uuid,
        chatbot_id: Uuid,
    ) -> Result<Vec<ApiKey>, StoreError>;

    /// Persist a freshly issued key.
    ///
    /// Fails with `DuplicateHash` on collision and `NotFound` when the chatbot
    /// does not exist within the key's tenant.
    async fn create(&self, key: &NewApiKey) -> Result<(), StoreError>;

    /// Mark a key revoked. Revoking an already revoked key succeeds.
    async fn revoke(&self, tenant_id: Uuid, key_id: Uuid) -> Result<(), StoreError>;

    /// Bump the key's usage counter and last-used time.
    async fn increment_usage(&self, key_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Append-only store of chatbot request logs.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn create(&self, log: &ChatbotLog) -> Result<(), StoreError>;

    /// Admitted rows for the key with `now - window <= timestamp < now`.
    async fn count_in_window(
        &self,
        api_key_id: Uuid,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Oldest timestamp counted by `count_in_window`, if any.
    async fn oldest_in_window(
        &self,
        api_key_id: Uuid,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Admitted rows for the tenant within the UTC day containing `now`.
    async fn count_today_by_tenant(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}

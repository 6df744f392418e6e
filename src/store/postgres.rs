//! PostgreSQL-backed key and log stores.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
    clock::{next_utc_midnight, start_of_utc_day},
    db::DbPool,
    error::StoreError,
    models::{
        api_key::{ApiKey, ApiKeyRow, NewApiKey},
        chatbot_log::ChatbotLog,
    },
    store::{KeyStore, LogStore},
};

/// Columns of `api_keys JOIN chatbots` matching `ApiKeyRow`.
const API_KEY_COLUMNS: &str = r#"
    k.id, k.tenant_id, k.chatbot_id, k.name, k.key_prefix, k.key_hash,
    k.environment, k.active, k.rpm_limit, k.rpd_limit, k.created_at, k.created_by,
    c.active AS chatbot_active,
    c.can_read_complaints, c.can_respond, c.can_change_state,
    c.can_send_messages, c.can_read_metrics
"#;

fn to_db_limit(limit: u32) -> Result<i32, StoreError> {
    i32::try_from(limit).map_err(|_| StoreError::Corrupt(format!("limit {limit} out of range")))
}

fn to_count(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

#[derive(Clone)]
pub struct PgKeyStore {
    pool: DbPool,
}

impl PgKeyStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyStore for PgKeyStore {
    async fn get_by_hash(&self, key_hash: &str) -> Result<ApiKey, StoreError> {
        let query = format!(
            "SELECT {API_KEY_COLUMNS}
             FROM api_keys k
             JOIN chatbots c ON c.id = k.chatbot_id
             WHERE k.key_hash = $1"
        );

        let row = sqlx::query_as::<_, ApiKeyRow>(&query)
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;

        ApiKey::try_from(row)
    }

    async fn get_by_chatbot(
        &self,
        tenant_id: Uuid,
        chatbot_id: Uuid,
    ) -> Result<Vec<ApiKey>, StoreError> {
        let query = format!(
            "SELECT {API_KEY_COLUMNS}
             FROM api_keys k
             JOIN chatbots c ON c.id = k.chatbot_id
             WHERE k.tenant_id = $1 AND k.chatbot_id = $2
             ORDER BY k.created_at DESC"
        );

        let rows = sqlx::query_as::<_, ApiKeyRow>(&query)
            .bind(tenant_id)
            .bind(chatbot_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ApiKey::try_from).collect()
    }

    async fn create(&self, key: &NewApiKey) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO api_keys (
                id, tenant_id, chatbot_id, name, key_prefix, key_hash,
                environment, active, rpm_limit, rpd_limit, created_at, created_by
            )
            SELECT $1, $2, $3, $4, $5, $6, $7, true, $8, $9, $10, $11
            FROM chatbots
            WHERE id = $3 AND tenant_id = $2
            "#,
        )
        .bind(key.id)
        .bind(key.tenant_id)
        .bind(key.chatbot_id)
        .bind(&key.name)
        .bind(&key.key_prefix)
        .bind(&key.key_hash)
        .bind(key.environment.as_str())
        .bind(to_db_limit(key.rpm_limit)?)
        .bind(to_db_limit(key.rpd_limit)?)
        .bind(key.created_at)
        .bind(&key.created_by)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_insert)?;

        // The chatbot must exist and belong to the same tenant
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        Ok(())
    }

    async fn revoke(&self, tenant_id: Uuid, key_id: Uuid) -> Result<(), StoreError> {
        // Only ever writes false: revocation is terminal
        let result =
            sqlx::query("UPDATE api_keys SET active = false WHERE id = $1 AND tenant_id = $2")
                .bind(key_id)
                .bind(tenant_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        Ok(())
    }

    async fn increment_usage(&self, key_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE api_keys SET usage_count = usage_count + 1, last_used_at = $2 WHERE id = $1",
        )
        .bind(key_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct PgLogStore {
    pool: DbPool,
}

impl PgLogStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LogStore for PgLogStore {
    async fn create(&self, log: &ChatbotLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO chatbot_logs (
                id, tenant_id, chatbot_id, api_key_id, method, endpoint,
                status_code, ip, duration_ms, "timestamp", admitted
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(log.id)
        .bind(log.tenant_id)
        .bind(log.chatbot_id)
        .bind(log.api_key_id)
        .bind(&log.method)
        .bind(&log.endpoint)
        .bind(log.status_code)
        .bind(&log.ip)
        .bind(log.duration_ms)
        .bind(log.timestamp)
        .bind(log.admitted)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_in_window(
        &self,
        api_key_id: Uuid,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM chatbot_logs
            WHERE api_key_id = $1 AND admitted
              AND "timestamp" >= $2 AND "timestamp" < $3
            "#,
        )
        .bind(api_key_id)
        .bind(now - window)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(to_count(count))
    }

    async fn oldest_in_window(
        &self,
        api_key_id: Uuid,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let oldest = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            r#"
            SELECT MIN("timestamp") FROM chatbot_logs
            WHERE api_key_id = $1 AND admitted
              AND "timestamp" >= $2 AND "timestamp" < $3
            "#,
        )
        .bind(api_key_id)
        .bind(now - window)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(oldest)
    }

    async fn count_today_by_tenant(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM chatbot_logs
            WHERE tenant_id = $1 AND admitted
              AND "timestamp" >= $2 AND "timestamp" < $3
            "#,
        )
        .bind(tenant_id)
        .bind(start_of_utc_day(now))
        .bind(next_utc_midnight(now))
        .fetch_one(&self.pool)
        .await?;

        Ok(to_count(count))
    }
}

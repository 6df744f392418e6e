//! Database connection pool and migration management.

use std::time::Duration;

use sqlx::{Pool, Postgres};

/// PostgreSQL connection pool shared by the key and log stores.
pub type DbPool = Pool<Postgres>;

/// Create a new PostgreSQL connection pool.
///
/// The acquire timeout is kept below the default auth deadline so an
/// exhausted pool surfaces as a store error instead of a gateway timeout.
///
/// # Errors
///
/// Returns an error if the connection string is invalid or the server
/// cannot be reached.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(3))
        .connect(database_url)
        .await
}

/// Run the embedded migrations from `migrations/`.
///
/// Creates `chatbots`, `api_keys` (unique index on `key_hash`) and
/// `chatbot_logs` (indexed on `(api_key_id, timestamp)` and
/// `(tenant_id, timestamp)`).
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

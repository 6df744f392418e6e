//! Application configuration management.
//!
//! Configuration is read from environment variables with `envy`, after an
//! optional `.env` file has been loaded with `dotenvy`.

use std::time::Duration;

use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT`: HTTP server port, defaults to 3000
/// - `DATABASE_MAX_CONNECTIONS`: pool size, defaults to 5
/// - `AUTH_DEADLINE_MS`: hard bound on the auth+admit path, defaults to 5000
/// - `BACKGROUND_QUEUE_DEPTH`: post-admission queue depth, defaults to 1024
/// - `SHUTDOWN_GRACE_MS`: drain grace period on shutdown, defaults to 5000
/// - `DEFAULT_RPM_LIMIT` / `DEFAULT_RPD_LIMIT`: issuance defaults, 60 / 5000
/// - `ADMIN_TOKEN`: enables the admin key routes when set
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    #[serde(default = "default_auth_deadline_ms")]
    pub auth_deadline_ms: u64,

    #[serde(default = "default_background_queue_depth")]
    pub background_queue_depth: usize,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    #[serde(default = "default_rpm_limit")]
    pub default_rpm_limit: u32,

    #[serde(default = "default_rpd_limit")]
    pub default_rpd_limit: u32,

    #[serde(default)]
    pub admin_token: Option<String>,
}

fn default_port() -> u16 {
    3000
}

fn default_max_connections() -> u32 {
    5
}

fn default_auth_deadline_ms() -> u64 {
    5_000
}

fn default_background_queue_depth() -> usize {
    1024
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

fn default_rpm_limit() -> u32 {
    60
}

fn default_rpd_limit() -> u32 {
    5_000
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is missing or a value cannot be
    /// parsed into its expected type.
    pub fn from_env() -> Result<Self, envy::Error> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        envy::from_env::<Config>()
    }

    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            auth_deadline: Duration::from_millis(self.auth_deadline_ms),
        }
    }

    pub fn issuance(&self) -> IssuanceConfig {
        IssuanceConfig {
            default_rpm_limit: self.default_rpm_limit,
            default_rpd_limit: self.default_rpd_limit,
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Knobs of the request path.
#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    pub auth_deadline: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            auth_deadline: Duration::from_millis(default_auth_deadline_ms()),
        }
    }
}

/// Limits applied when a key is issued without explicit ones.
#[derive(Debug, Clone, Copy)]
pub struct IssuanceConfig {
    pub default_rpm_limit: u32,
    pub default_rpd_limit: u32,
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            default_rpm_limit: default_rpm_limit(),
            default_rpd_limit: default_rpd_limit(),
        }
    }
}

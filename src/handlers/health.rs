//! Health check endpoint for service monitoring.

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{error::AppError, gateway::GatewayStats, state::AppState};

/// Health check response.
///
/// Returns service status, database connectivity and gateway counters.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service status
    pub status: String,

    /// Database connection status
    pub database: String,

    /// Drop and rejection counters of the gateway
    pub gateway: GatewayStats,

    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
}

/// Health check handler.
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "status": "healthy",
///   "database": "connected",
///   "gateway": {
///     "dropped_logs_total": 0,
///     "dropped_increments_total": 0,
///     "unattributed_rejections_total": 12
///   },
///   "timestamp": "2025-12-21T19:00:00Z"
/// }
/// ```
///
/// # Response (500 Internal Server Error)
///
/// If the database is unreachable, returns the standard error response.
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, AppError> {
    let database = match &state.db {
        Some(pool) => {
            sqlx::query("SELECT 1").execute(pool).await?;
            "connected"
        }
        None => "not_configured",
    };

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        database: database.to_string(),
        gateway: state.gateway.stats(),
        timestamp: state.clock.now(),
    }))
}

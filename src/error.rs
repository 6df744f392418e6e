//! Error types and HTTP error response handling.
//!
//! `StoreError` is what the key and log repositories return. `AppError` is the
//! error type of the administrative handlers and converts into the JSON error
//! envelope. Gateway denials have their own type in `gateway::denial`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Errors raised by `KeyStore` and `LogStore` implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No row matched (unknown hash, or key not owned by the tenant).
    #[error("record not found")]
    NotFound,

    /// A key with the same hash already exists.
    #[error("duplicate key hash")]
    DuplicateHash,

    /// Database operation failed (connection error, query error, pool timeout).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Non-sqlx backend failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored row violates the data model.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Map a unique-violation on insert into `DuplicateHash`.
    pub fn from_insert(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateHash,
            _ => StoreError::Database(err),
        }
    }
}

/// Application-wide error type for the administrative endpoints.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Repository failure.
    ///
    /// `NotFound` and `DuplicateHash` are mapped to 404/409, everything else
    /// to 500 with details hidden from the client.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Database operation failed outside a repository (health check).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Missing or wrong admin token.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Invalid admin token")]
    Unauthorized,

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("Invalid request")]
    InvalidRequest(String),
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "invalid_admin_token",
                self.to_string(),
            ),
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::Store(StoreError::NotFound) => (
                StatusCode::NOT_FOUND,
                "not_found",
                "Resource not found".to_string(),
            ),
            AppError::Store(StoreError::DuplicateHash) => (
                StatusCode::CONFLICT,
                "duplicate_key",
                "Key collision, retry issuance".to_string(),
            ),
            AppError::Store(ref err) => {
                tracing::error!(error = %err, "store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Database(ref err) => {
                tracing::error!(error = %err, "database failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        error_body(status, code, &message)
    }
}

/// Build the JSON error envelope shared by admin errors and gateway denials.
pub fn error_body(status: StatusCode, code: &str, message: &str) -> Response {
    let body = Json(json!({
        "error": {
            "code": code,
            "message": message
        }
    }));

    (status, body).into_response()
}

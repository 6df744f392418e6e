//! Gateway denial taxonomy and its HTTP mapping.

use axum::{
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};

use super::CLIENT_CLOSED_REQUEST;
use crate::{error::error_body, limiter::Decision};

/// Every way the gateway can refuse a request.
///
/// | Variant | HTTP | Body code |
/// |---|---|---|
/// | `MissingKey` | 401 | `missing_key` |
/// | `MalformedKey` | 401 | `malformed_key` |
/// | `UnknownKey` | 401 | `unknown_key` |
/// | `Revoked` | 403 | `key_revoked` |
/// | `InactiveBot` | 403 | `chatbot_inactive` |
/// | `MinuteLimit` | 429 | `rate_limit_minute` |
/// | `DayLimit` | 429 | `rate_limit_day` |
/// | `Backend` | 503 | `backend_unavailable` |
/// | `Cancelled` | 499 | `cancelled` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Denial {
    #[error("Missing API key")]
    MissingKey,

    #[error("Malformed API key")]
    MalformedKey,

    #[error("Unknown API key")]
    UnknownKey,

    #[error("API key has been revoked")]
    Revoked,

    #[error("Chatbot is inactive")]
    InactiveBot,

    #[error("Per-minute rate limit exceeded")]
    MinuteLimit { retry_after_secs: u64 },

    #[error("Daily rate limit exceeded")]
    DayLimit { retry_after_secs: u64 },

    #[error("Authentication backend unavailable")]
    Backend,

    #[error("Request cancelled")]
    Cancelled,
}

impl Denial {
    pub fn status(&self) -> StatusCode {
        match self {
            Denial::MissingKey | Denial::MalformedKey | Denial::UnknownKey => {
                StatusCode::UNAUTHORIZED
            }
            Denial::Revoked | Denial::InactiveBot => StatusCode::FORBIDDEN,
            Denial::MinuteLimit { .. } | Denial::DayLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            Denial::Backend => StatusCode::SERVICE_UNAVAILABLE,
            Denial::Cancelled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::SERVICE_UNAVAILABLE),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Denial::MissingKey => "missing_key",
            Denial::MalformedKey => "malformed_key",
            Denial::UnknownKey => "unknown_key",
            Denial::Revoked => "key_revoked",
            Denial::InactiveBot => "chatbot_inactive",
            Denial::MinuteLimit { .. } => "rate_limit_minute",
            Denial::DayLimit { .. } => "rate_limit_day",
            Denial::Backend => "backend_unavailable",
            Denial::Cancelled => "cancelled",
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Denial::MinuteLimit { retry_after_secs } | Denial::DayLimit { retry_after_secs } => {
                Some(*retry_after_secs)
            }
            _ => None,
        }
    }

    /// Map a limiter denial. `None` for `Decision::Admit`.
    pub fn from_decision(decision: Decision) -> Option<Self> {
        match decision {
            Decision::Admit => None,
            Decision::DenyRevoked => Some(Denial::Revoked),
            Decision::DenyInactiveBot => Some(Denial::InactiveBot),
            Decision::DenyRpm { retry_after_secs } => {
                Some(Denial::MinuteLimit { retry_after_secs })
            }
            Decision::DenyRpd { retry_after_secs } => Some(Denial::DayLimit { retry_after_secs }),
        }
    }
}

impl IntoResponse for Denial {
    fn into_response(self) -> Response {
        let mut response = error_body(self.status(), self.code(), &self.to_string());
        if let Some(secs) = self.retry_after_secs() {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

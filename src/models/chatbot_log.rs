//! Chatbot usage log model.
//!
//! One row per attributed request, admitted or denied. Rows are immutable.
//! Only admitted rows count toward rate limits; denied rows exist for analytics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::api_key::ApiKey;

/// Represents a record from the `chatbot_logs` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ChatbotLog {
    /// Fresh for every append, so retried appends never collide
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub chatbot_id: Uuid,
    pub api_key_id: Uuid,
    pub method: String,
    pub endpoint: String,

    /// HTTP status the client received (downstream status when admitted)
    pub status_code: i32,

    pub ip: String,
    pub duration_ms: i64,

    /// When the request started
    pub timestamp: DateTime<Utc>,

    /// False for rows recording a gateway denial
    pub admitted: bool,
}

impl ChatbotLog {
    /// Build an admitted log row attributed to one key.
    pub fn for_key(
        attribution: LogAttribution,
        method: &str,
        endpoint: &str,
        ip: &str,
        status_code: u16,
        timestamp: DateTime<Utc>,
        duration_ms: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: attribution.tenant_id,
            chatbot_id: attribution.chatbot_id,
            api_key_id: attribution.api_key_id,
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            status_code: i32::from(status_code),
            ip: ip.to_string(),
            duration_ms: duration_ms.max(0),
            timestamp,
            admitted: true,
        }
    }

    /// Mark the row as a gateway denial.
    pub fn denied(mut self) -> Self {
        self.admitted = false;
        self
    }
}

/// The three ids every log row is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogAttribution {
    pub tenant_id: Uuid,
    pub chatbot_id: Uuid,
    pub api_key_id: Uuid,
}

impl From<&ApiKey> for LogAttribution {
    fn from(key: &ApiKey) -> Self {
        Self {
            tenant_id: key.tenant_id,
            chatbot_id: key.chatbot_id,
            api_key_id: key.id,
        }
    }
}

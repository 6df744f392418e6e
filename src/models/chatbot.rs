//! Chatbot model.
//!
//! A chatbot is a named capability bundle inside a tenant. Keys are attached to
//! exactly one chatbot; the gateway reads only `active` and the capability bits.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::api_key::Capabilities;

/// Represents a chatbot record from the `chatbots` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Chatbot {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,

    #[sqlx(flatten)]
    #[serde(flatten)]
    pub capabilities: Capabilities,

    /// Inactive chatbots reject every key attached to them
    pub active: bool,

    pub created_at: DateTime<Utc>,
}

impl Chatbot {
    pub fn new(tenant_id: Uuid, name: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            capabilities,
            active: true,
            created_at: Utc::now(),
        }
    }
}

//! Chatbot API-key gateway.
//!
//! Per request: extract the key, hash it, look it up, run the limiter, then
//! either resolve the caller's identity or deny. Log appends and usage
//! increments are handed to the background queue and never block the caller.
//!
//! ```text
//! START -> EXTRACT -> HASH -> LOOKUP -> LIMIT_CHECK -> ADMIT -> (async) LOG + INCR
//!                                                  \-> DENY  -> (async) LOG
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    background::BackgroundQueue,
    clock::Clock,
    config::GatewayConfig,
    error::StoreError,
    hasher::{self, HashError},
    limiter::{Decision, RateLimiter},
    models::{
        api_key::{ApiKey, Capabilities, Environment},
        chatbot_log::{ChatbotLog, LogAttribution},
    },
    store::{KeyStore, LogStore},
};

mod denial;
mod usage;

pub use denial::Denial;
pub use usage::UsageGuard;

/// Header carrying the raw key. Header lookups are case-insensitive.
pub const API_KEY_HEADER: &str = "x-api-key";

/// nginx's "client closed request" status.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// What the transport knows about the request.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: String,
    pub endpoint: String,
    pub ip: String,
    pub start_time: DateTime<Utc>,
}

/// The caller resolved from an admitted key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub tenant_id: Uuid,
    pub chatbot_id: Uuid,
    pub api_key_id: Uuid,
    pub environment: Environment,
    pub capabilities: Capabilities,
}

impl From<&ApiKey> for Identity {
    fn from(key: &ApiKey) -> Self {
        Self {
            tenant_id: key.tenant_id,
            chatbot_id: key.chatbot_id,
            api_key_id: key.id,
            environment: key.environment,
            capabilities: key.capabilities,
        }
    }
}

impl From<&Identity> for LogAttribution {
    fn from(identity: &Identity) -> Self {
        Self {
            tenant_id: identity.tenant_id,
            chatbot_id: identity.chatbot_id,
            api_key_id: identity.api_key_id,
        }
    }
}

/// Process-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub dropped_logs_total: u64,
    pub dropped_increments_total: u64,
    /// Missing, malformed and unknown keys. These produce no log row.
    pub unattributed_rejections_total: u64,
}

/// Cheap to clone; clones share the stores, queue and counters.
#[derive(Clone)]
pub struct Gateway {
    keys: Arc<dyn KeyStore>,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
    queue: BackgroundQueue,
    config: GatewayConfig,
    unattributed: Arc<AtomicU64>,
}

impl Gateway {
    pub fn new(
        keys: Arc<dyn KeyStore>,
        logs: Arc<dyn LogStore>,
        clock: Arc<dyn Clock>,
        queue: BackgroundQueue,
        config: GatewayConfig,
    ) -> Self {
        Self {
            keys,
            limiter: RateLimiter::new(logs),
            clock,
            queue,
            config,
            unattributed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Authenticate the presented key and apply the rate limits.
    ///
    /// `header` is the raw `X-API-Key` value, if any. Denials attributable
    /// to a key are logged with their status code. Admitted requests are
    /// logged by `record_admitted` once the downstream status is known.
    ///
    /// The whole path is bounded by the configured deadline (expiry maps to
    /// `Denial::Backend`). Cancelling `cancel` before a decision yields
    /// `Denial::Cancelled` and logs nothing.
    pub async fn authenticate_and_admit(
        &self,
        header: Option<&[u8]>,
        meta: &RequestMeta,
        cancel: &CancellationToken,
    ) -> Result<Identity, Denial> {
        if cancel.is_cancelled() {
            return Err(Denial::Cancelled);
        }

        let evaluated = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Denial::Cancelled),
            outcome = tokio::time::timeout(self.config.auth_deadline, self.evaluate(header)) => {
                outcome.unwrap_or_else(|_| {
                    warn!(
                        endpoint = %meta.endpoint,
                        deadline_ms = self.config.auth_deadline.as_millis() as u64,
                        "authentication deadline exceeded"
                    );
                    Err(Denial::Backend)
                })
            }
        };
        let (key, decision) = evaluated?;

        match Denial::from_decision(decision) {
            None => Ok(Identity::from(&key)),
            Some(denial) => {
                warn!(
                    api_key_id = %key.id,
                    tenant_id = %key.tenant_id,
                    key_prefix = %key.key_prefix,
                    code = denial.code(),
                    "request denied"
                );
                let status_code = denial.status().as_u16();
                let row = self.log_row(LogAttribution::from(&key), meta, status_code);
                self.queue.append_log(row.denied());
                Err(denial)
            }
        }
    }

    /// Hold an admitted request until its downstream status is known.
    ///
    /// The returned guard records the request exactly once: with the status
    /// passed to `UsageGuard::finish`, or with `CLIENT_CLOSED_REQUEST` if it
    /// is dropped first.
    pub fn track(&self, identity: Identity, meta: RequestMeta) -> UsageGuard {
        UsageGuard::new(self.clone(), identity, meta)
    }

    /// Schedule the log row and usage increment of an admitted request.
    ///
    /// `status_code` is what the downstream handler returned.
    pub fn record_admitted(&self, identity: &Identity, meta: &RequestMeta, status_code: u16) {
        self.queue
            .append_log(self.log_row(LogAttribution::from(identity), meta, status_code));
        self.queue
            .increment_usage(identity.api_key_id, meta.start_time);
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            dropped_logs_total: self.queue.dropped_logs_total(),
            dropped_increments_total: self.queue.dropped_increments_total(),
            unattributed_rejections_total: self.unattributed.load(Ordering::Relaxed),
        }
    }

    async fn evaluate(&self, header: Option<&[u8]>) -> Result<(ApiKey, Decision), Denial> {
        let raw = match header {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Err(self.unattributed(Denial::MissingKey)),
        };

        let hashed = hasher::hash_key(raw).map_err(|err| match err {
            HashError::Empty => self.unattributed(Denial::MissingKey),
            HashError::NonAscii => self.unattributed(Denial::MalformedKey),
        })?;

        let key = match self.keys.get_by_hash(&hashed.key_hash).await {
            Ok(key) => key,
            Err(StoreError::NotFound) => {
                warn!(key_prefix = %hashed.key_prefix, "unknown api key");
                return Err(self.unattributed(Denial::UnknownKey));
            }
            Err(err) => {
                error!(key_prefix = %hashed.key_prefix, error = %err, "key lookup failed");
                return Err(Denial::Backend);
            }
        };

        let decision = self
            .limiter
            .check(&key, self.clock.now())
            .await
            .map_err(|err| {
                error!(api_key_id = %key.id, error = %err, "rate limit check failed");
                Denial::Backend
            })?;

        Ok((key, decision))
    }

    fn unattributed(&self, denial: Denial) -> Denial {
        self.unattributed.fetch_add(1, Ordering::Relaxed);
        denial
    }

    fn log_row(
        &self,
        attribution: LogAttribution,
        meta: &RequestMeta,
        status_code: u16,
    ) -> ChatbotLog {
        let duration_ms = (self.clock.now() - meta.start_time).num_milliseconds();
        ChatbotLog::for_key(
            attribution,
            &meta.method,
            &meta.endpoint,
            &meta.ip,
            status_code,
            meta.start_time,
            duration_ms,
        )
    }
}

#[cfg(test)]
mod tests;

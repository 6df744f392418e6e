//! Per-key minute limit and per-tenant daily limit.
//!
//! Counts are of admitted log rows, read before the current request is logged.
//! Denied requests are logged but never count.
//! The read is a snapshot: concurrent requests near the limit may all pass,
//! which is accepted. Nothing here locks or serializes requests.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::{
    clock::next_utc_midnight, error::StoreError, models::api_key::ApiKey, store::LogStore,
};

/// Length of the sliding per-key window.
pub fn minute_window() -> Duration {
    Duration::seconds(60)
}

/// Outcome of a limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit,
    DenyRevoked,
    DenyInactiveBot,
    /// Per-key minute limit reached.
    DenyRpm { retry_after_secs: u64 },
    /// Per-tenant daily limit reached.
    DenyRpd { retry_after_secs: u64 },
}

#[derive(Clone)]
pub struct RateLimiter {
    logs: Arc<dyn LogStore>,
}

impl RateLimiter {
    pub fn new(logs: Arc<dyn LogStore>) -> Self {
        Self { logs }
    }

    /// Decide whether a request made with `key` at `now` may proceed.
    ///
    /// Checks run in order and stop at the first denial: revoked key,
    /// inactive chatbot, minute limit, daily limit. A limit of 0 is unlimited.
    pub async fn check(&self, key: &ApiKey, now: DateTime<Utc>) -> Result<Decision, StoreError> {
        if !key.active {
            return Ok(Decision::DenyRevoked);
        }
        if !key.chatbot_active {
            return Ok(Decision::DenyInactiveBot);
        }

        if key.rpm_limit > 0 {
            let window = minute_window();
            let used = self.logs.count_in_window(key.id, window, now).await?;
            if used >= u64::from(key.rpm_limit) {
                let oldest = self.logs.oldest_in_window(key.id, window, now).await?;
                let retry_after_secs = match oldest {
                    Some(oldest) => ceil_secs(oldest + window - now),
                    None => ceil_secs(window),
                };
                debug!(
                    api_key_id = %key.id,
                    used,
                    limit = key.rpm_limit,
                    retry_after_secs,
                    "minute limit reached"
                );
                return Ok(Decision::DenyRpm { retry_after_secs });
            }
        }

        if key.rpd_limit > 0 {
            let used = self.logs.count_today_by_tenant(key.tenant_id, now).await?;
            if used >= u64::from(key.rpd_limit) {
                let retry_after_secs = ceil_secs(next_utc_midnight(now) - now);
                debug!(
                    tenant_id = %key.tenant_id,
                    used,
                    limit = key.rpd_limit,
                    retry_after_secs,
                    "daily limit reached"
                );
                return Ok(Decision::DenyRpd { retry_after_secs });
            }
        }

        Ok(Decision::Admit)
    }
}

/// Whole seconds, rounded up, never below 1.
fn ceil_secs(duration: Duration) -> u64 {
    let millis = duration.num_milliseconds().max(0) as u64;
    millis.div_ceil(1000).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            api_key::{Capabilities, Environment},
            chatbot_log::{ChatbotLog, LogAttribution},
        },
        store::InMemoryLogStore,
    };
    use chrono::TimeZone;
    use uuid::Uuid;

    fn key(rpm_limit: u32, rpd_limit: u32) -> ApiKey {
        ApiKey {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            chatbot_id: Uuid::new_v4(),
            name: "bot".to_string(),
            key_prefix: "crb_LIVE_abc".to_string(),
            key_hash: "0".repeat(64),
            environment: Environment::Live,
            active: true,
            rpm_limit,
            rpd_limit,
            created_at: Utc::now(),
            created_by: "ops".to_string(),
            chatbot_active: true,
            capabilities: Capabilities::default(),
        }
    }

    async fn seed(logs: &InMemoryLogStore, key: &ApiKey, timestamps: &[DateTime<Utc>]) {
        for &ts in timestamps {
            let log = ChatbotLog::for_key(
                LogAttribution::from(key),
                "GET",
                "/api/bot/v1/whoami",
                "10.0.0.1",
                200,
                ts,
                1,
            );
            logs.create(&log).await.unwrap();
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn admits_with_no_history() {
        let logs = Arc::new(InMemoryLogStore::new());
        let limiter = RateLimiter::new(logs);
        assert_eq!(limiter.check(&key(60, 5000), now()).await.unwrap(), Decision::Admit);
    }

    #[tokio::test]
    async fn revoked_wins_over_everything() {
        let logs = Arc::new(InMemoryLogStore::new());
        logs.set_unavailable(true);
        let limiter = RateLimiter::new(logs);

        let mut revoked = key(1, 1);
        revoked.active = false;
        revoked.chatbot_active = false;
        // counters are not consulted, so the offline store does not matter
        assert_eq!(
            limiter.check(&revoked, now()).await.unwrap(),
            Decision::DenyRevoked
        );
    }

    #[tokio::test]
    async fn inactive_chatbot_is_denied() {
        let limiter = RateLimiter::new(Arc::new(InMemoryLogStore::new()));
        let mut k = key(60, 5000);
        k.chatbot_active = false;
        assert_eq!(
            limiter.check(&k, now()).await.unwrap(),
            Decision::DenyInactiveBot
        );
    }

    #[tokio::test]
    async fn limit_plus_one_is_first_denied() {
        let logs = Arc::new(InMemoryLogStore::new());
        let limiter = RateLimiter::new(logs.clone());
        let k = key(3, 0);

        let two: Vec<_> = (1..=2).map(|s| now() - Duration::seconds(s)).collect();
        seed(&logs, &k, &two).await;
        assert_eq!(limiter.check(&k, now()).await.unwrap(), Decision::Admit);

        seed(&logs, &k, &[now() - Duration::seconds(45)]).await;
        assert_eq!(
            limiter.check(&k, now()).await.unwrap(),
            // oldest entry at now-45s leaves the window in 15s
            Decision::DenyRpm {
                retry_after_secs: 15
            }
        );
    }

    #[tokio::test]
    async fn minute_window_slides() {
        let logs = Arc::new(InMemoryLogStore::new());
        let limiter = RateLimiter::new(logs.clone());
        let k = key(2, 0);
        seed(
            &logs,
            &k,
            &[now() - Duration::seconds(59), now() - Duration::seconds(10)],
        )
        .await;

        assert!(matches!(
            limiter.check(&k, now()).await.unwrap(),
            Decision::DenyRpm { .. }
        ));
        assert_eq!(
            limiter
                .check(&k, now() + Duration::seconds(2))
                .await
                .unwrap(),
            Decision::Admit
        );
    }

    #[tokio::test]
    async fn daily_limit_is_per_tenant_and_retries_at_midnight() {
        let logs = Arc::new(InMemoryLogStore::new());
        let limiter = RateLimiter::new(logs.clone());
        let first = key(0, 3);
        let mut sibling = key(0, 3);
        sibling.tenant_id = first.tenant_id;

        let earlier: Vec<_> = (1..=3).map(|h| now() - Duration::hours(h)).collect();
        seed(&logs, &first, &earlier).await;

        assert_eq!(
            limiter.check(&sibling, now()).await.unwrap(),
            Decision::DenyRpd {
                retry_after_secs: 12 * 3600
            }
        );
        assert_eq!(limiter.check(&key(0, 3), now()).await.unwrap(), Decision::Admit);
    }

    #[tokio::test]
    async fn yesterday_does_not_count_toward_today() {
        let logs = Arc::new(InMemoryLogStore::new());
        let limiter = RateLimiter::new(logs.clone());
        let k = key(0, 1);
        seed(&logs, &k, &[now() - Duration::hours(13)]).await;

        assert_eq!(limiter.check(&k, now()).await.unwrap(), Decision::Admit);
    }

    #[tokio::test]
    async fn denied_rows_count_toward_neither_limit() {
        let logs = Arc::new(InMemoryLogStore::new());
        let limiter = RateLimiter::new(logs.clone());
        let k = key(2, 3);

        for s in 1..=20 {
            let log = ChatbotLog::for_key(
                LogAttribution::from(&k),
                "GET",
                "/api/bot/v1/whoami",
                "10.0.0.1",
                429,
                now() - Duration::seconds(s),
                1,
            );
            logs.create(&log.denied()).await.unwrap();
        }
        seed(&logs, &k, &[now() - Duration::seconds(30)]).await;

        assert_eq!(limiter.check(&k, now()).await.unwrap(), Decision::Admit);
    }

    #[tokio::test]
    async fn zero_limits_are_unlimited() {
        let logs = Arc::new(InMemoryLogStore::new());
        let limiter = RateLimiter::new(logs.clone());
        let k = key(0, 0);
        let many: Vec<_> = (1..=500)
            .map(|ms| now() - Duration::milliseconds(ms * 10))
            .collect();
        seed(&logs, &k, &many).await;

        assert_eq!(limiter.check(&k, now()).await.unwrap(), Decision::Admit);
    }

    #[tokio::test]
    async fn store_errors_propagate() {
        let logs = Arc::new(InMemoryLogStore::new());
        logs.set_unavailable(true);
        let limiter = RateLimiter::new(logs);
        assert!(matches!(
            limiter.check(&key(60, 0), now()).await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn ceil_secs_rounds_up_with_floor_of_one() {
        assert_eq!(ceil_secs(Duration::milliseconds(1)), 1);
        assert_eq!(ceil_secs(Duration::milliseconds(1001)), 2);
        assert_eq!(ceil_secs(Duration::zero()), 1);
        assert_eq!(ceil_secs(Duration::seconds(-5)), 1);
    }
}

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, TimeZone};

use super::*;
use crate::{
    background::{self, BackgroundWorker},
    clock::ManualClock,
    models::{api_key::NewApiKey, chatbot::Chatbot},
    store::{InMemoryKeyStore, InMemoryLogStore},
};

const RAW_KEY: &str = "crb_LIVE_abc123def456";

fn tenant() -> Uuid {
    Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap()
}

fn bot_caps() -> Capabilities {
    Capabilities {
        can_read_complaints: true,
        can_respond: true,
        can_change_state: false,
        can_send_messages: true,
        can_read_metrics: false,
    }
}

struct Harness {
    gateway: Gateway,
    keys: Arc<InMemoryKeyStore>,
    logs: Arc<InMemoryLogStore>,
    clock: Arc<ManualClock>,
    worker: BackgroundWorker,
    chatbot: Chatbot,
}

impl Harness {
    fn new() -> Self {
        Self::with_deadline(StdDuration::from_secs(5))
    }

    fn with_deadline(auth_deadline: StdDuration) -> Self {
        let keys = Arc::new(InMemoryKeyStore::new());
        let logs = Arc::new(InMemoryLogStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        ));
        let (queue, worker) = background::spawn(1024, keys.clone(), logs.clone());
        let gateway = Gateway::new(
            keys.clone(),
            logs.clone(),
            clock.clone(),
            queue,
            GatewayConfig { auth_deadline },
        );

        let mut chatbot = Chatbot::new(tenant(), "helpdesk", bot_caps());
        chatbot.id = Uuid::parse_str("33333333-3333-3333-3333-333333333333").unwrap();
        keys.insert_chatbot(chatbot.clone());

        Self {
            gateway,
            keys,
            logs,
            clock,
            worker,
            chatbot,
        }
    }

    async fn issue(&self, raw_key: &str, rpm_limit: u32, rpd_limit: u32) -> NewApiKey {
        let hashed = hasher::hash_key(raw_key.as_bytes()).unwrap();
        let key = NewApiKey {
            id: Uuid::new_v4(),
            tenant_id: self.chatbot.tenant_id,
            chatbot_id: self.chatbot.id,
            name: "helpdesk key".to_string(),
            key_prefix: hashed.key_prefix,
            key_hash: hashed.key_hash,
            environment: Environment::Live,
            rpm_limit,
            rpd_limit,
            created_at: self.clock.now(),
            created_by: "ops".to_string(),
        };
        self.keys.create(&key).await.unwrap();
        key
    }

    fn meta(&self) -> RequestMeta {
        RequestMeta {
            method: "GET".to_string(),
            endpoint: "/api/bot/v1/reclamos".to_string(),
            ip: "192.168.1.1".to_string(),
            start_time: self.clock.now(),
        }
    }

    async fn call(&self, header: Option<&str>) -> Result<Identity, Denial> {
        self.gateway
            .authenticate_and_admit(
                header.map(str::as_bytes),
                &self.meta(),
                &CancellationToken::new(),
            )
            .await
    }

    /// Call and, when admitted, record a downstream 200.
    async fn request(&self, header: &str) -> Result<Identity, Denial> {
        let meta = self.meta();
        let outcome = self
            .gateway
            .authenticate_and_admit(Some(header.as_bytes()), &meta, &CancellationToken::new())
            .await;
        if let Ok(identity) = &outcome {
            self.gateway.track(identity.clone(), meta).finish(200);
        }
        outcome
    }

    async fn seed_logs(
        &self,
        key: &NewApiKey,
        timestamps: impl IntoIterator<Item = DateTime<Utc>>,
    ) {
        let attribution = LogAttribution {
            tenant_id: key.tenant_id,
            chatbot_id: key.chatbot_id,
            api_key_id: key.id,
        };
        for ts in timestamps {
            let log = ChatbotLog::for_key(attribution, "GET", "/seed", "10.0.0.1", 200, ts, 1);
            self.logs.create(&log).await.unwrap();
        }
    }

    async fn wait_for_logs(&self, expected: usize) {
        for _ in 0..1000 {
            if self.logs.logs().len() >= expected {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(1)).await;
        }
        panic!("expected {expected} logs, found {}", self.logs.logs().len());
    }

    /// Drop the gateway and wait for queued work to land.
    async fn finish(self) -> (Arc<InMemoryKeyStore>, Arc<InMemoryLogStore>) {
        drop(self.gateway);
        assert!(self.worker.drain(StdDuration::from_secs(1)).await);
        (self.keys, self.logs)
    }
}

#[tokio::test]
async fn happy_path_resolves_identity_and_logs_once() {
    let h = Harness::new();
    let key = h.issue(RAW_KEY, 60, 5000).await;

    let identity = h.request(RAW_KEY).await.unwrap();
    assert_eq!(
        identity,
        Identity {
            tenant_id: tenant(),
            chatbot_id: h.chatbot.id,
            api_key_id: key.id,
            environment: Environment::Live,
            capabilities: bot_caps(),
        }
    );

    let (keys, logs) = h.finish().await;
    let rows = logs.logs();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status_code, 200);
    assert_eq!(rows[0].api_key_id, key.id);
    assert_eq!(rows[0].endpoint, "/api/bot/v1/reclamos");
    assert_eq!(rows[0].ip, "192.168.1.1");
    assert_eq!(keys.usage_count(key.id), 1);
    assert_eq!(keys.last_used_at(key.id), Some(rows[0].timestamp));
}

#[tokio::test]
async fn minute_cap_denies_and_logs_429() {
    let h = Harness::new();
    let key = h.issue(RAW_KEY, 60, 5000).await;
    let now = h.clock.now();
    h.seed_logs(&key, (1..=60).map(|s| now - Duration::seconds(s))).await;

    let denial = h.request(RAW_KEY).await.unwrap_err();
    // oldest seeded entry is 60s old and leaves the window immediately
    assert_eq!(denial, Denial::MinuteLimit { retry_after_secs: 1 });
    assert_eq!(denial.status().as_u16(), 429);
    assert_eq!(denial.code(), "rate_limit_minute");

    let (keys, logs) = h.finish().await;
    let rows = logs.logs();
    assert_eq!(rows.len(), 61);
    assert_eq!(rows.last().unwrap().status_code, 429);
    assert!(!rows.last().unwrap().admitted);
    assert_eq!(keys.usage_count(key.id), 0);
}

#[tokio::test]
async fn daily_cap_applies_to_every_key_of_the_tenant() {
    let h = Harness::new();
    let busy = h.issue(RAW_KEY, 0, 5000).await;
    let other_raw = "crb_LIVE_other000000";
    h.issue(other_raw, 0, 5000).await;

    let start_of_day = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
    h.seed_logs(
        &busy,
        (0..5000).map(|i| start_of_day + Duration::milliseconds(i * 100)),
    )
    .await;

    let denial = h.request(other_raw).await.unwrap_err();
    assert_eq!(
        denial,
        Denial::DayLimit {
            retry_after_secs: 12 * 3600
        }
    );
}

#[tokio::test]
async fn revoked_key_is_denied_without_consulting_counters() {
    let h = Harness::new();
    let key = h.issue(RAW_KEY, 1, 1).await;
    h.keys.revoke(key.tenant_id, key.id).await.unwrap();
    // counters are unreachable; a revoked key must still get a clean 403
    h.logs.set_unavailable(true);

    for _ in 0..3 {
        assert_eq!(h.call(Some(RAW_KEY)).await, Err(Denial::Revoked));
    }
}

#[tokio::test]
async fn revoked_key_denials_are_logged_with_403() {
    let h = Harness::new();
    let key = h.issue(RAW_KEY, 60, 5000).await;
    h.keys.revoke(key.tenant_id, key.id).await.unwrap();

    assert_eq!(h.request(RAW_KEY).await, Err(Denial::Revoked));

    let (_, logs) = h.finish().await;
    let rows = logs.logs();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status_code, 403);
}

#[tokio::test]
async fn inactive_chatbot_is_denied() {
    let h = Harness::new();
    h.issue(RAW_KEY, 60, 5000).await;
    h.keys.set_chatbot_active(h.chatbot.id, false);

    assert_eq!(h.call(Some(RAW_KEY)).await, Err(Denial::InactiveBot));
}

#[tokio::test]
async fn unknown_key_is_not_logged() {
    let h = Harness::new();
    h.issue(RAW_KEY, 60, 5000).await;

    assert_eq!(
        h.call(Some("crb_LIVE_zzz999999999")).await,
        Err(Denial::UnknownKey)
    );
    assert_eq!(h.gateway.stats().unattributed_rejections_total, 1);

    let (_, logs) = h.finish().await;
    assert!(logs.logs().is_empty());
}

#[tokio::test]
async fn missing_and_malformed_keys_only_count() {
    let h = Harness::new();

    assert_eq!(h.call(None).await, Err(Denial::MissingKey));
    assert_eq!(h.call(Some("")).await, Err(Denial::MissingKey));
    assert_eq!(h.call(Some("   ")).await, Err(Denial::MissingKey));
    assert_eq!(
        h.call(Some("crb_LIVE_ñ")).await,
        Err(Denial::MalformedKey)
    );
    assert_eq!(h.gateway.stats().unattributed_rejections_total, 4);

    let (_, logs) = h.finish().await;
    assert!(logs.logs().is_empty());
}

#[tokio::test]
async fn header_whitespace_is_trimmed() {
    let h = Harness::new();
    let key = h.issue(RAW_KEY, 60, 5000).await;

    let identity = h.call(Some("  crb_LIVE_abc123def456\t")).await.unwrap();
    assert_eq!(identity.api_key_id, key.id);
}

#[tokio::test]
async fn key_store_failure_never_admits() {
    let h = Harness::new();
    let key = h.issue(RAW_KEY, 60, 5000).await;
    h.keys.set_unavailable(true);

    assert_eq!(h.request(RAW_KEY).await, Err(Denial::Backend));

    h.keys.set_unavailable(false);
    let (keys, logs) = h.finish().await;
    assert!(logs.logs().is_empty());
    assert_eq!(keys.usage_count(key.id), 0);
}

#[tokio::test]
async fn log_store_failure_during_limit_check_is_backend() {
    let h = Harness::new();
    h.issue(RAW_KEY, 60, 5000).await;
    h.logs.set_unavailable(true);

    assert_eq!(h.call(Some(RAW_KEY)).await, Err(Denial::Backend));
}

#[tokio::test]
async fn serial_load_admits_at_most_the_minute_limit() {
    let h = Harness::new();
    h.issue(RAW_KEY, 5, 0).await;

    let mut admitted_at = Vec::new();
    for i in 0..40 {
        if h.request(RAW_KEY).await.is_ok() {
            admitted_at.push(h.clock.now());
        }
        h.wait_for_logs(i + 1).await;
        h.clock.advance(Duration::seconds(5));
    }

    for (i, start) in admitted_at.iter().enumerate() {
        let in_window = admitted_at[i..]
            .iter()
            .filter(|t| **t < *start + Duration::seconds(60))
            .count();
        assert!(in_window <= 5, "{in_window} admissions within 60s of {start}");
    }
    // bursts of 5 at 0-20s, 65-85s and 130-150s, then 195s
    assert_eq!(admitted_at.len(), 16);
}

#[tokio::test]
async fn minute_denials_do_not_consume_the_daily_quota() {
    let h = Harness::new();
    h.issue(RAW_KEY, 2, 10).await;

    // one request every 10s for 100s: admitted at 0s, 10s, 70s and 80s
    let mut admitted = 0;
    for i in 0..10 {
        if h.request(RAW_KEY).await.is_ok() {
            admitted += 1;
        }
        h.wait_for_logs(i + 1).await;
        h.clock.advance(Duration::seconds(10));
    }
    assert_eq!(admitted, 4);

    h.clock.advance(Duration::seconds(120));
    assert!(h.request(RAW_KEY).await.is_ok());

    let (_, logs) = h.finish().await;
    let rows = logs.logs();
    assert_eq!(rows.len(), 11);
    assert_eq!(rows.iter().filter(|row| row.admitted).count(), 5);
}

#[tokio::test]
async fn usage_guard_records_downstream_status_once() {
    let h = Harness::new();
    let key = h.issue(RAW_KEY, 60, 5000).await;

    let identity = h.call(Some(RAW_KEY)).await.unwrap();
    let guard = h.gateway.track(identity, h.meta());
    assert_eq!(guard.identity().api_key_id, key.id);
    guard.finish(201);

    let (keys, logs) = h.finish().await;
    let rows = logs.logs();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status_code, 201);
    assert!(rows[0].admitted);
    assert_eq!(keys.usage_count(key.id), 1);
}

#[tokio::test]
async fn abandoned_admission_still_counts_toward_the_limit() {
    let h = Harness::new();
    let key = h.issue(RAW_KEY, 1, 5000).await;

    let identity = h.call(Some(RAW_KEY)).await.unwrap();
    drop(h.gateway.track(identity, h.meta()));
    h.wait_for_logs(1).await;

    h.clock.advance(Duration::seconds(1));
    assert!(matches!(
        h.call(Some(RAW_KEY)).await,
        Err(Denial::MinuteLimit { .. })
    ));

    let (keys, logs) = h.finish().await;
    let rows = logs.logs();
    assert_eq!(rows[0].status_code, i32::from(CLIENT_CLOSED_REQUEST));
    assert!(rows[0].admitted);
    assert_eq!(keys.usage_count(key.id), 1);
}

#[tokio::test]
async fn zero_limits_never_deny() {
    let h = Harness::new();
    h.issue(RAW_KEY, 0, 0).await;

    for i in 0..50 {
        assert!(h.request(RAW_KEY).await.is_ok());
        h.wait_for_logs(i + 1).await;
        h.clock.advance(Duration::milliseconds(100));
    }
}

#[tokio::test]
async fn cancelled_before_admission_returns_cancelled_and_logs_nothing() {
    let h = Harness::new();
    h.issue(RAW_KEY, 60, 5000).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = h
        .gateway
        .authenticate_and_admit(Some(RAW_KEY.as_bytes()), &h.meta(), &cancel)
        .await;
    assert_eq!(outcome, Err(Denial::Cancelled));

    let (_, logs) = h.finish().await;
    assert!(logs.logs().is_empty());
}

/// A key store that never answers in time.
struct StalledKeyStore;

#[async_trait]
impl KeyStore for StalledKeyStore {
    async fn get_by_hash(&self, _key_hash: &str) -> Result<ApiKey, StoreError> {
        tokio::time::sleep(StdDuration::from_secs(30)).await;
        Err(StoreError::NotFound)
    }

    async fn get_by_chatbot(&self, _: Uuid, _: Uuid) -> Result<Vec<ApiKey>, StoreError> {
        Ok(Vec::new())
    }

    async fn create(&self, _key: &NewApiKey) -> Result<(), StoreError> {
        Ok(())
    }

    async fn revoke(&self, _: Uuid, _: Uuid) -> Result<(), StoreError> {
        Ok(())
    }

    async fn increment_usage(&self, _: Uuid, _: DateTime<Utc>) -> Result<(), StoreError> {
        Ok(())
    }
}

fn stalled_gateway(auth_deadline: StdDuration) -> (Gateway, BackgroundWorker) {
    let keys: Arc<dyn KeyStore> = Arc::new(StalledKeyStore);
    let logs: Arc<dyn LogStore> = Arc::new(InMemoryLogStore::new());
    let (queue, worker) = background::spawn(8, keys.clone(), logs.clone());
    let gateway = Gateway::new(
        keys,
        logs,
        Arc::new(ManualClock::new(Utc::now())),
        queue,
        GatewayConfig { auth_deadline },
    );
    (gateway, worker)
}

fn meta_now() -> RequestMeta {
    RequestMeta {
        method: "GET".to_string(),
        endpoint: "/api/bot/v1/whoami".to_string(),
        ip: "127.0.0.1".to_string(),
        start_time: Utc::now(),
    }
}

#[tokio::test]
async fn deadline_expiry_maps_to_backend() {
    let (gateway, _worker) = stalled_gateway(StdDuration::from_millis(50));

    let outcome = gateway
        .authenticate_and_admit(Some(RAW_KEY.as_bytes()), &meta_now(), &CancellationToken::new())
        .await;
    assert_eq!(outcome, Err(Denial::Backend));
}

#[tokio::test]
async fn cancellation_during_lookup_returns_cancelled() {
    let (gateway, _worker) = stalled_gateway(StdDuration::from_secs(10));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        trigger.cancel();
    });

    let outcome = gateway
        .authenticate_and_admit(Some(RAW_KEY.as_bytes()), &meta_now(), &cancel)
        .await;
    assert_eq!(outcome, Err(Denial::Cancelled));
}

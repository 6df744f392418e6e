//! In-memory key and log stores.
//!
//! Same semantics as the Postgres stores, plus failure injection through
//! `set_unavailable`. Locks are never held across an await.

use std::{
    collections::HashMap,
    sync::{
        RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
    clock::{next_utc_midnight, start_of_utc_day},
    error::StoreError,
    models::{
        api_key::{ApiKey, NewApiKey},
        chatbot::Chatbot,
        chatbot_log::ChatbotLog,
    },
    store::{KeyStore, LogStore},
};

#[derive(Debug, Clone)]
struct StoredKey {
    key: NewApiKey,
    active: bool,
    usage_count: u64,
    last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    chatbots: RwLock<HashMap<Uuid, Chatbot>>,
    // key_hash -> key
    keys: RwLock<HashMap<String, StoredKey>>,
    unavailable: AtomicBool,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_chatbot(&self, chatbot: Chatbot) {
        self.chatbots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(chatbot.id, chatbot);
    }

    pub fn set_chatbot_active(&self, chatbot_id: Uuid, active: bool) {
        if let Some(chatbot) = self
            .chatbots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&chatbot_id)
        {
            chatbot.active = active;
        }
    }

    /// Make every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn usage_count(&self, key_id: Uuid) -> u64 {
        self.keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .find(|stored| stored.key.id == key_id)
            .map(|stored| stored.usage_count)
            .unwrap_or(0)
    }

    pub fn last_used_at(&self, key_id: Uuid) -> Option<DateTime<Utc>> {
        self.keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .find(|stored| stored.key.id == key_id)
            .and_then(|stored| stored.last_used_at)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("key store offline".to_string()));
        }
        Ok(())
    }

    fn joined(&self, stored: &StoredKey) -> Result<ApiKey, StoreError> {
        let chatbots = self.chatbots.read().unwrap_or_else(|e| e.into_inner());
        let chatbot = chatbots.get(&stored.key.chatbot_id).ok_or_else(|| {
            StoreError::Corrupt(format!("key {} has no chatbot", stored.key.id))
        })?;
        let key = &stored.key;

        Ok(ApiKey {
            id: key.id,
            tenant_id: key.tenant_id,
            chatbot_id: key.chatbot_id,
            name: key.name.clone(),
            key_prefix: key.key_prefix.clone(),
            key_hash: key.key_hash.clone(),
            environment: key.environment,
            active: stored.active,
            rpm_limit: key.rpm_limit,
            rpd_limit: key.rpd_limit,
            created_at: key.created_at,
            created_by: key.created_by.clone(),
            chatbot_active: chatbot.active,
            capabilities: chatbot.capabilities,
        })
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn get_by_hash(&self, key_hash: &str) -> Result<ApiKey, StoreError> {
        self.check_available()?;
        let stored = self
            .keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key_hash)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        self.joined(&stored)
    }

    async fn get_by_chatbot(
        &self,
        tenant_id: Uuid,
        chatbot_id: Uuid,
    ) -> Result<Vec<ApiKey>, StoreError> {
        self.check_available()?;
        let mut matching: Vec<StoredKey> = self
            .keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|stored| {
                stored.key.tenant_id == tenant_id && stored.key.chatbot_id == chatbot_id
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.key.created_at.cmp(&a.key.created_at));

        matching.iter().map(|stored| self.joined(stored)).collect()
    }

    async fn create(&self, key: &NewApiKey) -> Result<(), StoreError> {
        self.check_available()?;
        let owned_chatbot = self
            .chatbots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key.chatbot_id)
            .is_some_and(|chatbot| chatbot.tenant_id == key.tenant_id);
        if !owned_chatbot {
            return Err(StoreError::NotFound);
        }

        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        if keys.contains_key(&key.key_hash) {
            return Err(StoreError::DuplicateHash);
        }
        keys.insert(
            key.key_hash.clone(),
            StoredKey {
                key: key.clone(),
                active: true,
                usage_count: 0,
                last_used_at: None,
            },
        );
        Ok(())
    }

    async fn revoke(&self, tenant_id: Uuid, key_id: Uuid) -> Result<(), StoreError> {
        self.check_available()?;
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        let stored = keys
            .values_mut()
            .find(|stored| stored.key.id == key_id && stored.key.tenant_id == tenant_id)
            .ok_or(StoreError::NotFound)?;
        stored.active = false;
        Ok(())
    }

    async fn increment_usage(&self, key_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check_available()?;
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        if let Some(stored) = keys.values_mut().find(|stored| stored.key.id == key_id) {
            stored.usage_count += 1;
            stored.last_used_at = Some(at);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLogStore {
    logs: RwLock<Vec<ChatbotLog>>,
    unavailable: AtomicBool,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of all rows in insertion order.
    pub fn logs(&self) -> Vec<ChatbotLog> {
        self.logs.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("log store offline".to_string()));
        }
        Ok(())
    }

    fn in_window(
        log: &ChatbotLog,
        api_key_id: Uuid,
        window: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        log.admitted
            && log.api_key_id == api_key_id
            && log.timestamp >= now - window
            && log.timestamp < now
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn create(&self, log: &ChatbotLog) -> Result<(), StoreError> {
        self.check_available()?;
        self.logs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(log.clone());
        Ok(())
    }

    async fn count_in_window(
        &self,
        api_key_id: Uuid,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.check_available()?;
        let count = self
            .logs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|log| Self::in_window(log, api_key_id, window, now))
            .count();
        Ok(count as u64)
    }

    async fn oldest_in_window(
        &self,
        api_key_id: Uuid,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.check_available()?;
        let oldest = self
            .logs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|log| Self::in_window(log, api_key_id, window, now))
            .map(|log| log.timestamp)
            .min();
        Ok(oldest)
    }

    async fn count_today_by_tenant(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.check_available()?;
        let (start, end) = (start_of_utc_day(now), next_utc_midnight(now));
        let count = self
            .logs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|log| {
                log.admitted
                    && log.tenant_id == tenant_id
                    && log.timestamp >= start
                    && log.timestamp < end
            })
            .count();
        Ok(count as u64)
    }
}

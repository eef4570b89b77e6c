// [libs/gateway/shared-store/src/local.rs]
//! In-process `SharedStore` fallback (§5 "local fallback that trades
//! cross-process coordination for availability").

use crate::{FenceOutcome, SharedStore, SharedStoreError, WalEntry};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use hounfour_gateway_models::{FencingToken, MAX_SAFE_INTEGER};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self) -> bool {
        self.expires_at.map(|at| Instant::now() < at).unwrap_or(true)
    }
}

#[derive(Default)]
pub struct LocalSharedStore {
    kv: DashMap<String, Entry>,
    hashes: DashMap<String, (DashMap<String, i64>, Option<Instant>)>,
    fence_issued: DashMap<String, u64>,
    fence_last_accepted: DashMap<String, String>,
    wal: Mutex<Vec<WalEntry>>,
    wal_seq: AtomicU64,
}

impl LocalSharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wal_entries(&self) -> Vec<WalEntry> {
        self.wal.lock().expect("wal lock poisoned").clone()
    }

    /// Test-only hook for §8 scenario 7's `CORRUPT` case: pokes a
    /// non-numeric "last accepted" value directly into the store.
    pub fn force_fence_corruption(&self, environment: &str) {
        self.fence_last_accepted.insert(environment.to_string(), "abc".to_string());
    }
}

#[async_trait]
impl SharedStore for LocalSharedStore {
    async fn wal_append(
        &self,
        namespace: &str,
        operation: &str,
        key: &str,
        payload: serde_json::Value,
    ) -> Result<u64, SharedStoreError> {
        let entry_id = self.wal_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = WalEntry {
            entry_id,
            namespace: namespace.to_string(),
            operation: operation.to_string(),
            key: key.to_string(),
            payload,
            recorded_at: Utc::now(),
        };
        self.wal.lock().expect("wal lock poisoned").push(entry);
        Ok(entry_id)
    }

    async fn fence_acquire(&self, environment: &str) -> Result<FencingToken, SharedStoreError> {
        let mut counter = self.fence_issued.entry(environment.to_string()).or_insert(0);
        let next = *counter + 1;
        if next > MAX_SAFE_INTEGER {
            return Err(SharedStoreError::FenceIssuanceOverflow(environment.to_string()));
        }
        *counter = next;
        Ok(FencingToken::new(next).expect("checked against MAX_SAFE_INTEGER above"))
    }

    async fn fence_validate_and_advance(&self, environment: &str, token: FencingToken) -> FenceOutcome {
        let stored = self
            .fence_last_accepted
            .get(environment)
            .map(|entry| entry.clone())
            .unwrap_or_else(|| "0".to_string());

        let last = match stored.parse::<u64>() {
            Ok(value) if value <= MAX_SAFE_INTEGER => value,
            _ => return FenceOutcome::Corrupt,
        };

        if token.value() > last {
            self.fence_last_accepted.insert(environment.to_string(), token.value().to_string());
            FenceOutcome::Ok
        } else {
            FenceOutcome::Stale
        }
    }

    async fn get(&self, key: &str) -> Option<String> {
        let entry = self.kv.get(key)?;
        entry.is_live().then(|| entry.value.clone())
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), SharedStoreError> {
        self.kv.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> Result<bool, SharedStoreError> {
        if let Some(existing) = self.kv.get(key) {
            if existing.is_live() {
                return Ok(false);
            }
        }
        self.kv.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), SharedStoreError> {
        self.kv.remove(key);
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, SharedStoreError> {
        let current = self
            .kv
            .get(key)
            .filter(|e| e.is_live())
            .and_then(|e| e.value.parse::<i64>().ok())
            .unwrap_or(0);
        let updated = current + delta;
        self.kv.insert(
            key.to_string(),
            Entry {
                value: updated.to_string(),
                expires_at: None,
            },
        );
        Ok(updated)
    }

    async fn hash_set(&self, key: &str, field: &str, value: i64) -> Result<(), SharedStoreError> {
        let slot = self.hashes.entry(key.to_string()).or_insert_with(|| (DashMap::new(), None));
        slot.0.insert(field.to_string(), value);
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> HashMap<String, i64> {
        match self.hashes.get(key) {
            Some(slot) => {
                let expired = slot.1.map(|at| Instant::now() >= at).unwrap_or(false);
                if expired {
                    HashMap::new()
                } else {
                    slot.0.iter().map(|kv| (kv.key().clone(), *kv.value())).collect()
                }
            }
            None => HashMap::new(),
        }
    }

    async fn hash_delete_field(&self, key: &str, field: &str) -> Result<(), SharedStoreError> {
        let mut remove_whole = false;
        if let Some(slot) = self.hashes.get(key) {
            slot.0.remove(field);
            remove_whole = slot.0.is_empty();
        }
        if remove_whole {
            self.hashes.remove(key);
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), SharedStoreError> {
        if let Some(mut entry) = self.kv.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
            return Ok(());
        }
        if let Some(mut slot) = self.hashes.get_mut(key) {
            slot.1 = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fencing_follows_scenario_seven() {
        let store = LocalSharedStore::new();
        for _ in 0..6 {
            store.fence_acquire("prod").await.unwrap();
        }
        let token = store.fence_acquire("prod").await.unwrap();
        assert_eq!(token.value(), 7);

        assert_eq!(store.fence_validate_and_advance("prod", token).await, FenceOutcome::Ok);
        assert_eq!(store.fence_validate_and_advance("prod", token).await, FenceOutcome::Stale);

        store.force_fence_corruption("prod");
        assert_eq!(store.fence_validate_and_advance("prod", token).await, FenceOutcome::Corrupt);
    }

    #[tokio::test]
    async fn set_if_absent_detects_replay() {
        let store = LocalSharedStore::new();
        let first = store.set_if_absent("pid_X", "1".into(), Duration::from_secs(60)).await.unwrap();
        let second = store.set_if_absent("pid_X", "1".into(), Duration::from_secs(60)).await.unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn hash_removes_itself_once_last_field_cleared() {
        let store = LocalSharedStore::new();
        store.hash_set("ensemble:A:reserved", "0", 1000).await.unwrap();
        store.hash_set("ensemble:A:reserved", "1", 2000).await.unwrap();

        store.hash_delete_field("ensemble:A:reserved", "0").await.unwrap();
        assert_eq!(store.hash_get_all("ensemble:A:reserved").await.len(), 1);

        store.hash_delete_field("ensemble:A:reserved", "1").await.unwrap();
        assert!(store.hash_get_all("ensemble:A:reserved").await.is_empty());
    }

    #[tokio::test]
    async fn incr_by_accumulates() {
        let store = LocalSharedStore::new();
        assert_eq!(store.incr_by("spent", 100).await.unwrap(), 100);
        assert_eq!(store.incr_by("spent", -40).await.unwrap(), 60);
    }
}

// [libs/gateway/toolcall/src/cache.rs]
//! TTL + LRU idempotency cache (§4.H `IdempotencyCache`).

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_TTL_SECS: u64 = 60;
const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Deterministic key for a tool invocation: `(tenant, tool_name,
/// canonical_args_hash)` collapsed to one string (§4.H).
pub fn idempotency_key(tenant: &str, tool_name: &str, arguments: &serde_json::Value) -> String {
    let canonical = canonicalize(arguments);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());
    format!("{tenant}:{tool_name}:{hash}")
}

/// Recursively sorts object keys so semantically-identical argument
/// payloads hash identically regardless of field order.
fn canonicalize(value: &serde_json::Value) -> String {
    fn sorted(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut sorted_map = serde_json::Map::new();
                let mut keys: Vec<_> = map.keys().cloned().collect();
                keys.sort();
                for key in keys {
                    sorted_map.insert(key.clone(), sorted(&map[&key]));
                }
                serde_json::Value::Object(sorted_map)
            }
            serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

struct CacheEntry {
    value: serde_json::Value,
    inserted_at: Instant,
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    /// Recency order, oldest (least-recently-used) first.
    order: Vec<String>,
}

pub struct IdempotencyCache {
    ttl: Duration,
    max_entries: usize,
    inner: Mutex<Inner>,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    fn touch(inner: &mut Inner, key: &str) {
        if let Some(pos) = inner.order.iter().position(|k| k == key) {
            let existing = inner.order.remove(pos);
            inner.order.push(existing);
        }
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut inner = self.inner.lock().expect("idempotency cache lock poisoned");
        let expired = match inner.entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            inner.entries.remove(key);
            inner.order.retain(|k| k != key);
            return None;
        }
        Self::touch(&mut inner, key);
        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn set(&self, key: String, value: serde_json::Value) {
        let mut inner = self.inner.lock().expect("idempotency cache lock poisoned");

        if inner.entries.contains_key(&key) {
            inner.entries.insert(
                key.clone(),
                CacheEntry {
                    value,
                    inserted_at: Instant::now(),
                },
            );
            Self::touch(&mut inner, &key);
            return;
        }

        if inner.entries.len() >= self.max_entries {
            if let Some(lru_key) = inner.order.first().cloned() {
                inner.order.remove(0);
                inner.entries.remove(&lru_key);
            }
        }

        inner.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
        inner.order.push(key);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("idempotency cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TTL_SECS), DEFAULT_MAX_ENTRIES)
    }
}

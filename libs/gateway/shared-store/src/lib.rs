// [libs/gateway/shared-store/src/lib.rs]
/*!
 * =================================================================
 * APARATO: SHARED STORE PORT (V1.0)
 * CLASIFICACIÓN: INFRAESTRUCTURA (ESTRATO L1 — PUERTO)
 * RESPONSABILIDAD: WAL, FENCING MONOTÓNICO Y PRIMITIVAS KV/HASH CON TTL
 *
 * `SharedStore` is the one capability abstraction every durable
 * cross-process coordination point in the gateway goes through: WAL
 * audit, fencing tokens, ensemble reservations, payment nonces and
 * idempotency entries. §5 calls out that "all durable state has a local
 * fallback that trades cross-process coordination for availability" —
 * `LocalSharedStore` is exactly that fallback, an in-process
 * implementation with no external dependency. A Redis-backed
 * implementation is a drop-in behind the same trait; `REDIS_URL` is
 * merely recognized (§6), not required to be wired to a real client.
 * =================================================================
 */

mod fencing;
mod local;

pub use fencing::FenceOutcome;
pub use local::LocalSharedStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hounfour_gateway_models::FencingToken;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SharedStoreError {
    #[error("FENCE_ISSUANCE_OVERFLOW: next token for environment '{0}' would exceed the safe-integer bound")]
    FenceIssuanceOverflow(String),
    #[error("shared store backend unavailable: {0}")]
    Unavailable(String),
}

/// One committed WAL row (§4.L). Best-effort at call sites: a failed
/// append is logged, not propagated, unless the calling component marks
/// it fatal (budget's `fail-closed` is the one exception).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WalEntry {
    pub entry_id: u64,
    pub namespace: String,
    pub operation: String,
    pub key: String,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn wal_append(
        &self,
        namespace: &str,
        operation: &str,
        key: &str,
        payload: serde_json::Value,
    ) -> Result<u64, SharedStoreError>;

    /// Acquires the next fencing token for `environment` (monotonic
    /// `INCR`). Fails the acquisition, per §4.L, if the result would
    /// exceed `FencingToken`'s safe-integer bound.
    async fn fence_acquire(&self, environment: &str) -> Result<FencingToken, SharedStoreError>;

    /// CAS-advances the "last accepted" value for `environment`.
    async fn fence_validate_and_advance(&self, environment: &str, token: FencingToken) -> FenceOutcome;

    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), SharedStoreError>;
    /// Set-if-absent with TTL — the primitive behind payment nonce
    /// replay guards and idempotent ensemble reservations. Returns
    /// `true` if this call created the key (a non-replay).
    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> Result<bool, SharedStoreError>;
    async fn delete(&self, key: &str) -> Result<(), SharedStoreError>;
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, SharedStoreError>;

    async fn hash_set(&self, key: &str, field: &str, value: i64) -> Result<(), SharedStoreError>;
    async fn hash_get_all(&self, key: &str) -> HashMap<String, i64>;
    async fn hash_delete_field(&self, key: &str, field: &str) -> Result<(), SharedStoreError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), SharedStoreError>;
}

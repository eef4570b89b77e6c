// [libs/gateway/object-store/src/lib.rs]
/*!
 * =================================================================
 * APARATO: OBJECT STORE PORT (V1.0)
 * CLASIFICACIÓN: INFRASTRUCTURE ADAPTER (ESTRATO L3)
 * RESPONSABILIDAD: ARCHIVO HISTÓRICO DE ARTEFACTOS ROTADOS DEL LEDGER
 *
 * The ledger component (§4.B) rotates files locally and, optionally,
 * ships the rotated archive off-box. This crate is the narrow capability
 * the ledger talks to for that — out of scope per §1 is the concrete
 * transport (S3, GCS, a git-backed blob store); what's in scope is the
 * port and an index record shape any of those transports can satisfy.
 * =================================================================
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("OBJECT_STORE_UPLOAD_FAILED: {0}")]
    UploadFailed(String),
    #[error("OBJECT_STORE_IO_FAULT: {0}")]
    Io(#[from] std::io::Error),
}

/// One entry in `hounfour/ledger/index.json`: a rotated archive's final
/// resting place plus its integrity checksum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveIndexEntry {
    pub tenant_id: String,
    pub archive_name: String,
    pub object_key: String,
    pub sha256: String,
    pub uploaded_at: chrono::DateTime<chrono::Utc>,
    pub size_bytes: u64,
}

/// Capability for shipping a rotated, gzip-compressed ledger archive
/// somewhere durable outside the local filesystem.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<(), ObjectStoreError>;
    async fn get_index(&self) -> Result<Vec<ArchiveIndexEntry>, ObjectStoreError>;
    async fn put_index(&self, entries: &[ArchiveIndexEntry]) -> Result<(), ObjectStoreError>;
}

/// SHA-256 hex digest of a byte slice, used to checksum an archive before
/// it leaves the box.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// In-memory `ObjectStore` used by tests and as the local-fallback
/// implementation when no external transport is configured (§5's
/// "local fallback... documented as such").
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: tokio::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
    index: tokio::sync::Mutex<Vec<ArchiveIndexEntry>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<(), ObjectStoreError> {
        self.objects.lock().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get_index(&self) -> Result<Vec<ArchiveIndexEntry>, ObjectStoreError> {
        Ok(self.index.lock().await.clone())
    }

    async fn put_index(&self, entries: &[ArchiveIndexEntry]) -> Result<(), ObjectStoreError> {
        *self.index.lock().await = entries.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_deterministic() {
        let a = sha256_hex(b"hello");
        let b = sha256_hex(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn in_memory_store_round_trips_objects_and_index() {
        let store = InMemoryObjectStore::new();
        store.put_object("k1", vec![1, 2, 3]).await.unwrap();

        let entry = ArchiveIndexEntry {
            tenant_id: "t1".into(),
            archive_name: "ledger-2026-01-01-001.jsonl.gz".into(),
            object_key: "k1".into(),
            sha256: sha256_hex(&[1, 2, 3]),
            uploaded_at: chrono::Utc::now(),
            size_bytes: 3,
        };
        store.put_index(&[entry.clone()]).await.unwrap();

        let fetched = store.get_index().await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].object_key, "k1");
    }
}

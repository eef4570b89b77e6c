// [libs/gateway/ledger/src/lib.rs]
/*!
 * =================================================================
 * APARATO: LEDGER V2 ENGINE (V1.0)
 * CLASIFICACIÓN: DOMAIN LOGIC (ESTRATO L2)
 * RESPONSABILIDAD: REGISTRO APPEND-ONLY POR TENANT, ROTACIÓN Y AUDITORÍA CRC32
 *
 * Every invocation lands as one JSONL line under
 * `{base_dir}/{tenant_id}/ledger.jsonl`, CRC32-stamped over its own
 * canonical form. Writes for a given tenant are serialized through a
 * per-tenant mutex (§5 "per-tenant ledger append is totally ordered");
 * readers may lag and are never blocked by a writer.
 * =================================================================
 */

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hounfour_gateway_models::LedgerEntryV2;
use hounfour_gateway_object_store::{sha256_hex, ArchiveIndexEntry, ObjectStore, ObjectStoreError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("LEDGER_IO_FAULT: {0}")]
    Io(#[from] std::io::Error),
    #[error("LEDGER_SERIALIZATION_FAULT: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("LEDGER_ARCHIVE_EXPORT_FAULT: {0}")]
    Export(#[from] ObjectStoreError),
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub base_dir: PathBuf,
    pub max_size_mb: u64,
    pub max_age_days: u64,
    pub fsync: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./ledger-data"),
            max_size_mb: 50,
            max_age_days: 30,
            fsync: false,
        }
    }
}

/// Totals returned by a full-scan recomputation (§4.B `recompute`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerTotals {
    pub total_cost_micro: u64,
    pub entry_count: u64,
}

/// Per-tenant append-only JSONL ledger with CRC32-audited rows and
/// size/age-based rotation.
pub struct Ledger {
    config: LedgerConfig,
    tenant_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Ledger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            tenant_locks: DashMap::new(),
        }
    }

    fn tenant_dir(&self, tenant_id: &str) -> PathBuf {
        self.config.base_dir.join(tenant_id)
    }

    fn current_file(&self, tenant_id: &str) -> PathBuf {
        self.tenant_dir(tenant_id).join("ledger.jsonl")
    }

    fn lock_for(&self, tenant_id: &str) -> Arc<Mutex<()>> {
        self.tenant_locks
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Appends `entry` to the tenant's current ledger file, stamping its
    /// CRC32 over the canonical form of every other field. Rotates first
    /// if the current file has crossed its size or age threshold.
    #[instrument(skip(self, entry), fields(tenant = %tenant_id))]
    pub async fn append(&self, tenant_id: &str, mut entry: LedgerEntryV2) -> Result<(), LedgerError> {
        let lock = self.lock_for(tenant_id);
        let _guard = lock.lock().await;

        let dir = self.tenant_dir(tenant_id);
        fs::create_dir_all(&dir).await?;

        self.rotate_if_needed(tenant_id).await?;

        entry.crc32 = 0;
        entry.crc32 = crc32_of_entry(&entry)?;

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let path = self.current_file(tenant_id);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        if self.config.fsync {
            file.sync_all().await?;
        }

        debug!(bytes = line.len(), "ledger entry appended");
        Ok(())
    }

    async fn rotate_if_needed(&self, tenant_id: &str) -> Result<(), LedgerError> {
        let path = self.current_file(tenant_id);
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let size_mb = metadata.len() / (1024 * 1024);
        let too_big = size_mb >= self.config.max_size_mb;

        let too_old = match self.oldest_entry_timestamp(&path).await? {
            Some(oldest) => (Utc::now() - oldest).num_days() as u64 >= self.config.max_age_days,
            None => false,
        };

        if !too_big && !too_old {
            return Ok(());
        }

        let archive_name = self.next_archive_name(tenant_id).await?;
        let archive_path = self.tenant_dir(tenant_id).join(&archive_name);
        fs::rename(&path, &archive_path).await?;
        warn!(archive = %archive_name, too_big, too_old, "ledger rotated");
        Ok(())
    }

    async fn oldest_entry_timestamp(&self, path: &Path) -> Result<Option<DateTime<Utc>>, LedgerError> {
        let contents = fs::read_to_string(path).await?;
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(entry) = serde_json::from_str::<LedgerEntryV2>(line) {
                return Ok(Some(entry.timestamp));
            }
        }
        Ok(None)
    }

    async fn next_archive_name(&self, tenant_id: &str) -> Result<String, LedgerError> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let dir = self.tenant_dir(tenant_id);
        let mut max_seq = 0u32;

        let mut entries = fs::read_dir(&dir).await?;
        let prefix = format!("ledger-{today}-");
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix(&prefix) {
                if let Some(seq_str) = rest.strip_suffix(".jsonl") {
                    if let Ok(seq) = seq_str.parse::<u32>() {
                        max_seq = max_seq.max(seq);
                    }
                }
            }
        }

        Ok(format!("{prefix}{:03}.jsonl", max_seq + 1))
    }

    /// Returns every archive file for `tenant_id` in append order, oldest
    /// first, followed by the current (un-rotated) file if present.
    async fn ordered_files(&self, tenant_id: &str) -> Result<Vec<PathBuf>, LedgerError> {
        let dir = self.tenant_dir(tenant_id);
        if fs::metadata(&dir).await.is_err() {
            return Ok(vec![]);
        }

        let mut archives = vec![];
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("ledger-") && name.ends_with(".jsonl") {
                archives.push(name);
            }
        }
        archives.sort();

        let mut files: Vec<PathBuf> = archives.into_iter().map(|name| dir.join(name)).collect();

        let current = self.current_file(tenant_id);
        if fs::metadata(&current).await.is_ok() {
            files.push(current);
        }

        Ok(files)
    }

    /// Reads every entry for `tenant_id` across all rotated archives and
    /// the current file, in append order. CRC32 mismatches are skipped
    /// with a warning; a torn trailing line is tolerated silently.
    #[instrument(skip(self), fields(tenant = %tenant_id))]
    pub async fn scan_entries(&self, tenant_id: &str) -> Result<Vec<LedgerEntryV2>, LedgerError> {
        let files = self.ordered_files(tenant_id).await?;
        let mut out = Vec::new();

        for path in files {
            let contents = fs::read_to_string(&path).await?;
            let lines: Vec<&str> = contents.lines().collect();
            let last_index = lines.len().saturating_sub(1);

            for (index, line) in lines.iter().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let entry: LedgerEntryV2 = match serde_json::from_str(line) {
                    Ok(entry) => entry,
                    Err(err) => {
                        if index == last_index {
                            debug!(file = %path.display(), "tolerating torn trailing line");
                        } else {
                            warn!(file = %path.display(), %err, "skipping unparsable ledger line");
                        }
                        continue;
                    }
                };

                match crc32_of_entry(&entry_with_crc_zeroed(&entry)) {
                    Ok(expected) if expected == entry.crc32 => out.push(entry),
                    Ok(_) => warn!(file = %path.display(), trace_id = %entry.trace_id, "skipping ledger entry with CRC32 mismatch"),
                    Err(err) => warn!(file = %path.display(), %err, "failed to recompute CRC32 for ledger entry"),
                }
            }
        }

        Ok(out)
    }

    /// Full-scan recomputation of a tenant's total spend and entry count
    /// (§4.B `recompute`) — the authoritative cross-check against the
    /// in-memory budget counters.
    pub async fn recompute(&self, tenant_id: &str) -> Result<LedgerTotals, LedgerError> {
        let entries = self.scan_entries(tenant_id).await?;
        let total_cost_micro = entries.iter().map(|e| e.total_cost_micro).sum();
        Ok(LedgerTotals {
            total_cost_micro,
            entry_count: entries.len() as u64,
        })
    }

    /// Gzip-compresses a rotated archive, checksums it, uploads it through
    /// `store`, and appends it to `hounfour/ledger/index.json` (§4.B
    /// "Archive export").
    #[instrument(skip(self, store), fields(tenant = %tenant_id, archive = %archive_name))]
    pub async fn export_archive(
        &self,
        tenant_id: &str,
        archive_name: &str,
        store: &dyn ObjectStore,
    ) -> Result<ArchiveIndexEntry, LedgerError> {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let path = self.tenant_dir(tenant_id).join(archive_name);
        let raw = fs::read(&path).await?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw)?;
        let compressed = encoder.finish()?;

        let checksum = sha256_hex(&compressed);
        let object_key = format!("hounfour/ledger/{tenant_id}/{archive_name}.gz");

        store.put_object(&object_key, compressed.clone()).await?;

        let index_entry = ArchiveIndexEntry {
            tenant_id: tenant_id.to_string(),
            archive_name: archive_name.to_string(),
            object_key,
            sha256: checksum,
            uploaded_at: Utc::now(),
            size_bytes: compressed.len() as u64,
        };

        let mut index = store.get_index().await?;
        index.push(index_entry.clone());
        store.put_index(&index).await?;

        Ok(index_entry)
    }
}

fn entry_with_crc_zeroed(entry: &LedgerEntryV2) -> LedgerEntryV2 {
    let mut clone = entry.clone();
    clone.crc32 = 0;
    clone
}

/// CRC32 over the canonical (key-sorted) JSON form of `entry`, excluding
/// the `crc32` field itself.
fn crc32_of_entry(entry: &LedgerEntryV2) -> Result<u32, serde_json::Error> {
    let value = serde_json::to_value(entry)?;
    let mut map: BTreeMap<String, serde_json::Value> = match value {
        serde_json::Value::Object(obj) => obj.into_iter().collect(),
        _ => unreachable!("LedgerEntryV2 always serializes to an object"),
    };
    map.remove("crc32");

    let canonical = serde_json::to_string(&map)?;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(canonical.as_bytes());
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hounfour_gateway_models::BillingMethod;
    use hounfour_gateway_object_store::InMemoryObjectStore;

    fn sample_entry(trace_id: &str, total: u64) -> LedgerEntryV2 {
        LedgerEntryV2 {
            schema_version: 2,
            timestamp: Utc::now(),
            trace_id: trace_id.to_string(),
            agent: "translator".into(),
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            project_id: "P".into(),
            phase_id: Some("H".into()),
            sprint_id: Some("S".into()),
            tenant_id: "tenant-1".into(),
            nft_id: None,
            pool_id: Some("fast-code".into()),
            prompt_tokens: 500,
            completion_tokens: 200,
            reasoning_tokens: 0,
            input_cost_micro: total / 2,
            output_cost_micro: total - total / 2,
            reasoning_cost_micro: 0,
            total_cost_micro: total,
            price_table_version: 1,
            billing_method: BillingMethod::ProviderReported,
            latency_ms: 120,
            crc32: 0,
        }
    }

    #[tokio::test]
    async fn append_then_scan_yields_same_entries_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(LedgerConfig {
            base_dir: dir.path().to_path_buf(),
            ..Default::default()
        });

        ledger.append("tenant-1", sample_entry("t-1", 100)).await.unwrap();
        ledger.append("tenant-1", sample_entry("t-2", 200)).await.unwrap();
        ledger.append("tenant-1", sample_entry("t-3", 300)).await.unwrap();

        let entries = ledger.scan_entries("tenant-1").await.unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.trace_id.as_str()).collect();
        assert_eq!(ids, vec!["t-1", "t-2", "t-3"]);
    }

    #[tokio::test]
    async fn recompute_sums_total_cost_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(LedgerConfig {
            base_dir: dir.path().to_path_buf(),
            ..Default::default()
        });

        ledger.append("tenant-1", sample_entry("t-1", 100)).await.unwrap();
        ledger.append("tenant-1", sample_entry("t-2", 200)).await.unwrap();

        let totals = ledger.recompute("tenant-1").await.unwrap();
        assert_eq!(totals.total_cost_micro, 300);
        assert_eq!(totals.entry_count, 2);
    }

    #[tokio::test]
    async fn corrupted_crc_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(LedgerConfig {
            base_dir: dir.path().to_path_buf(),
            ..Default::default()
        });
        ledger.append("tenant-1", sample_entry("t-1", 100)).await.unwrap();

        let path = ledger.current_file("tenant-1");
        let contents = fs::read_to_string(&path).await.unwrap();
        let mut entry: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
        entry["crc32"] = serde_json::json!(999_999);
        fs::write(&path, format!("{}\n", entry)).await.unwrap();

        let entries = ledger.scan_entries("tenant-1").await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn torn_trailing_line_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(LedgerConfig {
            base_dir: dir.path().to_path_buf(),
            ..Default::default()
        });
        ledger.append("tenant-1", sample_entry("t-1", 100)).await.unwrap();

        let path = ledger.current_file("tenant-1");
        let mut file = fs::OpenOptions::new().append(true).open(&path).await.unwrap();
        file.write_all(b"{\"trace_id\":\"truncated").await.unwrap();

        let entries = ledger.scan_entries("tenant-1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].trace_id, "t-1");
    }

    #[tokio::test]
    async fn export_archive_round_trips_through_object_store() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(LedgerConfig {
            base_dir: dir.path().to_path_buf(),
            max_size_mb: 0,
            ..Default::default()
        });
        ledger.append("tenant-1", sample_entry("t-1", 100)).await.unwrap();
        // Forces rotation on the next append since max_size_mb is 0.
        ledger.append("tenant-1", sample_entry("t-2", 200)).await.unwrap();

        let archive_name = ledger.next_archive_name_for_test("tenant-1").await;
        let store = InMemoryObjectStore::new();
        let indexed = ledger.export_archive("tenant-1", &archive_name, &store).await.unwrap();
        assert_eq!(indexed.tenant_id, "tenant-1");

        let index = store.get_index().await.unwrap();
        assert_eq!(index.len(), 1);
    }

    impl Ledger {
        /// Test-only helper: report the archive name that rotation already
        /// produced, since `next_archive_name` always predicts the *next*
        /// (not-yet-created) one.
        async fn next_archive_name_for_test(&self, tenant_id: &str) -> String {
            let dir = self.tenant_dir(tenant_id);
            let mut archives = vec![];
            let mut entries = fs::read_dir(&dir).await.unwrap();
            while let Some(entry) = entries.next_entry().await.unwrap() {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with("ledger-") && name.ends_with(".jsonl") {
                    archives.push(name);
                }
            }
            archives.sort();
            archives.pop().expect("expected at least one rotated archive")
        }
    }
}

// [libs/gateway/budget/src/lib.rs]
/*!
 * =================================================================
 * APARATO: BUDGET ENFORCER (V1.0)
 * CLASIFICACIÓN: DOMAIN LOGIC (ESTRATO L2)
 * RESPONSABILIDAD: CONTADORES DE GASTO, CHECKPOINT WRITE-AHEAD Y POLÍTICA
 *                  FAIL-OPEN / FAIL-CLOSED
 *
 * `recordCost` is a write-ahead commit: the ledger entry lands first, then
 * a checkpoint snapshot of the counters it implies, and only then do the
 * in-memory counters themselves move. All three steps run under one
 * mutex (§5 "budget commit is serialized globally") so a crash between
 * any two steps leaves the checkpoint, not the in-memory map, as the
 * recovery source of truth.
 * =================================================================
 */

use chrono::Utc;
use hounfour_gateway_ledger::Ledger;
use hounfour_gateway_models::{BudgetSnapshot, LedgerEntryV2, ScopeKey};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum BudgetError {
    #[error("BUDGET_EXCEEDED: scope {scope} would reach {would_be_micro} against limit {limit_micro}")]
    Exceeded {
        scope: String,
        would_be_micro: u64,
        limit_micro: u64,
    },
    #[error("METERING_UNAVAILABLE: ledger/checkpoint commit failed under fail-closed policy: {0}")]
    MeteringUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log and proceed without updating counters; the request still costs
    /// money but isn't reflected in the budget until the outage clears.
    FailOpen,
    /// Reject the request outright when the commit can't land durably.
    FailClosed,
}

/// §6's checkpoint on-disk format: `{schema_version, updated_at, counters,
/// ledger_head_line}`, always written via temp-file + rename.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Checkpoint {
    pub schema_version: u32,
    pub updated_at: chrono::DateTime<Utc>,
    pub counters: HashMap<String, u64>,
    pub ledger_head_line: u64,
}

pub struct BudgetEnforcerConfig {
    pub checkpoint_path: PathBuf,
    pub budgets: HashMap<String, u64>,
    pub warn_percent: f64,
    pub policy: FailurePolicy,
    /// How long a string of commit failures must persist before the
    /// enforcer reports itself degraded (§4.C: "> 5 minutes").
    pub degradation_threshold_secs: u64,
}

impl Default for BudgetEnforcerConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: PathBuf::from("./ledger-data/checkpoint.json"),
            budgets: HashMap::new(),
            warn_percent: 80.0,
            policy: FailurePolicy::FailOpen,
            degradation_threshold_secs: 300,
        }
    }
}

pub struct BudgetEnforcer {
    ledger: std::sync::Arc<Ledger>,
    config: BudgetEnforcerConfig,
    counters: RwLock<HashMap<String, u64>>,
    ledger_head_line: RwLock<u64>,
    commit_mutex: Mutex<()>,
    first_failure_at: std::sync::Mutex<Option<Instant>>,
}

impl BudgetEnforcer {
    /// Restores counters O(1) from the last checkpoint, if one exists.
    pub async fn load(ledger: std::sync::Arc<Ledger>, config: BudgetEnforcerConfig) -> Self {
        let (counters, ledger_head_line) = match tokio::fs::read(&config.checkpoint_path).await {
            Ok(bytes) => match serde_json::from_slice::<Checkpoint>(&bytes) {
                Ok(checkpoint) => {
                    info!(entries = checkpoint.counters.len(), "budget checkpoint restored");
                    (checkpoint.counters, checkpoint.ledger_head_line)
                }
                Err(err) => {
                    warn!(%err, "budget checkpoint present but unreadable; starting from zero");
                    (HashMap::new(), 0)
                }
            },
            Err(_) => (HashMap::new(), 0),
        };

        Self {
            ledger,
            config,
            counters: RwLock::new(counters),
            ledger_head_line: RwLock::new(ledger_head_line),
            commit_mutex: Mutex::new(()),
            first_failure_at: std::sync::Mutex::new(None),
        }
    }

    fn spent(&self, scope: &ScopeKey) -> u64 {
        self.counters
            .read()
            .expect("budget counters lock poisoned")
            .get(scope.as_str())
            .copied()
            .unwrap_or(0)
    }

    fn limit_for(&self, scope: &ScopeKey) -> u64 {
        self.config.budgets.get(scope.as_str()).copied().unwrap_or(0)
    }

    pub fn snapshot(&self, scope: &ScopeKey) -> BudgetSnapshot {
        BudgetSnapshot::compute(scope, self.spent(scope), self.limit_for(scope), self.config.warn_percent)
    }

    pub fn is_exceeded(&self, scope: &ScopeKey) -> bool {
        self.snapshot(scope).exceeded
    }

    pub fn is_warning(&self, scope: &ScopeKey) -> bool {
        self.snapshot(scope).warning
    }

    /// Would `additional_micro` push the most-specific scope over its
    /// limit? Checked before dispatch, per §4.J step 2.
    pub fn would_exceed(&self, scope: &ScopeKey, additional_micro: u64) -> Option<BudgetError> {
        let limit = self.limit_for(scope);
        if limit == 0 {
            return None;
        }
        let would_be = self.spent(scope) + additional_micro;
        (would_be > limit).then(|| BudgetError::Exceeded {
            scope: scope.as_str().to_string(),
            would_be_micro: would_be,
            limit_micro: limit,
        })
    }

    /// Write-ahead commit: ledger append, then checkpoint, then in-memory
    /// counters, all serialized behind one mutex, for every scope in
    /// `scopes` (§3 "atomically" across project/phase/sprint).
    pub async fn record_cost(
        &self,
        tenant_id: &str,
        scopes: &[ScopeKey],
        entry: LedgerEntryV2,
    ) -> Result<(), BudgetError> {
        let _commit_guard = self.commit_mutex.lock().await;
        let cost_micro = entry.total_cost_micro;

        if let Err(err) = self.ledger.append(tenant_id, entry).await {
            return self.handle_commit_failure(format!("ledger append failed: {err}"));
        }

        let new_head = self.ledger_head_line.read().expect("head lock poisoned").saturating_add(1);
        let mut projected = self.counters.read().expect("counters lock poisoned").clone();
        for scope in scopes {
            *projected.entry(scope.as_str().to_string()).or_insert(0) += cost_micro;
        }

        let checkpoint = Checkpoint {
            schema_version: 1,
            updated_at: Utc::now(),
            counters: projected.clone(),
            ledger_head_line: new_head,
        };

        if let Err(err) = write_checkpoint_atomically(&self.config.checkpoint_path, &checkpoint).await {
            return self.handle_commit_failure(format!("checkpoint write failed: {err}"));
        }

        *self.counters.write().expect("counters lock poisoned") = projected;
        *self.ledger_head_line.write().expect("head lock poisoned") = new_head;

        *self.first_failure_at.lock().expect("failure-clock lock poisoned") = None;
        Ok(())
    }

    fn handle_commit_failure(&self, reason: String) -> Result<(), BudgetError> {
        let mut first_failure = self.first_failure_at.lock().expect("failure-clock lock poisoned");
        let started = *first_failure.get_or_insert_with(Instant::now);
        let degraded = started.elapsed().as_secs() >= self.config.degradation_threshold_secs;

        match self.config.policy {
            FailurePolicy::FailOpen => {
                warn!(reason, degraded, "budget commit failed under fail-open policy; proceeding without charge");
                Ok(())
            }
            FailurePolicy::FailClosed => {
                error!(reason, degraded, "budget commit failed under fail-closed policy; rejecting request");
                Err(BudgetError::MeteringUnavailable(reason))
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.first_failure_at
            .lock()
            .expect("failure-clock lock poisoned")
            .map(|started| started.elapsed().as_secs() >= self.config.degradation_threshold_secs)
            .unwrap_or(false)
    }
}

async fn write_checkpoint_atomically(path: &std::path::Path, checkpoint: &Checkpoint) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(checkpoint)?;
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hounfour_gateway_ledger::LedgerConfig;
    use hounfour_gateway_models::BillingMethod;
    use std::sync::Arc;

    fn entry(total: u64) -> LedgerEntryV2 {
        LedgerEntryV2 {
            schema_version: 2,
            timestamp: Utc::now(),
            trace_id: "t".into(),
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
            latency_ms: 10,
            crc32: 0,
        }
    }

    async fn enforcer(dir: &tempfile::TempDir, budgets: HashMap<String, u64>) -> BudgetEnforcer {
        let ledger = Arc::new(Ledger::new(LedgerConfig {
            base_dir: dir.path().join("ledger"),
            ..Default::default()
        }));
        BudgetEnforcer::load(
            ledger,
            BudgetEnforcerConfig {
                checkpoint_path: dir.path().join("checkpoint.json"),
                budgets,
                ..Default::default()
            },
        )
        .await
    }

    #[tokio::test]
    async fn scenario_one_increments_all_three_scopes() {
        let dir = tempfile::tempdir().unwrap();
        let enforcer = enforcer(&dir, HashMap::new()).await;
        let scopes = ScopeKey::hierarchy("P", Some("H"), Some("S"));

        enforcer.record_cost("tenant-1", &scopes, entry(3250)).await.unwrap();

        assert_eq!(enforcer.spent(&ScopeKey::project("P")), 3250);
        assert_eq!(enforcer.spent(&ScopeKey::phase("P", "H")), 3250);
        assert_eq!(enforcer.spent(&ScopeKey::sprint("P", "H", "S")), 3250);
    }

    #[tokio::test]
    async fn scenario_two_rejects_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut budgets = HashMap::new();
        budgets.insert("project:P".to_string(), 1_000_000);
        let enforcer = enforcer(&dir, budgets).await;

        // Pre-seed spend via a direct record, then check a pre-flight that
        // would exceed is rejected before it is ever appended.
        let scopes = vec![ScopeKey::project("P")];
        enforcer.record_cost("tenant-1", &scopes, entry(999_500)).await.unwrap();

        let rejection = enforcer.would_exceed(&ScopeKey::project("P"), 3250);
        assert!(rejection.is_some());

        let totals = enforcer
            .ledger
            .recompute("tenant-1")
            .await
            .unwrap();
        assert_eq!(totals.total_cost_micro, 999_500);
    }

    #[tokio::test]
    async fn checkpoint_restores_counters_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let scopes = vec![ScopeKey::project("P")];

        {
            let enforcer = enforcer(&dir, HashMap::new()).await;
            enforcer.record_cost("tenant-1", &scopes, entry(500)).await.unwrap();
        }

        let reloaded = enforcer(&dir, HashMap::new()).await;
        assert_eq!(reloaded.spent(&ScopeKey::project("P")), 500);
    }
}

// [libs/gateway/ensemble/src/lib.rs]
/*!
 * =================================================================
 * APARATO: ENSEMBLE BUDGET RESERVER (V1.0)
 * CLASIFICACIÓN: DOMAIN LOGIC (ESTRATO L2)
 * RESPONSABILIDAD: RESERVA N-RAMA ATÓMICA, COMMIT Y RECUPERACIÓN TTL
 *
 * Both operations described in §4.I as "single server-side scripts"
 * are implemented here as ordinary async methods over `SharedStore` —
 * against the in-process `LocalSharedStore` they're already atomic by
 * construction; a Redis-backed store would implement the same two
 * methods as Lua scripts behind the same trait.
 * =================================================================
 */

use hounfour_gateway_models::ensemble::ENSEMBLE_RESERVATION_TTL_SECONDS;
use hounfour_gateway_shared_store::SharedStore;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnsembleError {
    #[error("shared store operation failed: {0}")]
    Store(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveOutcome {
    pub ok: bool,
    pub idempotent: bool,
    pub budget_after: u64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    pub refunded_micro: u64,
}

pub struct EnsembleReserver {
    store: Arc<dyn SharedStore>,
}

impl EnsembleReserver {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    fn reserved_key(ensemble_id: &str) -> String {
        format!("ensemble:{ensemble_id}:reserved")
    }

    fn marker_key(ensemble_id: &str) -> String {
        format!("ensemble:{ensemble_id}:budget_after")
    }

    fn spent_key(tenant_id: &str) -> String {
        format!("ensemble:budget:{tenant_id}:spent")
    }

    /// §4.I `Reserve`. Idempotent on `ensemble_id`: a second call for an
    /// already-reserved ensemble returns the original `budget_after`
    /// without touching the spend counter again.
    pub async fn reserve(
        &self,
        ensemble_id: &str,
        tenant_id: &str,
        branch_reservations: &[u64],
        budget_limit_micro: u64,
    ) -> Result<ReserveOutcome, EnsembleError> {
        let marker_key = Self::marker_key(ensemble_id);

        if let Some(existing) = self.store.get(&marker_key).await {
            let budget_after: u64 = existing.parse().unwrap_or(0);
            tracing::info!(ensemble_id, "ensemble reservation is an idempotent replay");
            return Ok(ReserveOutcome {
                ok: true,
                idempotent: true,
                budget_after,
                reason: None,
            });
        }

        let spent_key = Self::spent_key(tenant_id);
        let spent: u64 = self.store.get(&spent_key).await.and_then(|v| v.parse().ok()).unwrap_or(0);
        let total: u64 = branch_reservations.iter().sum();

        if budget_limit_micro > 0 && spent + total > budget_limit_micro {
            return Ok(ReserveOutcome {
                ok: false,
                idempotent: false,
                budget_after: spent,
                reason: Some("BUDGET_EXCEEDED".to_string()),
            });
        }

        let budget_after = self
            .store
            .incr_by(&spent_key, total as i64)
            .await
            .map_err(|e| EnsembleError::Store(e.to_string()))? as u64;

        let reserved_key = Self::reserved_key(ensemble_id);
        for (index, amount) in branch_reservations.iter().enumerate() {
            self.store
                .hash_set(&reserved_key, &index.to_string(), *amount as i64)
                .await
                .map_err(|e| EnsembleError::Store(e.to_string()))?;
        }
        let ttl = Duration::from_secs(ENSEMBLE_RESERVATION_TTL_SECONDS as u64);
        self.store.expire(&reserved_key, ttl).await.map_err(|e| EnsembleError::Store(e.to_string()))?;
        self.store
            .set(&marker_key, budget_after.to_string(), Some(ttl))
            .await
            .map_err(|e| EnsembleError::Store(e.to_string()))?;

        Ok(ReserveOutcome {
            ok: true,
            idempotent: false,
            budget_after,
            reason: None,
        })
    }

    /// §4.I `CommitBranch`: refunds `reserved - actual_cost` when positive.
    pub async fn commit_branch(
        &self,
        ensemble_id: &str,
        tenant_id: &str,
        branch_index: u32,
        actual_cost_micro: u64,
    ) -> Result<CommitOutcome, EnsembleError> {
        let reserved_key = Self::reserved_key(ensemble_id);
        let fields = self.store.hash_get_all(&reserved_key).await;
        let reserved = fields.get(&branch_index.to_string()).copied().unwrap_or(0) as u64;
        let refund = reserved.saturating_sub(actual_cost_micro);

        if refund > 0 {
            self.store
                .incr_by(&Self::spent_key(tenant_id), -(refund as i64))
                .await
                .map_err(|e| EnsembleError::Store(e.to_string()))?;
        }

        self.store
            .hash_delete_field(&reserved_key, &branch_index.to_string())
            .await
            .map_err(|e| EnsembleError::Store(e.to_string()))?;

        Ok(CommitOutcome { refunded_micro: refund })
    }

    /// §4.I `ReleaseAll`: releases every remaining branch reservation.
    pub async fn release_all(&self, ensemble_id: &str, tenant_id: &str) -> Result<u64, EnsembleError> {
        let reserved_key = Self::reserved_key(ensemble_id);
        let fields = self.store.hash_get_all(&reserved_key).await;
        let total: i64 = fields.values().sum();

        if total > 0 {
            self.store
                .incr_by(&Self::spent_key(tenant_id), -total)
                .await
                .map_err(|e| EnsembleError::Store(e.to_string()))?;
        }

        for field in fields.keys() {
            self.store
                .hash_delete_field(&reserved_key, field)
                .await
                .map_err(|e| EnsembleError::Store(e.to_string()))?;
        }

        Ok(total as u64)
    }

    /// §4.I `HasReservation`: current branch count still outstanding.
    pub async fn has_reservation(&self, ensemble_id: &str) -> usize {
        self.store.hash_get_all(&Self::reserved_key(ensemble_id)).await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hounfour_gateway_shared_store::LocalSharedStore;

    fn reserver() -> EnsembleReserver {
        EnsembleReserver::new(Arc::new(LocalSharedStore::new()))
    }

    #[tokio::test]
    async fn scenario_four_partial_failure_and_release() {
        let reserver = reserver();
        let outcome = reserver.reserve("ens-A", "tenant-X", &[1000, 2000, 3000], 0).await.unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.budget_after, 6000);

        let commit = reserver.commit_branch("ens-A", "tenant-X", 0, 800).await.unwrap();
        assert_eq!(commit.refunded_micro, 200);

        // Branch 1 fails outright: release everything still outstanding
        // (branches 1 and 2), leaving only branch 0's net spend.
        let released = reserver.release_all("ens-A", "tenant-X").await.unwrap();
        assert_eq!(released, 5000);

        let spent: u64 = reserver
            .store
            .get(&EnsembleReserver::spent_key("tenant-X"))
            .await
            .and_then(|v| v.parse().ok())
            .unwrap();
        assert_eq!(spent, 800);
    }

    #[tokio::test]
    async fn reserve_is_idempotent_for_the_same_ensemble_id() {
        let reserver = reserver();
        let first = reserver.reserve("ens-B", "tenant-X", &[100, 200], 0).await.unwrap();
        let second = reserver.reserve("ens-B", "tenant-X", &[100, 200], 0).await.unwrap();

        assert!(!first.idempotent);
        assert!(second.idempotent);
        assert_eq!(first.budget_after, second.budget_after);
    }

    #[tokio::test]
    async fn reserve_rejects_when_it_would_exceed_the_limit() {
        let reserver = reserver();
        let outcome = reserver.reserve("ens-C", "tenant-X", &[600_000], 500_000).await.unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.reason, Some("BUDGET_EXCEEDED".to_string()));
    }

    #[tokio::test]
    async fn has_reservation_reports_remaining_branch_count() {
        let reserver = reserver();
        reserver.reserve("ens-D", "tenant-X", &[10, 20, 30], 0).await.unwrap();
        assert_eq!(reserver.has_reservation("ens-D").await, 3);

        reserver.commit_branch("ens-D", "tenant-X", 0, 10).await.unwrap();
        assert_eq!(reserver.has_reservation("ens-D").await, 2);
    }
}

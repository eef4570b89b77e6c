// [libs/gateway/models/src/ensemble.rs]
//! Ensemble reservation records (§3 `EnsembleReservation`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use typeshare::typeshare;

/// TTL applied to a reservation for crash recovery (§4.I).
pub const ENSEMBLE_RESERVATION_TTL_SECONDS: i64 = 300;

/// Tenant-scoped reservation covering every branch of one ensemble run.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleReservation {
    pub ensemble_id: String,
    pub tenant_id: String,
    /// Branch index -> reserved micro-USD. Emptied (and then removed
    /// entirely) as branches commit.
    pub branch_reservations: BTreeMap<u32, u64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl EnsembleReservation {
    pub fn total_reserved_micro(&self) -> u64 {
        self.branch_reservations.values().sum()
    }

    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        (now - self.created_at).num_seconds() >= ENSEMBLE_RESERVATION_TTL_SECONDS
    }
}

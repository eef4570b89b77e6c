// [libs/gateway/payments/src/settle.rs]
//! §4.K stage 3: settlement, via a facilitator with a direct-submission
//! fallback gated by a per-process circuit breaker.

use crate::errors::PaymentError;
use async_trait::async_trait;
use hounfour_gateway_models::PaymentProof;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[async_trait]
pub trait PaymentFacilitator: Send + Sync {
    async fn submit(&self, proof: &PaymentProof) -> Result<String, String>;
}

#[async_trait]
pub trait DirectSubmitter: Send + Sync {
    async fn submit(&self, proof: &PaymentProof) -> Result<String, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementPath {
    Facilitator,
    Direct,
}

#[derive(Debug, Clone)]
pub struct SettlementReceipt {
    pub tx_hash: String,
    pub settled_via: SettlementPath,
}

#[derive(Debug, Default)]
struct CircuitRecord {
    consecutive_failures: u32,
    recovery_due_at: Option<Instant>,
}

/// Opens after `failure_threshold` consecutive facilitator failures;
/// a probe is allowed again once `recovery_interval` has elapsed.
pub struct FacilitatorCircuit {
    failure_threshold: u32,
    recovery_interval: Duration,
    record: Mutex<CircuitRecord>,
}

impl FacilitatorCircuit {
    pub fn new(failure_threshold: u32, recovery_interval: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_interval,
            record: Mutex::new(CircuitRecord::default()),
        }
    }

    fn is_open(&self) -> bool {
        let record = self.record.lock().expect("facilitator circuit lock poisoned");
        match record.recovery_due_at {
            Some(due) => Instant::now() < due,
            None => false,
        }
    }

    fn record_success(&self) {
        let mut record = self.record.lock().expect("facilitator circuit lock poisoned");
        record.consecutive_failures = 0;
        record.recovery_due_at = None;
    }

    fn record_failure(&self) {
        let mut record = self.record.lock().expect("facilitator circuit lock poisoned");
        record.consecutive_failures += 1;
        if record.consecutive_failures >= self.failure_threshold {
            record.recovery_due_at = Some(Instant::now() + self.recovery_interval);
        }
    }
}

impl Default for FacilitatorCircuit {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60))
    }
}

pub async fn settle(
    proof: &PaymentProof,
    facilitator: &dyn PaymentFacilitator,
    direct: &dyn DirectSubmitter,
    circuit: &FacilitatorCircuit,
) -> Result<SettlementReceipt, PaymentError> {
    if !circuit.is_open() {
        match facilitator.submit(proof).await {
            Ok(tx_hash) => {
                circuit.record_success();
                return Ok(SettlementReceipt {
                    tx_hash,
                    settled_via: SettlementPath::Facilitator,
                });
            }
            Err(reason) => {
                tracing::warn!(%reason, "facilitator settlement attempt failed");
                circuit.record_failure();
            }
        }
    } else {
        tracing::info!("facilitator circuit is open, skipping straight to direct submission");
    }

    match direct.submit(proof).await {
        Ok(tx_hash) => Ok(SettlementReceipt {
            tx_hash,
            settled_via: SettlementPath::Direct,
        }),
        Err(reason) => Err(PaymentError::SettlementFailed(reason)),
    }
}

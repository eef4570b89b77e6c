// [libs/gateway/health/src/lib.rs]
/*!
 * =================================================================
 * APARATO: HEALTH PROBER (V1.0)
 * CLASIFICACIÓN: DOMAIN LOGIC (ESTRATO L2)
 * RESPONSABILIDAD: CIRCUITO CLOSED/OPEN/HALF_OPEN POR (PROVIDER, MODELO)
 *
 * State is optimistic (§4.E): an unseen pair starts CLOSED. One pair's
 * OPEN state never affects another — each `(provider, model)` gets its
 * own `Mutex<CircuitRecord>` behind a `DashMap`, so cross-pair ordering
 * is deliberately unconstrained (§5).
 * =================================================================
 */

use dashmap::DashMap;
use hounfour_gateway_models::ProviderModel;
use hounfour_gateway_shared_store::SharedStore;
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::instrument;

/// Whether an invocation failure counts toward circuit-state transitions
/// (§4.E: 5xx and timeouts do; 4xx and schema errors don't).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ServerError,
    Timeout,
    ClientError,
    SchemaError,
}

impl FailureKind {
    pub fn is_health_eligible(self) -> bool {
        matches!(self, FailureKind::ServerError | FailureKind::Timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
struct CircuitRecord {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    recovery_due_at: Option<Instant>,
}

impl Default for CircuitRecord {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            recovery_due_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthProberConfig {
    pub failure_threshold: u32,
    pub recovery_threshold: u32,
    pub recovery_interval_ms: u64,
    pub recovery_jitter_percent: u32,
}

impl Default for HealthProberConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_threshold: 1,
            recovery_interval_ms: 30_000,
            recovery_jitter_percent: 20,
        }
    }
}

pub struct HealthProber {
    config: HealthProberConfig,
    states: DashMap<ProviderModel, Mutex<CircuitRecord>>,
    wal: Arc<dyn SharedStore>,
}

impl HealthProber {
    pub fn new(config: HealthProberConfig, wal: Arc<dyn SharedStore>) -> Self {
        Self {
            config,
            states: DashMap::new(),
            wal,
        }
    }

    fn jittered_interval(&self) -> Duration {
        let jitter_span = self.config.recovery_interval_ms * self.config.recovery_jitter_percent as u64 / 100;
        let offset = if jitter_span == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_span * 2) as i64 - jitter_span as i64
        };
        let millis = (self.config.recovery_interval_ms as i64 + offset).max(0) as u64;
        Duration::from_millis(millis)
    }

    async fn audit(&self, model: &ProviderModel, from: CircuitState, to: CircuitState) {
        let payload = serde_json::json!({
            "provider": model.provider,
            "model": model.model,
            "from": format!("{from:?}"),
            "to": format!("{to:?}"),
        });
        if let Err(err) = self.wal.wal_append("health", "circuit_transition", &model.to_string(), payload).await {
            tracing::warn!(%err, pair = %model, "health circuit transition WAL audit failed");
        }
    }

    /// Reads current health, optimistically opening OPEN pairs into
    /// HALF_OPEN when the (jittered) recovery interval has elapsed.
    #[instrument(skip(self), fields(pair = %model))]
    pub async fn is_healthy(&self, model: &ProviderModel) -> bool {
        let record_lock = self.states.entry(model.clone()).or_default();
        let mut record = record_lock.lock().expect("circuit record lock poisoned");

        match record.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let due = record.recovery_due_at;
                let elapsed = due.map(|at| Instant::now() >= at).unwrap_or(false);
                if elapsed {
                    record.state = CircuitState::HalfOpen;
                    record.consecutive_successes = 0;
                    drop(record);
                    self.audit(model, CircuitState::Open, CircuitState::HalfOpen).await;
                    true
                } else {
                    false
                }
            }
        }
    }

    #[instrument(skip(self), fields(pair = %model))]
    pub async fn record_success(&self, model: &ProviderModel) {
        let transition = {
            let record_lock = self.states.entry(model.clone()).or_default();
            let mut record = record_lock.lock().expect("circuit record lock poisoned");
            record.consecutive_failures = 0;

            if record.state == CircuitState::HalfOpen {
                record.consecutive_successes += 1;
                if record.consecutive_successes >= self.config.recovery_threshold {
                    record.state = CircuitState::Closed;
                    record.recovery_due_at = None;
                    Some((CircuitState::HalfOpen, CircuitState::Closed))
                } else {
                    None
                }
            } else {
                None
            }
        };

        if let Some((from, to)) = transition {
            self.audit(model, from, to).await;
        }
    }

    #[instrument(skip(self), fields(pair = %model))]
    pub async fn record_failure(&self, model: &ProviderModel, kind: FailureKind) {
        if !kind.is_health_eligible() {
            return;
        }

        let transition = {
            let record_lock = self.states.entry(model.clone()).or_default();
            let mut record = record_lock.lock().expect("circuit record lock poisoned");

            match record.state {
                CircuitState::HalfOpen => {
                    record.state = CircuitState::Open;
                    record.consecutive_failures = 1;
                    record.consecutive_successes = 0;
                    record.recovery_due_at = Some(Instant::now() + self.jittered_interval());
                    Some((CircuitState::HalfOpen, CircuitState::Open))
                }
                CircuitState::Closed => {
                    record.consecutive_failures += 1;
                    if record.consecutive_failures >= self.config.failure_threshold {
                        record.state = CircuitState::Open;
                        record.recovery_due_at = Some(Instant::now() + self.jittered_interval());
                        Some((CircuitState::Closed, CircuitState::Open))
                    } else {
                        None
                    }
                }
                CircuitState::Open => None,
            }
        };

        if let Some((from, to)) = transition {
            self.audit(model, from, to).await;
        }
    }

    pub fn current_state(&self, model: &ProviderModel) -> CircuitState {
        self.states
            .get(model)
            .map(|lock| lock.lock().expect("circuit record lock poisoned").state)
            .unwrap_or(CircuitState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hounfour_gateway_shared_store::LocalSharedStore;
    use tokio::time::sleep;

    fn pair(provider: &str, model: &str) -> ProviderModel {
        ProviderModel::new(provider, model)
    }

    #[tokio::test]
    async fn unseen_pair_is_optimistically_healthy() {
        let prober = HealthProber::new(HealthProberConfig::default(), Arc::new(LocalSharedStore::new()));
        assert!(prober.is_healthy(&pair("vllm", "qwen-7b")).await);
    }

    #[tokio::test]
    async fn scenario_three_trip_and_recover() {
        let prober = HealthProber::new(
            HealthProberConfig {
                recovery_interval_ms: 20,
                recovery_jitter_percent: 0,
                ..Default::default()
            },
            Arc::new(LocalSharedStore::new()),
        );
        let model = pair("vllm", "qwen-7b");

        for _ in 0..3 {
            prober.record_failure(&model, FailureKind::ServerError).await;
        }
        assert_eq!(prober.current_state(&model), CircuitState::Open);
        assert!(!prober.is_healthy(&model).await);

        sleep(Duration::from_millis(40)).await;
        assert!(prober.is_healthy(&model).await);
        assert_eq!(prober.current_state(&model), CircuitState::HalfOpen);

        prober.record_success(&model).await;
        assert_eq!(prober.current_state(&model), CircuitState::Closed);
    }

    #[tokio::test]
    async fn client_errors_never_trip_the_circuit() {
        let prober = HealthProber::new(HealthProberConfig::default(), Arc::new(LocalSharedStore::new()));
        let model = pair("openai", "gpt-4o-mini");
        for _ in 0..10 {
            prober.record_failure(&model, FailureKind::ClientError).await;
        }
        assert_eq!(prober.current_state(&model), CircuitState::Closed);
    }

    #[tokio::test]
    async fn pairs_are_isolated() {
        let prober = HealthProber::new(
            HealthProberConfig {
                recovery_interval_ms: 10_000,
                ..Default::default()
            },
            Arc::new(LocalSharedStore::new()),
        );
        let a = pair("vllm", "qwen-7b");
        let b = pair("vllm", "qwen-1.5b");

        for _ in 0..3 {
            prober.record_failure(&a, FailureKind::Timeout).await;
        }
        assert_eq!(prober.current_state(&a), CircuitState::Open);
        assert_eq!(prober.current_state(&b), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_immediately() {
        let prober = HealthProber::new(
            HealthProberConfig {
                recovery_interval_ms: 10,
                recovery_jitter_percent: 0,
                ..Default::default()
            },
            Arc::new(LocalSharedStore::new()),
        );
        let model = pair("vllm", "qwen-7b");
        for _ in 0..3 {
            prober.record_failure(&model, FailureKind::ServerError).await;
        }
        sleep(Duration::from_millis(20)).await;
        assert!(prober.is_healthy(&model).await);

        prober.record_failure(&model, FailureKind::ServerError).await;
        assert_eq!(prober.current_state(&model), CircuitState::Open);
    }
}

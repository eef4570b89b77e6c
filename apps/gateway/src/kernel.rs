// [apps/gateway/src/kernel.rs]
//! Composition root: builds every Hounfour component from `GatewayConfig`
//! and owns their shared handles for the lifetime of the process. Mirrors
//! the teacher's `OrchestratorKernel::ignite` pattern, inverted for
//! teardown in `shutdown()` (§5's graceful shutdown order).

use crate::config::{ConfigError, GatewayConfig};
use hounfour_gateway_budget::{BudgetEnforcer, BudgetEnforcerConfig, FailurePolicy};
use hounfour_gateway_ensemble::EnsembleReserver;
use hounfour_gateway_health::{HealthProber, HealthProberConfig};
use hounfour_gateway_identity::{IdentityVerifier, JtiReplayGuard};
use hounfour_gateway_ledger::{Ledger, LedgerConfig};
use hounfour_gateway_pricing::RemainderAccumulator;
use hounfour_gateway_ratelimit::RateLimiter;
use hounfour_gateway_registry::{Registry, RegistryConfig};
use hounfour_gateway_scheduler::Scheduler;
use hounfour_gateway_shared_store::{LocalSharedStore, SharedStore};
use std::sync::Arc;

pub struct GatewayKernel {
    pub config: GatewayConfig,
    pub registry: Arc<Registry>,
    pub ledger: Arc<Ledger>,
    pub budget: Arc<BudgetEnforcer>,
    pub health: Arc<HealthProber>,
    pub rate_limiter: Arc<RateLimiter>,
    pub ensemble: Arc<EnsembleReserver>,
    pub remainder: Arc<RemainderAccumulator>,
    pub shared_store: Arc<dyn SharedStore>,
    pub scheduler: Arc<Scheduler>,
    /// JTI replay guard (§6) — shares the shared-store fallback like
    /// every other cross-process coordination point in the kernel.
    pub jti_guard: Arc<JtiReplayGuard>,
}

impl GatewayKernel {
    /// Builds every component. `registry_config` is supplied separately
    /// (loaded from the TOML file by the caller) so tests can assemble a
    /// kernel without touching the filesystem for it.
    pub async fn ignite(config: GatewayConfig, registry_config: RegistryConfig) -> Self {
        // §5 "all durable state has a local fallback" — a Redis-backed
        // SharedStore would be selected here when `redis_url` is set; only
        // the local fallback is actually wired.
        let shared_store: Arc<dyn SharedStore> = Arc::new(LocalSharedStore::new());
        if config.redis_url.is_some() {
            tracing::info!("REDIS_URL is set but no Redis client is wired; using the in-process shared store");
        }

        let registry = Arc::new(Registry::build(registry_config));

        let ledger = Arc::new(Ledger::new(LedgerConfig {
            base_dir: config.ledger_base_dir.clone(),
            ..Default::default()
        }));

        let budget = Arc::new(
            BudgetEnforcer::load(
                ledger.clone(),
                BudgetEnforcerConfig {
                    checkpoint_path: config.checkpoint_path.clone(),
                    budgets: config.budgets.clone(),
                    policy: FailurePolicy::FailOpen,
                    ..Default::default()
                },
            )
            .await,
        );

        let health = Arc::new(HealthProber::new(HealthProberConfig::default(), shared_store.clone()));
        let rate_limiter = Arc::new(RateLimiter::new());
        let ensemble = Arc::new(EnsembleReserver::new(shared_store.clone()));
        let remainder = Arc::new(RemainderAccumulator::new());
        let scheduler = Arc::new(Scheduler::new());
        let jti_guard = Arc::new(JtiReplayGuard::new(shared_store.clone()));

        Self {
            config,
            registry,
            ledger,
            budget,
            health,
            rate_limiter,
            ensemble,
            remainder,
            shared_store,
            scheduler,
            jti_guard,
        }
    }

    /// Builds a fresh `IdentityVerifier` from the kernel's config. Not
    /// cached on the struct itself since key material may be rotated
    /// independently of the rest of the kernel's lifetime; callers hold
    /// the returned verifier for as long as the current key is valid.
    pub fn identity_verifier(&self) -> Result<IdentityVerifier, ConfigError> {
        let key = self.config.identity_verifying_key()?;
        IdentityVerifier::new(key, self.config.is_production(), "hounfour-gateway")
            .map_err(|err| ConfigError::AmbiguousKeyMaterial(err.to_string()))
    }

    /// §5's shutdown order: stop scheduler, stop watchers (none beyond
    /// the scheduler in this workspace), close the inbound listener (the
    /// caller's responsibility — axum's `Server` handle), drain in-flight
    /// requests (also the caller's), disconnect the shared store (the
    /// local fallback has no connection to tear down), final flush.
    pub async fn shutdown(&self) {
        tracing::info!("gateway shutdown: halting scheduler");
        self.scheduler.halt();

        tracing::info!("gateway shutdown: flushing budget checkpoint state");
        // The budget enforcer's checkpoint is always current after every
        // `record_cost` commit (write-ahead), so there is nothing further
        // to flush here beyond logging the final counters for the record.
        tracing::info!("gateway shutdown complete");
    }
}

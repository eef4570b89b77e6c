// [apps/gateway/src/router.rs]
//! §4.J `HounfourRouter`: composes the registry, budget enforcer, rate
//! limiter, health prober and provider invoker into the seven-step
//! per-invocation pipeline. Tool-calling and ensemble variants wrap this
//! same pipeline rather than duplicating it.

use crate::error::GatewayError;
use chrono::Utc;
use hounfour_gateway_ensemble::EnsembleReserver;
use hounfour_gateway_health::{FailureKind as HealthFailureKind, HealthProber};
use hounfour_gateway_models::{BillingMethod, ErrorCode, LedgerEntryV2, ProviderModel, ScopeKey, TenantContext};
use hounfour_gateway_pricing::{price_usage, RemainderAccumulator};
use hounfour_gateway_provider_invoker::{
    build_request, InvocationMetadata, InvocationResult, ProviderInvoker, RetryPolicy,
};
use hounfour_gateway_ratelimit::RateLimiter;
use hounfour_gateway_registry::Registry;
use std::sync::Arc;

/// Everything the router needs to resolve, price and dispatch a single
/// invocation. Built by the HTTP handler (or test) from a validated
/// `TenantContext` and the caller's own parameters.
pub struct InvokeRequest {
    pub tenant: TenantContext,
    pub agent: String,
    pub project_id: String,
    pub phase_id: Option<String>,
    pub sprint_id: Option<String>,
    pub messages: serde_json::Value,
    pub options: serde_json::Value,
    pub estimated_tokens: u64,
    pub trace_id: String,
    /// §4.J step 4: a pre-configured fallback target for this agent, used
    /// only when the primary resolves unhealthy.
    pub fallback: Option<ProviderModel>,
}

/// Prices `estimated_tokens` at whichever of the input/output per-token
/// rates is costlier, so the step-2 pre-flight check never underestimates
/// what a call could cost before it has actually run.
fn estimate_cost_micro(pricing: &hounfour_gateway_models::PricingEntry, estimated_tokens: u64) -> u64 {
    let rate = pricing.input_micro_per_million.max(pricing.output_micro_per_million);
    ((estimated_tokens as u128 * rate as u128) / 1_000_000) as u64
}

pub struct HounfourRouter {
    registry: Arc<Registry>,
    budget: Arc<hounfour_gateway_budget::BudgetEnforcer>,
    rate_limiter: Arc<RateLimiter>,
    health: Arc<HealthProber>,
    remainder: Arc<RemainderAccumulator>,
    hmac_secret: Vec<u8>,
}

impl HounfourRouter {
    pub fn new(
        registry: Arc<Registry>,
        budget: Arc<hounfour_gateway_budget::BudgetEnforcer>,
        rate_limiter: Arc<RateLimiter>,
        health: Arc<HealthProber>,
        remainder: Arc<RemainderAccumulator>,
        hmac_secret: Vec<u8>,
    ) -> Self {
        Self {
            registry,
            budget,
            rate_limiter,
            health,
            remainder,
            hmac_secret,
        }
    }

    /// The §4.J seven-step pipeline for a single, non-streaming,
    /// non-tool-calling invocation.
    pub async fn invoke(
        &self,
        request: &InvokeRequest,
        invoker: &dyn ProviderInvoker,
    ) -> Result<LedgerEntryV2, GatewayError> {
        if !request.tenant.is_consistent() {
            return Err(GatewayError::new(
                ErrorCode::PoolAccessDenied,
                "tenant context failed its own consistency invariant",
            ));
        }

        // Step 1: resolve binding.
        let binding = self.registry.get_agent_binding(&request.agent)?;
        let pricing = self.registry.get_pricing(&binding.target.provider, &binding.target.model)?;
        let scopes = ScopeKey::hierarchy(&request.project_id, request.phase_id.as_deref(), request.sprint_id.as_deref());
        let most_specific = scopes.last().expect("hierarchy always yields at least the project scope").clone();

        // Step 2: budget pre-flight against the most-specific scope, using
        // the request's estimated token count priced at the costlier of
        // the two per-token rates — an overestimate that rejects before
        // dispatch whenever this call could plausibly cross the limit,
        // rather than only catching calls that already have.
        let estimated_cost_micro = estimate_cost_micro(&pricing, request.estimated_tokens);
        if let Some(err) = self.budget.would_exceed(&most_specific, estimated_cost_micro) {
            return Err(err.into());
        }

        // Step 3: rate-limit acquisition.
        self.rate_limiter.acquire(&binding.target.provider, request.estimated_tokens).await?;

        // Step 4: health check, with an optional fallback re-resolution.
        let mut target = binding.target.clone();
        if !self.health.is_healthy(&target).await {
            match &request.fallback {
                Some(fallback) if self.health.is_healthy(fallback).await => {
                    tracing::warn!(primary = %target, fallback = %fallback, "primary target unhealthy, routing to fallback");
                    target = fallback.clone();
                }
                _ => {
                    self.rate_limiter.release(&binding.target.provider, request.estimated_tokens, 0);
                    return Err(GatewayError::new(
                        ErrorCode::ProviderUnavailable,
                        format!("{target} is unhealthy and no healthy fallback is configured"),
                    ));
                }
            }
        }

        let pricing = if target == binding.target {
            pricing
        } else {
            self.registry.get_pricing(&target.provider, &target.model)?
        };

        // Step 5: signed dispatch.
        let metadata = InvocationMetadata {
            agent: request.agent.clone(),
            tenant_id: request.tenant.tenant_id.clone(),
            nft_id: request.tenant.nft_id.clone(),
            trace_id: request.trace_id.clone(),
        };
        let signed = build_request(
            &self.hmac_secret,
            &target.provider,
            &target.model,
            request.messages.clone(),
            request.options.clone(),
            metadata,
            RetryPolicy::default(),
        );

        let outcome = invoker.invoke(signed).await;

        match outcome {
            Ok(result) => self.on_success(request, &target, &pricing, &scopes, result).await,
            Err(err) => {
                // Step 7: classify and report, no cost recorded.
                let kind: HealthFailureKind = err.failure_kind();
                self.health.record_failure(&target, kind).await;
                self.rate_limiter.release(&binding.target.provider, request.estimated_tokens, 0);
                Err(err.into())
            }
        }
    }

    async fn on_success(
        &self,
        request: &InvokeRequest,
        target: &ProviderModel,
        pricing: &hounfour_gateway_models::PricingEntry,
        scopes: &[ScopeKey],
        result: InvocationResult,
    ) -> Result<LedgerEntryV2, GatewayError> {
        let priced = price_usage(
            result.prompt_tokens,
            result.completion_tokens,
            result.reasoning_tokens,
            pricing.input_micro_per_million,
            pricing.output_micro_per_million,
            pricing.reasoning_micro_per_million.unwrap_or(0),
        )?;

        let scope_key = scopes.last().expect("non-empty hierarchy").as_str();
        let extra_units = self.remainder.accumulate(
            scope_key,
            priced.input_remainder + priced.output_remainder + priced.reasoning_remainder,
        );

        let entry = LedgerEntryV2 {
            schema_version: 2,
            timestamp: Utc::now(),
            trace_id: request.trace_id.clone(),
            agent: request.agent.clone(),
            provider: target.provider.clone(),
            model: target.model.clone(),
            project_id: request.project_id.clone(),
            phase_id: request.phase_id.clone(),
            sprint_id: request.sprint_id.clone(),
            tenant_id: request.tenant.tenant_id.clone(),
            nft_id: request.tenant.nft_id.clone(),
            pool_id: request.tenant.requested_pool.as_ref().map(|p| p.to_string()),
            prompt_tokens: result.prompt_tokens,
            completion_tokens: result.completion_tokens,
            reasoning_tokens: result.reasoning_tokens,
            input_cost_micro: priced.input_micro,
            output_cost_micro: priced.output_micro,
            reasoning_cost_micro: priced.reasoning_micro,
            total_cost_micro: priced.total_micro() + extra_units,
            price_table_version: pricing.price_table_version,
            billing_method: BillingMethod::ProviderReported,
            latency_ms: result.latency_ms,
            crc32: 0,
        };

        self.budget.record_cost(&request.tenant.tenant_id, scopes, entry.clone()).await?;
        self.health.record_success(target).await;

        let actual_tokens = result.prompt_tokens + result.completion_tokens + result.reasoning_tokens;
        self.rate_limiter.release(&target.provider, request.estimated_tokens, actual_tokens);

        Ok(entry)
    }
}

/// Wraps an ensemble invocation as `reserve -> parallel branches -> commit/release`
/// (§4.J, last paragraph; §4.I). `branch_costs_micro` is supplied by the
/// caller once every branch has actually run — this function owns only
/// the reservation bookkeeping around that, not the branch dispatch
/// itself, which callers drive with their own `HounfourRouter::invoke`
/// calls per branch.
pub async fn run_ensemble(
    reserver: &EnsembleReserver,
    ensemble_id: &str,
    tenant_id: &str,
    branch_reservations: &[u64],
    budget_limit_micro: u64,
    branch_costs_micro: impl IntoIterator<Item = (u32, Option<u64>)>,
) -> Result<u64, GatewayError> {
    let reserved = reserver.reserve(ensemble_id, tenant_id, branch_reservations, budget_limit_micro).await?;
    if !reserved.ok {
        return Err(GatewayError::new(
            ErrorCode::EnsembleBudgetExceeded,
            reserved.reason.unwrap_or_else(|| "ensemble reservation rejected".to_string()),
        ));
    }

    let mut total_refunded = 0u64;
    for (branch_index, actual_cost) in branch_costs_micro {
        match actual_cost {
            Some(cost) => {
                let commit = reserver.commit_branch(ensemble_id, tenant_id, branch_index, cost).await?;
                total_refunded += commit.refunded_micro;
            }
            None => {
                // Branch failed or was cancelled: its reservation is swept
                // up by the final `release_all` below rather than
                // committed individually.
            }
        }
    }

    total_refunded += reserver.release_all(ensemble_id, tenant_id).await?;
    Ok(total_refunded)
}

// [libs/gateway/pool/src/lib.rs]
/*!
 * =================================================================
 * APARATO: POOL ENFORCEMENT (V1.0)
 * CLASIFICACIÓN: DOMAIN LOGIC (ESTRATO L2)
 * RESPONSABILIDAD: DERIVACIÓN TIER→POOL Y VALIDACIÓN DE CLAIMS
 *
 * `resolved_pools` is derived **exclusively** from `tier` (§9 "pool
 * derivation is a pure function of tier"). An `allowed_pools` claim on
 * the token is advisory telemetry only — trusting it for authorization
 * is exactly the confused-deputy hole this component exists to close.
 * =================================================================
 */

use hounfour_gateway_models::{PoolId, TenantContext, Tier};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("UNKNOWN_POOL: '{0}' is not a recognized pool")]
    UnknownPool(String),
    #[error("POOL_ACCESS_DENIED: {0}")]
    PoolAccessDenied(String),
}

/// The raw (untrusted except for `tier`) identity claim fields relevant
/// to pool routing (§9 "only fields specified in §3 are trusted").
#[derive(Debug, Clone)]
pub struct IdentityClaims {
    pub tier: Tier,
    pub pool_id: Option<String>,
    pub allowed_pools: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcedPools {
    pub resolved_pools: BTreeSet<PoolId>,
    pub requested_pool: Option<PoolId>,
    pub mismatch: Option<String>,
}

/// Pure function: tier → authorized pool set. Never consults
/// `allowed_pools` (§8 law: "Pool derivation is a pure function of tier
/// and never reads allowed_pools").
pub fn pools_for_tier(tier: Tier) -> BTreeSet<PoolId> {
    match tier {
        Tier::Free => ["cheap"].iter().map(|p| PoolId::from(*p)).collect(),
        Tier::Pro => ["cheap", "fast-code", "reviewer"].iter().map(|p| PoolId::from(*p)).collect(),
        Tier::Enterprise => ["cheap", "fast-code", "reviewer", "reasoning"]
            .iter()
            .map(|p| PoolId::from(*p))
            .collect(),
    }
}

/// The full set of pools recognized by any tier — what a caller needs
/// to validate a `pool_id` claim against before tier-scoping it.
pub fn all_known_pools() -> BTreeSet<PoolId> {
    [Tier::Free, Tier::Pro, Tier::Enterprise]
        .into_iter()
        .flat_map(pools_for_tier)
        .collect()
}

/// §4.G `enforcePoolClaims`.
pub fn enforce_pool_claims(
    claims: &IdentityClaims,
    known_pools: &BTreeSet<PoolId>,
    strict_mode: bool,
) -> Result<EnforcedPools, PoolError> {
    let resolved_pools = pools_for_tier(claims.tier);
    if resolved_pools.is_empty() {
        return Err(PoolError::PoolAccessDenied(
            "invariant violation: tier resolved to an empty pool set".to_string(),
        ));
    }

    let requested_pool = match &claims.pool_id {
        Some(raw) => {
            let candidate = PoolId::from(raw.as_str());
            if !known_pools.contains(&candidate) {
                return Err(PoolError::UnknownPool(raw.clone()));
            }
            if !resolved_pools.contains(&candidate) {
                return Err(PoolError::PoolAccessDenied(format!(
                    "requested pool '{raw}' is not in the tier-resolved set"
                )));
            }
            Some(candidate)
        }
        None => None,
    };

    let mismatch = audit_allowed_pools_claim(claims, known_pools, &resolved_pools, strict_mode)?;

    Ok(EnforcedPools {
        resolved_pools,
        requested_pool,
        mismatch,
    })
}

/// `allowed_pools` is advisory (§4.G): strict-subset logs info,
/// superset logs warn (and, under `strict_mode`, denies), invalid
/// entries log error but never block.
fn audit_allowed_pools_claim(
    claims: &IdentityClaims,
    known_pools: &BTreeSet<PoolId>,
    resolved_pools: &BTreeSet<PoolId>,
    strict_mode: bool,
) -> Result<Option<String>, PoolError> {
    let Some(allowed_raw) = &claims.allowed_pools else {
        return Ok(None);
    };

    let mut valid = BTreeSet::new();
    for raw in allowed_raw {
        let candidate = PoolId::from(raw.as_str());
        if known_pools.contains(&candidate) {
            valid.insert(candidate);
        } else {
            tracing::error!(pool = %raw, "allowed_pools claim contains an unrecognized pool; ignoring");
        }
    }

    if valid.is_subset(resolved_pools) && valid != *resolved_pools {
        tracing::info!("allowed_pools claim is a strict subset of the tier-resolved set");
        return Ok(Some("allowed_pools is a strict subset of resolved_pools".to_string()));
    }

    if !valid.is_subset(resolved_pools) {
        let extra: Vec<_> = valid.difference(resolved_pools).map(PoolId::to_string).collect();
        tracing::warn!(extra = ?extra, "allowed_pools claim exceeds the tier-resolved set");
        if strict_mode {
            return Err(PoolError::PoolAccessDenied(format!(
                "allowed_pools claim exceeds resolved_pools: {extra:?}"
            )));
        }
        return Ok(Some(format!("allowed_pools exceeds resolved_pools: {extra:?}")));
    }

    Ok(None)
}

/// §4.G `selectAuthorizedPool`: final routing decision, reconciling a
/// bound `requestedPool` against the router's own selection.
pub fn select_authorized_pool(ctx: &TenantContext, routing_result: &PoolId) -> Result<PoolId, PoolError> {
    if ctx.resolved_pool_set.is_empty() {
        return Err(PoolError::PoolAccessDenied(
            "invariant violation: tenant context has an empty resolved pool set".to_string(),
        ));
    }

    match &ctx.requested_pool {
        Some(requested) if requested == routing_result => Ok(requested.clone()),
        Some(requested) => Err(PoolError::PoolAccessDenied(format!(
            "JWT binds to {requested}, routing selected {routing_result}"
        ))),
        None => {
            if ctx.resolved_pool_set.contains(routing_result) {
                Ok(routing_result.clone())
            } else {
                Err(PoolError::PoolAccessDenied(format!(
                    "routing selected {routing_result}, which is outside the tier-resolved set"
                )))
            }
        }
    }
}

// [libs/gateway/models/src/tenant.rs]
//! Tenant identity and pool-authorization primitives.
//!
//! `TenantContext` is derived once per request from a validated identity
//! claim (see `hounfour-gateway-pool`) and never persisted — it lives for the
//! duration of a single invocation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use typeshare::typeshare;

/// Per-tenant authorization class. Determines the accessible pool set.
#[typeshare]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

/// A named routing class (`cheap`, `fast-code`, `reviewer`, `reasoning`, ...).
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(pub String);

impl PoolId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PoolId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Derived tenant execution context for a single in-flight request.
///
/// Invariant: `resolved_pool_set` is non-empty and contains `requested_pool`
/// whenever the latter is present — enforced by the pool-enforcement
/// component (`hounfour-gateway-pool`), never constructed by hand elsewhere.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: String,
    pub tier: Tier,
    pub resolved_pool_set: BTreeSet<PoolId>,
    pub requested_pool: Option<PoolId>,
    pub nft_id: Option<String>,
    pub request_hash: String,
    pub jti: String,
    /// Set when the request was routed via an NFT-gated path; changes
    /// which billing method is recorded on the ledger entry.
    pub nft_billing: bool,
}

impl TenantContext {
    pub fn is_consistent(&self) -> bool {
        if self.resolved_pool_set.is_empty() {
            return false;
        }
        match &self.requested_pool {
            Some(pool) => self.resolved_pool_set.contains(pool),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with(pools: &[&str], requested: Option<&str>) -> TenantContext {
        TenantContext {
            tenant_id: "tenant-1".into(),
            tier: Tier::Pro,
            resolved_pool_set: pools.iter().map(|p| PoolId::from(*p)).collect(),
            requested_pool: requested.map(PoolId::from),
            nft_id: None,
            request_hash: "abc".into(),
            jti: "jti-1".into(),
            nft_billing: false,
        }
    }

    #[test]
    fn consistent_when_requested_is_member() {
        let ctx = ctx_with(&["cheap", "fast-code"], Some("fast-code"));
        assert!(ctx.is_consistent());
    }

    #[test]
    fn inconsistent_when_requested_is_not_member() {
        let ctx = ctx_with(&["cheap"], Some("reasoning"));
        assert!(!ctx.is_consistent());
    }

    #[test]
    fn inconsistent_when_pool_set_empty() {
        let ctx = ctx_with(&[], None);
        assert!(!ctx.is_consistent());
    }
}

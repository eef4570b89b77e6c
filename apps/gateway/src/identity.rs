// [apps/gateway/src/identity.rs]
//! Composes `hounfour-gateway-identity` (token verification + JTI replay
//! guard) with `hounfour-gateway-pool` (tier-derived pool authorization)
//! into the one function the HTTP edge actually needs: "given a bearer
//! token, hand back an authorized `TenantContext` or a typed error."
//! Kept separate from both leaf crates per §9 — "validate the envelope"
//! and "authorize the pool" stay independent components, composed only
//! here at the edge.

use crate::error::GatewayError;
use hounfour_gateway_identity::{IdentityClaim, IdentityVerifier, JtiReplayGuard};
use hounfour_gateway_models::{ErrorCode, PoolId, TenantContext, Tier};
use hounfour_gateway_pool::{enforce_pool_claims, IdentityClaims};
use std::collections::BTreeSet;

fn parse_tier(raw: &str) -> Result<Tier, GatewayError> {
    match raw {
        "free" => Ok(Tier::Free),
        "pro" => Ok(Tier::Pro),
        "enterprise" => Ok(Tier::Enterprise),
        other => Err(GatewayError::new(
            ErrorCode::TierUnauthorized,
            format!("unrecognized tier '{other}' in identity claim"),
        )),
    }
}

/// Verifies `token`, records its `jti` against the replay guard, and
/// derives an authorized `TenantContext` via tier-only pool enforcement
/// (§4.G). Returns a `GatewayError` at the first failing step — identity
/// failures are auth (401), pool failures are authorization (403).
pub async fn authenticate(
    verifier: &IdentityVerifier,
    jti_guard: &JtiReplayGuard,
    known_pools: &BTreeSet<PoolId>,
    strict_mode: bool,
    token: &str,
) -> Result<TenantContext, GatewayError> {
    let now = chrono::Utc::now();
    let claim: IdentityClaim = verifier.verify(token, now)?;
    jti_guard.check_and_record(&claim, now).await?;

    let tier = parse_tier(&claim.tier)?;
    let pool_claims = IdentityClaims {
        tier,
        pool_id: claim.pool_id.clone(),
        allowed_pools: claim.allowed_pools.clone(),
    };
    let enforced = enforce_pool_claims(&pool_claims, known_pools, strict_mode)?;

    Ok(TenantContext {
        tenant_id: claim.tenant_id,
        tier,
        resolved_pool_set: enforced.resolved_pools,
        requested_pool: enforced.requested_pool,
        nft_id: claim.nft_id,
        request_hash: claim.req_hash,
        jti: claim.jti,
        nft_billing: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hounfour_gateway_identity::VerifyingKey;
    use hounfour_gateway_shared_store::LocalSharedStore;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use std::sync::Arc;

    fn known_pools() -> BTreeSet<PoolId> {
        ["cheap", "fast-code", "reviewer", "reasoning"].iter().map(|p| PoolId::from(*p)).collect()
    }

    fn token(secret: &[u8], tier: &str, pool_id: Option<&str>) -> String {
        let now = chrono::Utc::now().timestamp();
        let claim = IdentityClaim {
            iss: "hounfour".into(),
            aud: "hounfour-gateway".into(),
            sub: "user-1".into(),
            tenant_id: "tenant-1".into(),
            tier: tier.into(),
            req_hash: "deadbeef".into(),
            iat: now,
            exp: now + 300,
            jti: uuid::Uuid::new_v4().to_string(),
            pool_id: pool_id.map(str::to_string),
            allowed_pools: None,
            nft_id: None,
            model_preferences: None,
        };
        encode(&Header::new(Algorithm::HS256), &claim, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[tokio::test]
    async fn authenticate_derives_tenant_context_from_a_valid_token() {
        let secret = b"test-secret".to_vec();
        let verifier = IdentityVerifier::new(VerifyingKey::Hs256 { secret: secret.clone() }, false, "hounfour-gateway").unwrap();
        let store = Arc::new(LocalSharedStore::new());
        let guard = JtiReplayGuard::new(store);

        let tok = token(&secret, "pro", Some("fast-code"));
        let ctx = authenticate(&verifier, &guard, &known_pools(), false, &tok).await.unwrap();
        assert_eq!(ctx.tenant_id, "tenant-1");
        assert_eq!(ctx.requested_pool, Some(PoolId::from("fast-code")));
    }

    #[tokio::test]
    async fn replaying_the_same_token_is_rejected() {
        let secret = b"test-secret".to_vec();
        let verifier = IdentityVerifier::new(VerifyingKey::Hs256 { secret: secret.clone() }, false, "hounfour-gateway").unwrap();
        let store = Arc::new(LocalSharedStore::new());
        let guard = JtiReplayGuard::new(store);

        let tok = token(&secret, "free", None);
        authenticate(&verifier, &guard, &known_pools(), false, &tok).await.unwrap();
        let replay = authenticate(&verifier, &guard, &known_pools(), false, &tok).await;
        assert!(replay.is_err());
        assert_eq!(replay.unwrap_err().status_code(), 401);
    }

    #[tokio::test]
    async fn out_of_tier_pool_request_is_denied() {
        let secret = b"test-secret".to_vec();
        let verifier = IdentityVerifier::new(VerifyingKey::Hs256 { secret: secret.clone() }, false, "hounfour-gateway").unwrap();
        let store = Arc::new(LocalSharedStore::new());
        let guard = JtiReplayGuard::new(store);

        let tok = token(&secret, "free", Some("reasoning"));
        let result = authenticate(&verifier, &guard, &known_pools(), false, &tok).await;
        assert_eq!(result.unwrap_err().status_code(), 403);
    }
}

// [libs/gateway/identity/src/lib.rs]
/*!
 * =================================================================
 * APARATO: IDENTITY CLAIM VALIDATION (V1.0)
 * CLASIFICACIÓN: SEGURIDAD DE BORDE (ESTRATO L1 — PUERTO)
 * RESPONSABILIDAD: DECODIFICACIÓN/VERIFICACIÓN DEL CLAIM DE IDENTIDAD Y
 *                  GUARDIA ANTI-REPETICIÓN DE JTI (§6)
 *
 * The inbound identity assertion is the one piece of untrusted input the
 * whole pipeline hangs off of. This crate owns exactly two
 * responsibilities: verifying the token's signature and temporal claims
 * (§6 — ES256 required in production, HS256 only outside it; ≤30s clock
 * skew; ≤3600s max lifetime), and guarding against `jti` replay via a
 * `SharedStore`-backed set-if-absent+TTL, mirroring the nonce-replay
 * guard the payments crate uses for EIP-3009 authorizations. Pool
 * derivation from the validated claim lives in `hounfour-gateway-pool`,
 * not here — this crate hands back a `ValidatedClaim`, never a
 * `TenantContext`, keeping "validate the envelope" separate from
 * "authorize the pool" (§9).
 * =================================================================
 */

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use hounfour_gateway_shared_store::{SharedStore, SharedStoreError};

/// Clock skew tolerance (§6): "Clock skew tolerance ≤ 30 s".
pub const CLOCK_SKEW_TOLERANCE_SECONDS: i64 = 30;
/// "max token lifetime ≤ 3600 s" (§6).
pub const MAX_TOKEN_LIFETIME_SECONDS: i64 = 3600;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("token signature or structure is invalid: {0}")]
    InvalidToken(String),
    #[error("token is expired or not yet valid")]
    Expired,
    #[error("token lifetime {lifetime_secs}s exceeds the {max_secs}s maximum")]
    LifetimeExceeded { lifetime_secs: i64, max_secs: i64 },
    #[error("HS256 is not permitted in production")]
    Hs256Forbidden,
    #[error("JTI_REPLAY_DETECTED: token '{0}' has already been presented")]
    JtiReplay(String),
    #[error("shared store unavailable while checking jti replay: {0}")]
    StoreUnavailable(String),
}

/// §6's identity claim shape. Only these fields are trusted; anything
/// else present in the raw token is dropped at decode time rather than
/// carried forward as an open record (§9 "tagged variants, not dynamic
/// claims objects").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaim {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub tenant_id: String,
    pub tier: String,
    pub req_hash: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub pool_id: Option<String>,
    pub allowed_pools: Option<Vec<String>>,
    pub nft_id: Option<String>,
    pub model_preferences: Option<Vec<String>>,
}

/// Which algorithm family the verifier expects, and the key material for
/// it. `jsonwebtoken` needs a `DecodingKey`; we keep the raw bytes too so
/// callers can reload a rotated key without reconstructing this struct.
pub enum VerifyingKey {
    Es256 { public_key_pem: Vec<u8> },
    Hs256 { secret: Vec<u8> },
}

pub struct IdentityVerifier {
    key: VerifyingKey,
    is_production: bool,
    expected_audience: String,
}

impl IdentityVerifier {
    pub fn new(key: VerifyingKey, is_production: bool, expected_audience: impl Into<String>) -> Result<Self, IdentityError> {
        if is_production {
            if let VerifyingKey::Hs256 { .. } = &key {
                return Err(IdentityError::Hs256Forbidden);
            }
        }
        Ok(Self {
            key,
            is_production,
            expected_audience: expected_audience.into(),
        })
    }

    /// Decodes and verifies `token`, enforcing §6's temporal invariants
    /// in addition to `jsonwebtoken`'s own signature/`exp` checks.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<IdentityClaim, IdentityError> {
        if self.is_production {
            if let VerifyingKey::Hs256 { .. } = &self.key {
                return Err(IdentityError::Hs256Forbidden);
            }
        }

        let (decoding_key, algorithm) = match &self.key {
            VerifyingKey::Es256 { public_key_pem } => (
                DecodingKey::from_ec_pem(public_key_pem).map_err(|e| IdentityError::InvalidToken(e.to_string()))?,
                Algorithm::ES256,
            ),
            VerifyingKey::Hs256 { secret } => (DecodingKey::from_secret(secret), Algorithm::HS256),
        };

        let mut validation = Validation::new(algorithm);
        validation.set_audience(&[&self.expected_audience]);
        validation.leeway = CLOCK_SKEW_TOLERANCE_SECONDS as u64;

        let decoded = jsonwebtoken::decode::<IdentityClaim>(token, &decoding_key, &validation)
            .map_err(|e| IdentityError::InvalidToken(e.to_string()))?;
        let claim = decoded.claims;

        let now_ts = now.timestamp();
        if claim.exp + CLOCK_SKEW_TOLERANCE_SECONDS < now_ts || claim.iat - CLOCK_SKEW_TOLERANCE_SECONDS > now_ts {
            return Err(IdentityError::Expired);
        }

        let lifetime = claim.exp - claim.iat;
        if lifetime > MAX_TOKEN_LIFETIME_SECONDS {
            return Err(IdentityError::LifetimeExceeded {
                lifetime_secs: lifetime,
                max_secs: MAX_TOKEN_LIFETIME_SECONDS,
            });
        }

        Ok(claim)
    }
}

/// §6 "A `jti` replay guard with TTL = token remaining lifetime prevents
/// token reuse." Built on the same `set_if_absent` primitive the
/// payments crate uses for nonce replay (§4.L/§4.K), since both are the
/// same shape of problem: a one-shot token that must never be consumed
/// twice.
pub struct JtiReplayGuard {
    store: Arc<dyn SharedStore>,
}

impl JtiReplayGuard {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Returns `Ok(())` on first presentation of `claim.jti`; `Err` on
    /// replay or store failure. TTL is the token's remaining lifetime,
    /// floored at 1 second so an already-near-expiry token still gets a
    /// guard window.
    pub async fn check_and_record(&self, claim: &IdentityClaim, now: DateTime<Utc>) -> Result<(), IdentityError> {
        let remaining = (claim.exp - now.timestamp()).max(1) as u64;
        let key = format!("identity:jti:{}", claim.jti);
        let created = self
            .store
            .set_if_absent(&key, "1".to_string(), Duration::from_secs(remaining))
            .await
            .map_err(|e: SharedStoreError| IdentityError::StoreUnavailable(e.to_string()))?;

        if created {
            Ok(())
        } else {
            Err(IdentityError::JtiReplay(claim.jti.clone()))
        }
    }
}

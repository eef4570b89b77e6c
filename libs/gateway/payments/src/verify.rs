// [libs/gateway/payments/src/verify.rs]
//! §4.K stage 2: `Verify`.

use crate::crypto::{authorization_digest, ecrecover_address, payment_id};
use crate::errors::PaymentError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hounfour_gateway_models::{PaymentProof, Quote};
use hounfour_gateway_shared_store::SharedStore;
use std::sync::Arc;
use std::time::Duration;

/// EIP-1271 contract-signature fallback, used when the recovered EOA
/// address doesn't match `from` — covers smart-contract wallets.
#[async_trait]
pub trait ContractSignatureVerifier: Send + Sync {
    async fn is_valid_signature(&self, contract_address: &str, digest: &[u8; 32], signature_hex: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub valid: bool,
    pub idempotent_replay: bool,
    pub payment_id: String,
}

pub async fn verify_payment(
    store: &Arc<dyn SharedStore>,
    proof: &PaymentProof,
    quote: &Quote,
    treasury: &str,
    now: DateTime<Utc>,
    contract_verifier: Option<&dyn ContractSignatureVerifier>,
) -> Result<VerifyOutcome, PaymentError> {
    let auth = &proof.authorization;

    if auth.to.to_lowercase() != treasury.to_lowercase() {
        return Err(PaymentError::RecipientMismatch {
            got: auth.to.clone(),
            expected: treasury.to_string(),
        });
    }

    let authorized_value: u64 = auth.value.parse().map_err(|_| PaymentError::InvalidSignature("non-numeric value".to_string()))?;
    let required = quote.max_cost_micro().map_err(|_| PaymentError::QuoteNotFound(quote.quote_id.clone()))?;
    if authorized_value < required {
        return Err(PaymentError::InsufficientAmount {
            authorized: auth.value.clone(),
            required: required.to_string(),
        });
    }

    if auth.valid_before <= now.timestamp() {
        return Err(PaymentError::Expired {
            valid_before: auth.valid_before,
            now: now.timestamp(),
        });
    }

    let digest = authorization_digest(auth, proof.chain_id);
    let recovered = ecrecover_address(&digest, auth.v, &auth.r, &auth.s)
        .map_err(PaymentError::InvalidSignature)?;

    let signature_valid = if recovered.to_lowercase() == auth.from.to_lowercase() {
        true
    } else if let Some(verifier) = contract_verifier {
        let signature_hex = format!("{}{}{:02x}", auth.r, auth.s.trim_start_matches("0x"), auth.v);
        verifier.is_valid_signature(&auth.from, &digest, &signature_hex).await
    } else {
        false
    };

    if !signature_valid {
        return Err(PaymentError::InvalidSignature(format!(
            "recovered address {recovered} does not match authorization.from {}",
            auth.from
        )));
    }

    let pid = payment_id(auth, proof.chain_id);
    let ttl_secs = (auth.valid_before - now.timestamp()).max(60) as u64;
    let created = store
        .set_if_absent(&format!("x402:payment:{pid}"), "1".to_string(), Duration::from_secs(ttl_secs))
        .await
        .map_err(|e| PaymentError::Store(e.to_string()))?;

    if !created {
        tracing::info!(payment_id = %pid, "payment verification is an idempotent replay");
        return Ok(VerifyOutcome {
            valid: true,
            idempotent_replay: true,
            payment_id: pid,
        });
    }

    let _ = store
        .wal_append(
            "payment",
            "verify",
            &pid,
            serde_json::json!({"from": auth.from, "to": auth.to, "value": auth.value, "quote_id": proof.quote_id}),
        )
        .await;

    Ok(VerifyOutcome {
        valid: true,
        idempotent_replay: false,
        payment_id: pid,
    })
}

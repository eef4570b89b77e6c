// [libs/gateway/models/src/payment.rs]
//! EIP-3009 payment authorization, quoting, and credit-note entities (§3, §4.K).

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

/// An EIP-3009 `transferWithAuthorization` envelope.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAuthorization {
    pub from: String,
    pub to: String,
    /// Decimal-string `uint256` value, in the denomination's smallest unit.
    pub value: String,
    pub valid_after: i64,
    pub valid_before: i64,
    /// 32-byte nonce, hex-encoded with a leading `0x`.
    pub nonce: String,
    pub v: u8,
    pub r: String,
    pub s: String,
}

/// Wraps a `PaymentAuthorization` with the chain and quote it settles against.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentProof {
    pub authorization: PaymentAuthorization,
    pub quote_id: String,
    pub chain_id: u64,
}

/// Canonical payment identity: `pid_` + `SHA-256(chain_id:from_lc:to_lc:nonce:value:valid_before)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentId(pub String);

impl std::fmt::Display for PaymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A signed, time-bounded commitment to a maximum price for a model call.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub quote_id: String,
    pub model: String,
    pub max_tokens: u64,
    /// Decimal-string micro-unit ceiling.
    pub max_cost: String,
    pub payment_address: String,
    pub chain_id: u64,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl Quote {
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn max_cost_micro(&self) -> Result<u64, std::num::ParseIntError> {
        self.max_cost.parse()
    }
}

/// A positive balance credited to a wallet when actual cost undercuts a quote.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditNote {
    pub wallet_address: String,
    pub quote_id: String,
    pub amount_micro: u64,
}

/// Exchange rate frozen at quote time and stamped onto the billing entry it
/// priced, so later drift in `USD_USDC_EXCHANGE_RATE` never retroactively
/// changes a settled amount.
#[typeshare]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FrozenExchangeRate {
    /// Micro-USDC per micro-USD, scaled by 1_000_000 (fixed-point).
    pub rate_scaled: u64,
    pub frozen_at: chrono::DateTime<chrono::Utc>,
}

impl FrozenExchangeRate {
    pub fn to_micro_usdc(&self, micro_usd: u64) -> u64 {
        ((micro_usd as u128 * self.rate_scaled as u128) / 1_000_000) as u64
    }

    pub fn to_micro_usd(&self, micro_usdc: u64) -> u64 {
        ((micro_usdc as u128 * 1_000_000) / self.rate_scaled as u128) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_drift_is_within_one_micro_unit() {
        let rate = FrozenExchangeRate {
            rate_scaled: 1_000_000,
            frozen_at: chrono::Utc::now(),
        };
        for x in [1u64, 7, 3250, 999_999, 123_456_789] {
            let usdc = rate.to_micro_usdc(x);
            let back = rate.to_micro_usd(usdc);
            let drift = back as i128 - x as i128;
            assert!((-1..=1).contains(&drift), "drift {drift} out of bounds for x={x}");
        }
    }
}

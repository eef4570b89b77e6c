// [libs/gateway/payments/src/quote.rs]
//! §4.K stage 1: `generateQuote`.

use crate::errors::PaymentError;
use chrono::{Duration as ChronoDuration, Utc};
use hounfour_gateway_models::Quote;
use hounfour_gateway_shared_store::SharedStore;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn quote_key(quote_id: &str) -> String {
    format!("x402:quote:{quote_id}")
}

/// `max_cost = ceil(max_tokens * rate_per_token * markup_factor)`.
pub fn compute_max_cost_micro(max_tokens: u64, rate_per_token_micro: u64, markup_factor_bps: u64) -> u64 {
    let raw = max_tokens as u128 * rate_per_token_micro as u128 * markup_factor_bps as u128;
    let (numerator, denominator) = (raw, 10_000u128);
    ((numerator + denominator - 1) / denominator) as u64
}

pub async fn generate_quote(
    store: &Arc<dyn SharedStore>,
    model: &str,
    max_tokens: u64,
    rate_per_token_micro: u64,
    markup_factor_bps: u64,
    payment_address: &str,
    chain_id: u64,
    ttl: Duration,
) -> Result<Quote, PaymentError> {
    let max_cost = compute_max_cost_micro(max_tokens, rate_per_token_micro, markup_factor_bps);
    let quote = Quote {
        quote_id: format!("quote_{}", Uuid::new_v4()),
        model: model.to_string(),
        max_tokens,
        max_cost: max_cost.to_string(),
        payment_address: payment_address.to_string(),
        chain_id,
        expires_at: Utc::now() + ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::seconds(300)),
    };

    let serialized = serde_json::to_string(&quote).map_err(|e| PaymentError::Store(e.to_string()))?;
    store
        .set(&quote_key(&quote.quote_id), serialized, Some(ttl))
        .await
        .map_err(|e| PaymentError::Store(e.to_string()))?;

    Ok(quote)
}

pub async fn fetch_quote(store: &Arc<dyn SharedStore>, quote_id: &str) -> Result<Quote, PaymentError> {
    let raw = store.get(&quote_key(quote_id)).await.ok_or_else(|| PaymentError::QuoteNotFound(quote_id.to_string()))?;
    serde_json::from_str(&raw).map_err(|_| PaymentError::QuoteNotFound(quote_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hounfour_gateway_shared_store::LocalSharedStore;

    #[test]
    fn max_cost_rounds_up() {
        // 100 tokens * 1 micro/token * 1.05x markup = 105 exactly.
        assert_eq!(compute_max_cost_micro(100, 1, 10_500), 105);
        // 3 tokens * 1 micro/token * 1.0001x markup rounds up to 1.
        assert_eq!(compute_max_cost_micro(3, 1, 10_001), 1);
    }

    #[tokio::test]
    async fn generated_quote_round_trips_through_the_store() {
        let store: Arc<dyn SharedStore> = Arc::new(LocalSharedStore::new());
        let quote = generate_quote(&store, "gpt-4o-mini", 1000, 10, 10_000, "0xTreasury", 8453, Duration::from_secs(300))
            .await
            .unwrap();

        let fetched = fetch_quote(&store, &quote.quote_id).await.unwrap();
        assert_eq!(fetched.quote_id, quote.quote_id);
        assert_eq!(fetched.max_cost, quote.max_cost);
    }
}

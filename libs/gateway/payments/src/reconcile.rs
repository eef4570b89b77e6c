// [libs/gateway/payments/src/reconcile.rs]
//! §4.K stage 4: post-settlement cost reconciliation and credit-note
//! accounting.

use crate::errors::PaymentError;
use hounfour_gateway_models::{CreditNote, MAX_SAFE_INTEGER};
use hounfour_gateway_shared_store::SharedStore;
use std::sync::Arc;

/// Balance per wallet capped at 1,000 USD, in micro-units. An Open
/// Question the distillation left unanswered; this is the value chosen.
pub const MAX_CREDIT_BALANCE_MICRO: u64 = 1_000_000_000;

fn balance_key(wallet_address: &str) -> String {
    format!("x402:credit:{}", wallet_address.to_lowercase())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditApplication {
    pub credit_used: u64,
    pub reduced_amount: u64,
    pub remaining_credit: u64,
}

/// Issues a `CreditNote` for `quoted_cost - actual_cost` when the model
/// call undercut its quote, crediting the wallet's balance atomically
/// under `MAX_CREDIT_BALANCE_MICRO`. Returns `None` when `actual_cost`
/// met or exceeded the quote — there's no credit due.
pub async fn issue_credit_note(
    store: &Arc<dyn SharedStore>,
    wallet_address: &str,
    quote_id: &str,
    quoted_cost_micro: u64,
    actual_cost_micro: u64,
) -> Result<Option<CreditNote>, PaymentError> {
    if actual_cost_micro >= quoted_cost_micro {
        return Ok(None);
    }

    let delta = quoted_cost_micro - actual_cost_micro;
    if delta > MAX_SAFE_INTEGER {
        return Err(PaymentError::Overflow);
    }

    let key = balance_key(wallet_address);
    let new_balance = store
        .incr_by(&key, delta as i64)
        .await
        .map_err(|e| PaymentError::Store(e.to_string()))?;

    if new_balance as u64 > MAX_CREDIT_BALANCE_MICRO {
        // Roll back: this credit would exceed the cap.
        store
            .incr_by(&key, -(delta as i64))
            .await
            .map_err(|e| PaymentError::Store(e.to_string()))?;
        return Err(PaymentError::CapExceeded {
            wallet: wallet_address.to_string(),
        });
    }

    let note = CreditNote {
        wallet_address: wallet_address.to_lowercase(),
        quote_id: quote_id.to_string(),
        amount_micro: delta,
    };

    let _ = store
        .wal_append(
            "payment",
            "credit_note_issued",
            quote_id,
            serde_json::json!({
                "revenue": actual_cost_micro,
                "credit_notes": delta,
                "wallet_address": note.wallet_address,
            }),
        )
        .await;

    Ok(Some(note))
}

/// Atomically consumes up to `required_micro` from `wallet_address`'s
/// credit balance, returning how much of `required_micro` the credit
/// covered and how much remains to be charged.
pub async fn apply_credit_notes(
    store: &Arc<dyn SharedStore>,
    wallet_address: &str,
    required_micro: u64,
) -> Result<CreditApplication, PaymentError> {
    let key = balance_key(wallet_address);
    let balance: u64 = store.get(&key).await.and_then(|v| v.parse().ok()).unwrap_or(0);

    let credit_used = required_micro.min(balance);
    if credit_used > 0 {
        store
            .incr_by(&key, -(credit_used as i64))
            .await
            .map_err(|e| PaymentError::Store(e.to_string()))?;
    }

    Ok(CreditApplication {
        credit_used,
        reduced_amount: required_micro - credit_used,
        remaining_credit: balance - credit_used,
    })
}

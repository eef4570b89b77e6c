// [libs/gateway/payments/src/errors.rs]
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error("quote '{0}' not found or expired")]
    QuoteNotFound(String),
    #[error("PAYMENT_RECIPIENT_MISMATCH: authorization targets {got}, expected treasury {expected}")]
    RecipientMismatch { got: String, expected: String },
    #[error("PAYMENT_INSUFFICIENT_AMOUNT: authorized {authorized} is below quoted {required}")]
    InsufficientAmount { authorized: String, required: String },
    #[error("PAYMENT_EXPIRED: authorization's valid_before {valid_before} is not after now {now}")]
    Expired { valid_before: i64, now: i64 },
    #[error("PAYMENT_INVALID_SIGNATURE: {0}")]
    InvalidSignature(String),
    #[error("SETTLEMENT_FAILED: {0}")]
    SettlementFailed(String),
    #[error("CAP_EXCEEDED: crediting wallet '{wallet}' would exceed the maximum balance")]
    CapExceeded { wallet: String },
    #[error("OVERFLOW: credit delta exceeds the safe-integer bound")]
    Overflow,
    #[error("shared store operation failed: {0}")]
    Store(String),
}

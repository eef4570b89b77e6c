// [libs/gateway/models/src/error_code.rs]
//! The §6 pool-enforcement / gateway error-code vocabulary, shared so every
//! component raises the same stable strings instead of ad-hoc literals.

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

#[typeshare]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PoolAccessDenied,
    UnknownPool,
    BudgetExceeded,
    BudgetOverflow,
    RateLimited,
    MeteringUnavailable,
    BudgetCircuitOpen,
    JtiReplayDetected,
    IdentityInvalid,
    TierUnauthorized,
    BindingInvalid,
    ProviderUnavailable,
    ToolCallMaxIterations,
    ToolCallConsecutiveFailures,
    ToolCallWallTimeExceeded,
    ToolCallValidationFailed,
    PaymentInvalidSignature,
    PaymentInsufficientAmount,
    PaymentExpired,
    PaymentRecipientMismatch,
    FencingStale,
    FencingCorrupt,
    EnsembleBudgetExceeded,
}

impl ErrorCode {
    /// §6's HTTP status mapping.
    pub fn http_status(self) -> u16 {
        use ErrorCode::*;
        match self {
            JtiReplayDetected | IdentityInvalid => 401,
            PoolAccessDenied | TierUnauthorized | UnknownPool => 403,
            BudgetExceeded | BudgetOverflow | PaymentInvalidSignature | PaymentInsufficientAmount
            | PaymentExpired | PaymentRecipientMismatch | EnsembleBudgetExceeded => 402,
            RateLimited => 429,
            MeteringUnavailable | BudgetCircuitOpen => 503,
            BindingInvalid | ProviderUnavailable => 422,
            ToolCallMaxIterations | ToolCallConsecutiveFailures | ToolCallWallTimeExceeded
            | ToolCallValidationFailed => 422,
            FencingStale | FencingCorrupt => 409,
        }
    }
}

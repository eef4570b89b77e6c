// [apps/gateway/src/error.rs]
//! Unifies every gateway component's error enum behind one stable `code`
//! (the §6 error-shape vocabulary) and a JSON context blob, so the HTTP
//! layer has exactly one place to compute a status code from.

use hounfour_gateway_models::ErrorCode;
use serde_json::json;

#[derive(thiserror::Error, Debug)]
#[error("{code:?}: {message}")]
pub struct GatewayError {
    pub code: ErrorCode,
    pub message: String,
    pub context: serde_json::Value,
}

impl GatewayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: json!({}),
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn status_code(&self) -> u16 {
        self.code.http_status()
    }
}

impl From<hounfour_gateway_pool::PoolError> for GatewayError {
    fn from(err: hounfour_gateway_pool::PoolError) -> Self {
        use hounfour_gateway_pool::PoolError::*;
        let code = match err {
            UnknownPool(_) => ErrorCode::UnknownPool,
            PoolAccessDenied(_) => ErrorCode::PoolAccessDenied,
        };
        Self::new(code, err.to_string())
    }
}

impl From<hounfour_gateway_registry::RegistryError> for GatewayError {
    fn from(err: hounfour_gateway_registry::RegistryError) -> Self {
        Self::new(ErrorCode::BindingInvalid, err.to_string())
    }
}

impl From<hounfour_gateway_budget::BudgetError> for GatewayError {
    fn from(err: hounfour_gateway_budget::BudgetError) -> Self {
        use hounfour_gateway_budget::BudgetError::*;
        let code = match err {
            Exceeded { .. } => ErrorCode::BudgetExceeded,
            MeteringUnavailable(_) => ErrorCode::MeteringUnavailable,
        };
        Self::new(code, err.to_string())
    }
}

impl From<hounfour_gateway_ratelimit::RateLimitError> for GatewayError {
    fn from(err: hounfour_gateway_ratelimit::RateLimitError) -> Self {
        Self::new(ErrorCode::RateLimited, err.to_string())
    }
}

impl From<hounfour_gateway_pricing::PricingError> for GatewayError {
    fn from(err: hounfour_gateway_pricing::PricingError) -> Self {
        Self::new(ErrorCode::BudgetOverflow, err.to_string())
    }
}

impl From<hounfour_gateway_provider_invoker::InvocationError> for GatewayError {
    fn from(err: hounfour_gateway_provider_invoker::InvocationError) -> Self {
        Self::new(ErrorCode::ProviderUnavailable, err.to_string())
            .with_context(json!({"exit_code": err.exit_code(), "retryable": err.is_retryable()}))
    }
}

impl From<hounfour_gateway_toolcall::ToolCallError> for GatewayError {
    fn from(err: hounfour_gateway_toolcall::ToolCallError) -> Self {
        use hounfour_gateway_toolcall::ToolCallError::*;
        let code = match err {
            MaxIterations(_) => ErrorCode::ToolCallMaxIterations,
            ConsecutiveFailures(_) => ErrorCode::ToolCallConsecutiveFailures,
            WallTimeExceeded(_) => ErrorCode::ToolCallWallTimeExceeded,
            ValidationFailed(_) => ErrorCode::ToolCallValidationFailed,
            ModelError(_) => ErrorCode::ProviderUnavailable,
        };
        Self::new(code, err.to_string())
    }
}

impl From<hounfour_gateway_ensemble::EnsembleError> for GatewayError {
    fn from(err: hounfour_gateway_ensemble::EnsembleError) -> Self {
        Self::new(ErrorCode::EnsembleBudgetExceeded, err.to_string())
    }
}

impl From<hounfour_gateway_identity::IdentityError> for GatewayError {
    fn from(err: hounfour_gateway_identity::IdentityError) -> Self {
        use hounfour_gateway_identity::IdentityError::*;
        let code = match err {
            JtiReplay(_) => ErrorCode::JtiReplayDetected,
            InvalidToken(_) | Expired | LifetimeExceeded { .. } | Hs256Forbidden => ErrorCode::IdentityInvalid,
            StoreUnavailable(_) => ErrorCode::MeteringUnavailable,
        };
        Self::new(code, err.to_string())
    }
}

impl From<hounfour_gateway_payments::PaymentError> for GatewayError {
    fn from(err: hounfour_gateway_payments::PaymentError) -> Self {
        use hounfour_gateway_payments::PaymentError::*;
        let code = match err {
            InvalidSignature(_) => ErrorCode::PaymentInvalidSignature,
            InsufficientAmount { .. } => ErrorCode::PaymentInsufficientAmount,
            Expired { .. } => ErrorCode::PaymentExpired,
            RecipientMismatch { .. } => ErrorCode::PaymentRecipientMismatch,
            QuoteNotFound(_) | SettlementFailed(_) | CapExceeded { .. } | Overflow | Store(_) => {
                ErrorCode::ProviderUnavailable
            }
        };
        Self::new(code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_exceeded_maps_to_402() {
        let err: GatewayError = hounfour_gateway_budget::BudgetError::Exceeded {
            scope: "project:P".into(),
            would_be_micro: 100,
            limit_micro: 50,
        }
        .into();
        assert_eq!(err.status_code(), 402);
    }

    #[test]
    fn pool_access_denied_maps_to_403() {
        let err: GatewayError = hounfour_gateway_pool::PoolError::PoolAccessDenied("nope".into()).into();
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn rate_limited_maps_to_429() {
        let err: GatewayError = hounfour_gateway_ratelimit::RateLimitError::RateLimited {
            provider: "openai".into(),
            retry_after_ms: 10,
        }
        .into();
        assert_eq!(err.status_code(), 429);
    }
}

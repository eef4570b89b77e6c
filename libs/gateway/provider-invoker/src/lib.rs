// [libs/gateway/provider-invoker/src/lib.rs]
/*!
 * =================================================================
 * APARATO: PROVIDER INVOKER PORT (V1.0)
 * CLASIFICACIÓN: INFRASTRUCTURE ADAPTER (ESTRATO L3 — PUERTO)
 * RESPONSABILIDAD: ESQUEMA DE SOLICITUD HMAC-FIRMADA Y TAXONOMÍA DE SALIDA
 *
 * The `cheval` subprocess (or any equivalent transport) is abstracted
 * behind `ProviderInvoker` (§1, §6): the router never shells out or
 * opens a socket directly, it hands a signed `InvocationRequest` to
 * whatever concrete implementation is wired in at startup. This crate
 * owns the wire schema, the HMAC signing the router applies before
 * dispatch (§4.J step 5: "signed request — HMAC over canonical body +
 * nonce + trace-id + issued-at"), and the exit-code → `FailureKind`
 * classification (§6, §4.E) a caller uses to feed the health prober.
 * =================================================================
 */

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use hounfour_gateway_health::FailureKind;
use hounfour_gateway_models::ProviderModel;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// §6 "ProviderInvoker port" request metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationMetadata {
    pub agent: String,
    pub tenant_id: String,
    pub nft_id: Option<String>,
    pub trace_id: String,
}

/// §6 request schema: `{schema_version=1, provider, model, messages,
/// options, metadata, retry, hmac}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRequest {
    #[serde(default = "schema_version_1")]
    pub schema_version: u32,
    pub provider: String,
    pub model: String,
    pub messages: serde_json::Value,
    pub options: serde_json::Value,
    pub metadata: InvocationMetadata,
    pub retry: RetryPolicy,
    pub nonce: String,
    pub issued_at: i64,
    pub hmac: String,
}

fn schema_version_1() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff_ms: 250,
        }
    }
}

/// The fields covered by the HMAC, in canonical order (§4.J step 5).
fn canonical_body(
    provider: &str,
    model: &str,
    messages: &serde_json::Value,
    options: &serde_json::Value,
    nonce: &str,
    trace_id: &str,
    issued_at: i64,
) -> String {
    format!(
        "{provider}|{model}|{}|{}|{nonce}|{trace_id}|{issued_at}",
        messages, options
    )
}

/// Signs `canonical_body(...)` with the active HMAC secret (`CHEVAL_HMAC_SECRET`),
/// producing the hex digest carried in `InvocationRequest::hmac`.
pub fn sign_request(
    secret: &[u8],
    provider: &str,
    model: &str,
    messages: &serde_json::Value,
    options: &serde_json::Value,
    nonce: &str,
    trace_id: &str,
    issued_at: i64,
) -> String {
    let body = canonical_body(provider, model, messages, options, nonce, trace_id, issued_at);
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Builds a fully signed `InvocationRequest`, ready for dispatch.
#[allow(clippy::too_many_arguments)]
pub fn build_request(
    secret: &[u8],
    provider: &str,
    model: &str,
    messages: serde_json::Value,
    options: serde_json::Value,
    metadata: InvocationMetadata,
    retry: RetryPolicy,
) -> InvocationRequest {
    let nonce = uuid::Uuid::new_v4().to_string();
    let issued_at = Utc::now().timestamp();
    let hmac = sign_request(secret, provider, model, &messages, &options, &nonce, &metadata.trace_id, issued_at);

    InvocationRequest {
        schema_version: 1,
        provider: provider.to_string(),
        model: model.to_string(),
        messages,
        options,
        metadata,
        retry,
        nonce,
        issued_at,
        hmac,
    }
}

/// Verifies a request's HMAC against a candidate secret. Used by a
/// receiving side (or `CHEVAL_HMAC_SECRET_PREV` dual-key rotation) to
/// accept requests signed under either the current or previous secret.
pub fn verify_request(secret: &[u8], request: &InvocationRequest) -> bool {
    let expected = sign_request(
        secret,
        &request.provider,
        &request.model,
        &request.messages,
        &request.options,
        &request.nonce,
        &request.metadata.trace_id,
        request.issued_at,
    );
    expected == request.hmac
}

/// A completed invocation's usage and content, on the success path.
#[derive(Debug, Clone, Default)]
pub struct InvocationResult {
    pub content: serde_json::Value,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub reasoning_tokens: u64,
    pub latency_ms: u64,
    pub tool_calls: serde_json::Value,
}

/// §6 exit-code taxonomy, mapped onto a typed outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    #[error("provider error (exit 1): {0}")]
    ProviderError(String),
    #[error("network/timeout error (exit 2, retryable): {0}")]
    NetworkTimeout(String),
    #[error("HMAC invalid (exit 3): {0}")]
    HmacInvalid(String),
    #[error("schema invalid (exit 4): {0}")]
    SchemaInvalid(String),
    #[error("internal error (exit 5): {0}")]
    Internal(String),
}

impl InvocationError {
    /// §6's exit-code vocabulary, for logging/telemetry parity with the
    /// subprocess transport this port abstracts.
    pub fn exit_code(&self) -> u8 {
        match self {
            InvocationError::ProviderError(_) => 1,
            InvocationError::NetworkTimeout(_) => 2,
            InvocationError::HmacInvalid(_) => 3,
            InvocationError::SchemaInvalid(_) => 4,
            InvocationError::Internal(_) => 5,
        }
    }

    /// §4.E taxonomy: 5xx/timeouts are health-eligible; 4xx, HMAC, and
    /// schema errors are not.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            InvocationError::NetworkTimeout(_) => FailureKind::Timeout,
            InvocationError::ProviderError(_) => FailureKind::ServerError,
            InvocationError::HmacInvalid(_) | InvocationError::Internal(_) => FailureKind::ClientError,
            InvocationError::SchemaInvalid(_) => FailureKind::SchemaError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, InvocationError::NetworkTimeout(_))
    }
}

/// The capability boundary the router depends on. Concrete
/// implementations (subprocess, HTTP sidecar, in-process mock for tests)
/// plug in here; nothing upstream knows which one is active.
#[async_trait]
pub trait ProviderInvoker: Send + Sync {
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResult, InvocationError>;
}

/// Identifies which concrete `(provider, model)` an invoker call targeted,
/// for callers that need to report back to the health prober.
pub fn target_of(request: &InvocationRequest) -> ProviderModel {
    ProviderModel::new(request.provider.clone(), request.model.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> InvocationMetadata {
        InvocationMetadata {
            agent: "translator".into(),
            tenant_id: "tenant-1".into(),
            nft_id: None,
            trace_id: "trace-1".into(),
        }
    }

    #[test]
    fn signed_request_verifies_under_the_same_secret() {
        let secret = b"shh";
        let request = build_request(
            secret,
            "openai",
            "gpt-4o-mini",
            serde_json::json!([{"role": "user", "content": "hi"}]),
            serde_json::json!({}),
            metadata(),
            RetryPolicy::default(),
        );
        assert!(verify_request(secret, &request));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let secret = b"shh";
        let mut request = build_request(
            secret,
            "openai",
            "gpt-4o-mini",
            serde_json::json!([{"role": "user", "content": "hi"}]),
            serde_json::json!({}),
            metadata(),
            RetryPolicy::default(),
        );
        request.model = "gpt-5".to_string();
        assert!(!verify_request(secret, &request));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let request = build_request(
            b"shh",
            "openai",
            "gpt-4o-mini",
            serde_json::json!([]),
            serde_json::json!({}),
            metadata(),
            RetryPolicy::default(),
        );
        assert!(!verify_request(b"different", &request));
    }

    #[test]
    fn exit_code_and_health_eligibility_match_the_taxonomy() {
        assert_eq!(InvocationError::ProviderError("x".into()).exit_code(), 1);
        assert_eq!(InvocationError::NetworkTimeout("x".into()).exit_code(), 2);
        assert!(InvocationError::NetworkTimeout("x".into()).failure_kind().is_health_eligible());
        assert!(!InvocationError::HmacInvalid("x".into()).failure_kind().is_health_eligible());
        assert!(!InvocationError::SchemaInvalid("x".into()).failure_kind().is_health_eligible());
    }

    #[test]
    fn only_network_timeout_is_retryable() {
        assert!(InvocationError::NetworkTimeout("x".into()).is_retryable());
        assert!(!InvocationError::ProviderError("x".into()).is_retryable());
    }
}

// [apps/gateway/src/main.rs]
//! Process entry point: loads `.env`, initializes tracing, assembles the
//! `GatewayKernel`, and serves a minimal illustrative HTTP surface over
//! the §4.J router pipeline, gated by §6 bearer-token identity
//! verification. Full HTTP framework wiring (streaming, WebSocket
//! upgrade, a real middleware layer) is out of scope — the axum app here
//! exists only to exercise the kernel from a real socket.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use hounfour_gateway::config::load_registry_file;
use hounfour_gateway::identity::authenticate;
use hounfour_gateway::router::{HounfourRouter, InvokeRequest};
use hounfour_gateway::{GatewayConfig, GatewayKernel};
use hounfour_gateway_provider_invoker::{InvocationError, InvocationRequest, InvocationResult, ProviderInvoker};
use std::sync::Arc;
use tokio::process::Command;

/// Shells out to the `cheval` binary on `$PATH`, feeding it the signed
/// `InvocationRequest` as JSON on stdin and reading an `InvocationResult`
/// back on stdout. The exit code selects the `InvocationError` variant
/// per §6's taxonomy when the process does not exit 0.
struct ChevalSubprocessInvoker;

#[async_trait::async_trait]
impl ProviderInvoker for ChevalSubprocessInvoker {
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResult, InvocationError> {
        use std::process::Stdio;
        use tokio::io::AsyncWriteExt;

        let payload = serde_json::to_vec(&request)
            .map_err(|err| InvocationError::Internal(format!("request serialization failed: {err}")))?;

        let mut child = Command::new("cheval")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| InvocationError::Internal(format!("failed to spawn cheval: {err}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|err| InvocationError::NetworkTimeout(format!("stdin write failed: {err}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|err| InvocationError::NetworkTimeout(format!("cheval process wait failed: {err}")))?;

        match output.status.code() {
            Some(0) => serde_json::from_slice(&output.stdout)
                .map_err(|err| InvocationError::SchemaInvalid(format!("cheval stdout did not match InvocationResult: {err}"))),
            Some(1) => Err(InvocationError::ProviderError(String::from_utf8_lossy(&output.stderr).to_string())),
            Some(2) => Err(InvocationError::NetworkTimeout(String::from_utf8_lossy(&output.stderr).to_string())),
            Some(3) => Err(InvocationError::HmacInvalid(String::from_utf8_lossy(&output.stderr).to_string())),
            Some(4) => Err(InvocationError::SchemaInvalid(String::from_utf8_lossy(&output.stderr).to_string())),
            _ => Err(InvocationError::Internal(String::from_utf8_lossy(&output.stderr).to_string())),
        }
    }
}

#[derive(Clone)]
struct AppState {
    router: Arc<HounfourRouter>,
    invoker: Arc<dyn ProviderInvoker>,
    kernel: Arc<GatewayKernel>,
}

#[derive(serde::Deserialize)]
struct InvokePayload {
    agent: String,
    project_id: String,
    phase_id: Option<String>,
    sprint_id: Option<String>,
    messages: serde_json::Value,
    options: serde_json::Value,
    estimated_tokens: u64,
    trace_id: String,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

/// Derives the `TenantContext` from the request's bearer token (§6
/// identity claim → §4.G pool enforcement) before handing the payload to
/// the §4.J router pipeline. The identity claim's signature, temporal
/// bounds, and `jti` replay status gate entry to everything downstream.
async fn invoke_handler(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<InvokePayload>) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"code": "AUTH_MISSING", "message": "missing bearer token"})))
            .into_response();
    };

    let verifier = match state.kernel.identity_verifier() {
        Ok(v) => v,
        Err(err) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"code": "CONFIG_ERROR", "message": err.to_string()})))
                .into_response()
        }
    };

    let known_pools = hounfour_gateway_pool::all_known_pools();
    let tenant = match authenticate(&verifier, &state.kernel.jti_guard, &known_pools, false, token).await {
        Ok(ctx) => ctx,
        Err(err) => {
            let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return (status, Json(serde_json::json!({"code": err.code, "message": err.message}))).into_response();
        }
    };

    let request = InvokeRequest {
        tenant,
        agent: payload.agent,
        project_id: payload.project_id,
        phase_id: payload.phase_id,
        sprint_id: payload.sprint_id,
        messages: payload.messages,
        options: payload.options,
        estimated_tokens: payload.estimated_tokens,
        trace_id: payload.trace_id,
        fallback: None,
    };

    match state.router.invoke(&request, state.invoker.as_ref()).await {
        Ok(entry) => (StatusCode::OK, Json(entry)).into_response(),
        Err(err) => {
            let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(serde_json::json!({"code": err.code, "message": err.message}))).into_response()
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    hounfour_gateway_telemetry::init_tracing("hounfour-gateway");

    let config = GatewayConfig::from_env().expect("gateway configuration failed to load");
    tracing::info!(node_env = %config.node_env, "hounfour gateway starting");

    let registry_path = std::env::var("REGISTRY_CONFIG_PATH").unwrap_or_else(|_| "./registry.toml".to_string());
    let registry_config = load_registry_file(std::path::Path::new(&registry_path))
        .expect("registry config file failed to load");

    let kernel = Arc::new(GatewayKernel::ignite(config, registry_config).await);
    let router = Arc::new(HounfourRouter::new(
        kernel.registry.clone(),
        kernel.budget.clone(),
        kernel.rate_limiter.clone(),
        kernel.health.clone(),
        kernel.remainder.clone(),
        kernel.config.cheval_hmac_secret.clone(),
    ));
    let invoker: Arc<dyn ProviderInvoker> = Arc::new(ChevalSubprocessInvoker);

    let state = AppState {
        router,
        invoker,
        kernel: kernel.clone(),
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/v1/invoke", post(invoke_handler))
        .with_state(state);

    let port: u16 = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string()).parse().unwrap_or(8080);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .unwrap_or_else(|err| panic!("failed to bind port {port}: {err}"));

    tracing::info!(port, "hounfour gateway listening");

    let shutdown_kernel = kernel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            shutdown_kernel.shutdown().await;
        })
        .await
        .unwrap_or_else(|err| tracing::error!(%err, "server exited with an error"));
}

// [libs/gateway/telemetry/src/lib.rs]
/*!
 * =================================================================
 * APARATO: HOUNFOUR TELEMETRY (V1.0)
 * CLASIFICACIÓN: SHARED UTILITY (ESTRATO L4)
 * RESPONSABILIDAD: TRAZADO ESTRUCTURADO Y CAPTURA DE PÁNICOS
 *
 * Mirrors the teacher's `prospector-shared-heimdall::init_tracing`: a
 * dual-mode subscriber (JSON in production, compact human-readable
 * otherwise) driven by `RUST_LOG`, plus a panic hook that funnels thread
 * panics through `tracing::error!`. The production switch here is
 * `NODE_ENV=production` per §6, rather than `cfg!(debug_assertions)` —
 * the gateway's environment variables are the source of truth for
 * runtime mode, not the build profile.
 * =================================================================
 */

use std::panic;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

fn is_production() -> bool {
    std::env::var("NODE_ENV").map(|v| v == "production").unwrap_or(false)
}

/// Initializes the global tracing subscriber and panic hook. Call once,
/// at process start, before anything else logs.
pub fn init_tracing(service_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "{service_name}={level},tower_http=warn,hyper=warn",
            level = if is_production() { "info" } else { "debug" }
        )
        .into()
    });

    if is_production() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_target(false))
            .init();
    }

    let service_id = service_name.to_string();
    panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic_info.payload().downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");

        tracing::error!(service = %service_id, location, message, "panic captured");
    }));
}

// [apps/gateway/src/lib.rs]
/*!
 * =================================================================
 * APARATO: HOUNFOUR GATEWAY (V1.0)
 * CLASIFICACIÓN: COMPOSITION ROOT (ESTRATO L1 — APLICACIÓN)
 * RESPONSABILIDAD: ENRUTAMIENTO, COSTEO Y CUMPLIMIENTO DE PRESUPUESTO
 *                  MULTI-TENANT SOBRE EL PLANO DE INFERENCIA LLM
 *
 * This crate wires every `libs/gateway/*` component into a single
 * `GatewayKernel` and exposes the §4.J router pipeline on top of it.
 * It owns no domain logic of its own beyond composition — every
 * invariant it enforces is implemented in, and delegated to, the
 * component crates it depends on.
 * =================================================================
 */

pub mod config;
pub mod error;
pub mod identity;
pub mod kernel;
pub mod router;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use kernel::GatewayKernel;
pub use router::{run_ensemble, HounfourRouter, InvokeRequest};

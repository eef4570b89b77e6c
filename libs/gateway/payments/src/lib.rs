// [libs/gateway/payments/src/lib.rs]
/*!
 * =================================================================
 * APARATO: TUBERÍA DE PAGOS X402 (V1.0)
 * CLASIFICACIÓN: DOMAIN LOGIC (ESTRATO L2)
 * RESPONSABILIDAD: QUOTE → VERIFY → SETTLE → RECONCILIACIÓN DE CRÉDITO
 *
 * Four independent stages over a shared `SharedStore` (§4.K): a quote is
 * generated and cached with a TTL, an EIP-3009 authorization is verified
 * against it with replay protection, settlement goes through a
 * facilitator with a circuit-broken direct-submission fallback, and any
 * gap between the quoted ceiling and the call's actual cost becomes a
 * `CreditNote` a later request can atomically draw down.
 * =================================================================
 */

mod crypto;
mod errors;
mod quote;
mod reconcile;
mod settle;
mod verify;

pub use crypto::{authorization_digest, ecrecover_address, payment_id};
pub use errors::PaymentError;
pub use quote::{compute_max_cost_micro, fetch_quote, generate_quote};
pub use reconcile::{apply_credit_notes, issue_credit_note, CreditApplication, MAX_CREDIT_BALANCE_MICRO};
pub use settle::{settle, DirectSubmitter, FacilitatorCircuit, PaymentFacilitator, SettlementPath, SettlementReceipt};
pub use verify::{verify_payment, ContractSignatureVerifier, VerifyOutcome};

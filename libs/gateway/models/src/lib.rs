// [libs/gateway/models/src/lib.rs]
/*!
 * =================================================================
 * APARATO: HOUNFOUR DOMAIN MODELS (V1.0)
 * CLASIFICACIÓN: DOMAIN LOGIC (ESTRATO L2)
 * RESPONSABILIDAD: ENTIDADES COMPARTIDAS DEL PLANO DE INFERENCIA
 *
 * Single source of truth for the data model shared across every Hounfour
 * gateway crate: tenant context, provider bindings, pricing, the ledger
 * record, budget scopes, ensemble reservations, and EIP-3009 payment types.
 * Nothing in this crate talks to the network or the filesystem.
 * =================================================================
 */

pub mod budget;
pub mod ensemble;
pub mod error_code;
pub mod fencing;
pub mod ledger;
pub mod payment;
pub mod provider;
pub mod tenant;

pub use budget::{BudgetSnapshot, ScopeKey};
pub use ensemble::EnsembleReservation;
pub use error_code::ErrorCode;
pub use fencing::{FencingToken, MAX_SAFE_INTEGER};
pub use ledger::{BillingMethod, CostBreakdown, LedgerEntryV2, TokenUsage};
pub use payment::{CreditNote, FrozenExchangeRate, PaymentAuthorization, PaymentId, PaymentProof, Quote};
pub use provider::{PricingEntry, ProviderBinding, ProviderModel};
pub use tenant::{PoolId, TenantContext, Tier};

// [libs/gateway/models/src/provider.rs]
//! Provider/model binding and pricing entities.
//!
//! These are immutable once loaded at startup (or on an explicit config
//! reload) — nothing downstream mutates a `ProviderBinding` or
//! `PricingEntry` in place.

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

/// A concrete `(provider, model)` pair a binding resolves to.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderModel {
    pub provider: String,
    pub model: String,
}

impl ProviderModel {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl std::fmt::Display for ProviderModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// Maps an agent name to an alias, and the alias to a `ProviderModel`.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderBinding {
    pub agent: String,
    pub alias: String,
    pub target: ProviderModel,
}

/// Pricing row for a single `(provider, model)` pair. All values are
/// non-negative integer micro-USD per million tokens.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PricingEntry {
    pub provider: String,
    pub model: String,
    pub input_micro_per_million: u64,
    pub output_micro_per_million: u64,
    pub reasoning_micro_per_million: Option<u64>,
    /// Monotonically increasing version stamped on every ledger entry
    /// priced from this row.
    pub price_table_version: u64,
}

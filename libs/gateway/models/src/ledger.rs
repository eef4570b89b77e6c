// [libs/gateway/models/src/ledger.rs]
//! The per-invocation ledger record and its billing-method taxonomy.

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

/// How a ledger entry's cost figures were derived.
#[typeshare]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillingMethod {
    /// Token counts came straight from the provider's response.
    ProviderReported,
    /// Token counts were reconciled against a local tokenizer estimate.
    Reconciled,
    /// Token counts came from an on-device/native runtime, not a remote call.
    NativeRuntime,
}

/// Usage counts for a single invocation, prior to pricing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub reasoning_tokens: u64,
}

/// Cost figures for a single invocation, already priced (§4.A).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_cost_micro: u64,
    pub output_cost_micro: u64,
    pub reasoning_cost_micro: u64,
}

impl CostBreakdown {
    pub fn total_micro(&self) -> u64 {
        self.input_cost_micro + self.output_cost_micro + self.reasoning_cost_micro
    }
}

/// `schema_version = 2` per-invocation ledger record (§3 `LedgerEntryV2`).
///
/// Cost fields are serialized as decimal strings (non-negative integers,
/// bounded by 2^53 - 1) to avoid float rounding at the JSON boundary — the
/// `#[serde(with = ...)]` helpers below implement that wire convention while
/// keeping the in-memory representation a plain `u64`.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntryV2 {
    #[serde(default = "schema_version_2")]
    pub schema_version: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub trace_id: String,
    pub agent: String,
    pub provider: String,
    pub model: String,
    pub project_id: String,
    pub phase_id: Option<String>,
    pub sprint_id: Option<String>,
    pub tenant_id: String,
    pub nft_id: Option<String>,
    pub pool_id: Option<String>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub reasoning_tokens: u64,
    #[serde(with = "micro_as_string")]
    pub input_cost_micro: u64,
    #[serde(with = "micro_as_string")]
    pub output_cost_micro: u64,
    #[serde(with = "micro_as_string")]
    pub reasoning_cost_micro: u64,
    #[serde(with = "micro_as_string")]
    pub total_cost_micro: u64,
    pub price_table_version: u64,
    pub billing_method: BillingMethod,
    pub latency_ms: u64,
    pub crc32: u32,
}

fn schema_version_2() -> u32 {
    2
}

/// Decimal-string (de)serialization for cost fields, per §3's JSON-boundary
/// precision note ("to avoid 64-bit float rounding").
mod micro_as_string {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u64>().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_micro_sums_breakdown() {
        let breakdown = CostBreakdown {
            input_cost_micro: 1250,
            output_cost_micro: 2000,
            reasoning_cost_micro: 0,
        };
        assert_eq!(breakdown.total_micro(), 3250);
    }

    #[test]
    fn cost_fields_round_trip_as_decimal_strings() {
        let entry = LedgerEntryV2 {
            schema_version: 2,
            timestamp: chrono::Utc::now(),
            trace_id: "t-1".into(),
            agent: "translator".into(),
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            project_id: "P".into(),
            phase_id: Some("H".into()),
            sprint_id: Some("S".into()),
            tenant_id: "tenant-1".into(),
            nft_id: None,
            pool_id: Some("fast-code".into()),
            prompt_tokens: 500,
            completion_tokens: 200,
            reasoning_tokens: 0,
            input_cost_micro: 1250,
            output_cost_micro: 2000,
            reasoning_cost_micro: 0,
            total_cost_micro: 3250,
            price_table_version: 1,
            billing_method: BillingMethod::ProviderReported,
            latency_ms: 412,
            crc32: 0,
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["total_cost_micro"], "3250");

        let round_tripped: LedgerEntryV2 = serde_json::from_value(json).unwrap();
        assert_eq!(round_tripped.total_cost_micro, 3250);
    }
}

// [libs/gateway/pricing/src/lib.rs]
/*!
 * =================================================================
 * APARATO: PRICING & COST ARITHMETIC ENGINE (V1.0)
 * CLASIFICACIÓN: DOMAIN LOGIC (ESTRATO L2)
 * RESPONSABILIDAD: ARITMÉTICA ENTERA DE MICRO-USD
 *
 * Every cost computed here is an integer micro-USD amount. Floating point
 * never touches a billing figure — the remainder of each division is
 * tracked explicitly and folded back in once it accumulates to a whole
 * micro-unit, so repeated small requests never silently lose fractions of
 * a cent over the life of a tenant.
 * =================================================================
 */

use hounfour_gateway_models::MAX_SAFE_INTEGER;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::warn;

/// A per-request cost ceiling: $1000, expressed in micro-USD.
pub const MAX_REQUEST_COST_MICRO: u64 = 1_000_000_000;

const MICRO_PER_UNIT: u128 = 1_000_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PricingError {
    #[error("BUDGET_OVERFLOW: {tokens} tokens at {price_micro_per_million} micro/M exceeds the safe-integer bound")]
    Overflow {
        tokens: u64,
        price_micro_per_million: u64,
    },
    #[error("REQUEST_COST_CEILING_EXCEEDED: total cost {total_micro} exceeds MAX_REQUEST_COST_MICRO ({MAX_REQUEST_COST_MICRO})")]
    RequestCeilingExceeded { total_micro: u64 },
}

/// Result of pricing a single token count against a per-million rate: the
/// floored micro-USD cost, plus the division remainder in `[0, 10^6)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricedAmount {
    pub micro: u64,
    pub remainder: u64,
}

/// `cost_micro(tokens, price) = floor(tokens * price / 10^6)` (§4.A), with
/// the remainder returned alongside for a `RemainderAccumulator` to track.
pub fn cost_micro(tokens: u64, price_micro_per_million: u64) -> Result<PricedAmount, PricingError> {
    let product = tokens as u128 * price_micro_per_million as u128;
    if product > MAX_SAFE_INTEGER as u128 {
        return Err(PricingError::Overflow {
            tokens,
            price_micro_per_million,
        });
    }
    Ok(PricedAmount {
        micro: (product / MICRO_PER_UNIT) as u64,
        remainder: (product % MICRO_PER_UNIT) as u64,
    })
}

/// Three-way breakdown (input/output/reasoning) for a single invocation,
/// with the total cost checked against `MAX_REQUEST_COST_MICRO`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PricedUsage {
    pub input_micro: u64,
    pub output_micro: u64,
    pub reasoning_micro: u64,
    pub input_remainder: u64,
    pub output_remainder: u64,
    pub reasoning_remainder: u64,
}

impl PricedUsage {
    pub fn total_micro(&self) -> u64 {
        self.input_micro + self.output_micro + self.reasoning_micro
    }
}

#[allow(clippy::too_many_arguments)]
pub fn price_usage(
    prompt_tokens: u64,
    completion_tokens: u64,
    reasoning_tokens: u64,
    input_rate: u64,
    output_rate: u64,
    reasoning_rate: u64,
) -> Result<PricedUsage, PricingError> {
    let input = cost_micro(prompt_tokens, input_rate)?;
    let output = cost_micro(completion_tokens, output_rate)?;
    let reasoning = cost_micro(reasoning_tokens, reasoning_rate)?;

    let usage = PricedUsage {
        input_micro: input.micro,
        output_micro: output.micro,
        reasoning_micro: reasoning.micro,
        input_remainder: input.remainder,
        output_remainder: output.remainder,
        reasoning_remainder: reasoning.remainder,
    };

    let total = usage.total_micro();
    if total > MAX_REQUEST_COST_MICRO {
        return Err(PricingError::RequestCeilingExceeded { total_micro: total });
    }

    Ok(usage)
}

/// Aggregates sub-micro remainders per scope key and emits an extra
/// micro-unit once the accumulated sum reaches a whole one (§4.A).
pub struct RemainderAccumulator {
    moduli: Mutex<HashMap<String, u64>>,
}

impl Default for RemainderAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl RemainderAccumulator {
    pub fn new() -> Self {
        Self {
            moduli: Mutex::new(HashMap::new()),
        }
    }

    /// Folds `remainder` into the running total for `scope`, returning any
    /// whole micro-units that should be added to the scope's recorded cost.
    pub fn accumulate(&self, scope: &str, remainder: u64) -> u64 {
        let mut moduli = self.moduli.lock().expect("remainder accumulator lock poisoned");
        let entry = moduli.entry(scope.to_string()).or_insert(0);
        *entry += remainder;

        let extra_units = *entry / MICRO_PER_UNIT as u64;
        *entry %= MICRO_PER_UNIT as u64;

        if extra_units > 0 {
            warn!(scope, extra_units, "remainder accumulator folded sub-micro drift into a whole unit");
        }

        extra_units
    }

    pub fn current_modulus(&self, scope: &str) -> u64 {
        self.moduli
            .lock()
            .expect("remainder accumulator lock poisoned")
            .get(scope)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_invocation_pricing_matches_scenario_one() {
        let usage = price_usage(500, 200, 0, 2_500_000, 10_000_000, 0).unwrap();
        assert_eq!(usage.input_micro, 1250);
        assert_eq!(usage.output_micro, 2000);
        assert_eq!(usage.total_micro(), 3250);
    }

    #[test]
    fn overflow_is_rejected() {
        let err = cost_micro(u64::MAX, u64::MAX).unwrap_err();
        assert!(matches!(err, PricingError::Overflow { .. }));
    }

    #[test]
    fn request_ceiling_rejects_extreme_usage() {
        let err = price_usage(1_000_000_000, 0, 0, 10_000_000, 0, 0).unwrap_err();
        assert!(matches!(err, PricingError::RequestCeilingExceeded { .. }));
    }

    #[test]
    fn remainder_accumulator_emits_whole_unit_once_threshold_crossed() {
        let acc = RemainderAccumulator::new();
        let scope = "project:P";
        let mut total_extra = 0u64;
        for _ in 0..4 {
            total_extra += acc.accumulate(scope, 300_000);
        }
        // 4 * 300_000 = 1_200_000 -> exactly one whole unit folded in, 200_000 left over.
        assert_eq!(total_extra, 1);
        assert_eq!(acc.current_modulus(scope), 200_000);
    }

    proptest::proptest! {
        #[test]
        fn cost_micro_never_exceeds_floor_division(tokens in 0u64..1_000_000, price in 0u64..10_000_000) {
            if let Ok(priced) = cost_micro(tokens, price) {
                let expected = (tokens as u128 * price as u128) / 1_000_000;
                proptest::prop_assert_eq!(priced.micro as u128, expected);
                proptest::prop_assert!(priced.remainder < 1_000_000);
            }
        }
    }
}

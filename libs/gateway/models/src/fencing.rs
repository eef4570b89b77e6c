// [libs/gateway/models/src/fencing.rs]
//! Fencing token type (§3 `FencingToken`, §4.L).

use serde::{Deserialize, Serialize};

/// Largest integer value that round-trips exactly through an IEEE-754
/// double — the same bound the spec calls the "safe-integer bound".
pub const MAX_SAFE_INTEGER: u64 = (1u64 << 53) - 1;

/// A monotonically increasing token issued per-environment alongside a
/// distributed lock. Only values within `[0, MAX_SAFE_INTEGER]` are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FencingToken(u64);

impl FencingToken {
    pub fn new(value: u64) -> Option<Self> {
        (value <= MAX_SAFE_INTEGER).then_some(Self(value))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for FencingToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

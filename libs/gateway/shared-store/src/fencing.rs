// [libs/gateway/shared-store/src/fencing.rs]
//! CAS outcome for `SharedStore::fence_validate_and_advance` (§4.L, §8 scenario 7).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceOutcome {
    /// Strictly greater than the last accepted token; now the new last-accepted.
    Ok,
    /// Equal to or lower than the last accepted token.
    Stale,
    /// Stored "last accepted" value is non-numeric or exceeds the safe-integer bound.
    Corrupt,
}

// [libs/gateway/models/src/budget.rs]
//! Budget scope keys and snapshot reporting.

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

/// A hierarchical budget identifier: `project:P[:phase:H[:sprint:S]]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey(String);

impl ScopeKey {
    pub fn project(project_id: &str) -> Self {
        Self(format!("project:{project_id}"))
    }

    pub fn phase(project_id: &str, phase_id: &str) -> Self {
        Self(format!("project:{project_id}:phase:{phase_id}"))
    }

    pub fn sprint(project_id: &str, phase_id: &str, sprint_id: &str) -> Self {
        Self(format!(
            "project:{project_id}:phase:{phase_id}:sprint:{sprint_id}"
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// All scopes a recorded cost increments atomically: project, then
    /// project+phase (if present), then project+phase+sprint (if present).
    /// Order matters only for logging — counters are updated independently.
    pub fn hierarchy(project_id: &str, phase_id: Option<&str>, sprint_id: Option<&str>) -> Vec<ScopeKey> {
        let mut scopes = vec![Self::project(project_id)];
        if let Some(phase) = phase_id {
            scopes.push(Self::phase(project_id, phase));
            if let Some(sprint) = sprint_id {
                scopes.push(Self::sprint(project_id, phase, sprint));
            }
        }
        scopes
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time view of a scope's spend against its configured limit.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub scope_key: String,
    pub spent_micro: u64,
    pub limit_micro: u64,
    pub percent_used: f64,
    pub warning: bool,
    pub exceeded: bool,
}

impl BudgetSnapshot {
    pub fn compute(scope_key: &ScopeKey, spent_micro: u64, limit_micro: u64, warn_percent: f64) -> Self {
        let percent_used = if limit_micro == 0 {
            0.0
        } else {
            (spent_micro as f64 / limit_micro as f64) * 100.0
        };
        Self {
            scope_key: scope_key.as_str().to_string(),
            spent_micro,
            limit_micro,
            percent_used,
            warning: limit_micro > 0 && percent_used >= warn_percent,
            exceeded: limit_micro > 0 && spent_micro > limit_micro,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_expands_to_all_present_levels() {
        let scopes = ScopeKey::hierarchy("P", Some("H"), Some("S"));
        let rendered: Vec<_> = scopes.iter().map(ScopeKey::as_str).collect();
        assert_eq!(
            rendered,
            vec!["project:P", "project:P:phase:H", "project:P:phase:H:sprint:S"]
        );
    }

    #[test]
    fn hierarchy_stops_at_project_when_phase_absent() {
        let scopes = ScopeKey::hierarchy("P", None, None);
        assert_eq!(scopes.len(), 1);
    }

    #[test]
    fn snapshot_flags_exceeded_and_warning() {
        let scope = ScopeKey::project("P");
        let snap = BudgetSnapshot::compute(&scope, 999_500, 1_000_000, 80.0);
        assert!(snap.warning);
        assert!(!snap.exceeded);

        let snap2 = BudgetSnapshot::compute(&scope, 1_000_001, 1_000_000, 80.0);
        assert!(snap2.exceeded);
    }
}

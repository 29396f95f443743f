//! Task-level error taxonomy (§7): every terminal failure carries a
//! kind, a short human summary, and the id of the event with full
//! diagnostics - never just a bare string.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// LLM or store transport error, already retried up to the policy
    /// limit at its own layer.
    Transport,
    /// Agent output failed schema validation.
    Schema,
    /// Path constraint, diff size cap, or blocked path violated.
    Policy,
    /// Diff parse/apply/conflict.
    Apply,
    /// CI reported failure after attempts were exhausted.
    Ci,
    /// Breakdown cycle, missing decomposition, or unresolved aggregation
    /// conflict.
    Orchestration,
    Cancellation,
    Timeout,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Transport => "transport",
            Self::Schema => "schema",
            Self::Policy => "policy",
            Self::Apply => "apply",
            Self::Ci => "ci",
            Self::Orchestration => "orchestration",
            Self::Cancellation => "cancellation",
            Self::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// A terminal task failure (§7 User-visible surface).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub summary: String,
    pub event_id: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, summary: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            kind,
            summary: summary.into(),
            event_id: event_id.into(),
        }
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} (see event {})", self.kind, self.summary, self.event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_summary_and_event_reference() {
        let failure = TaskFailure::new(FailureKind::Policy, "path blocked", "evt-1");
        assert_eq!(failure.to_string(), "policy: path blocked (see event evt-1)");
    }
}

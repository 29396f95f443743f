//! Per-task session memory: the mutable working state an agent pipeline
//! accumulates as it drives one task through the state machine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskstore::{IndexValue, Record, now_ms};

/// A single review comment left by the reviewer agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewComment {
    pub file: String,
    pub line: Option<u32>,
    pub severity: String,
    pub comment: String,
}

/// Task-facing context carried across iterations: everything an agent
/// might need to read about the ticket, the plan, and the code so far.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionContext {
    pub issue_number: Option<u64>,
    pub issue_title: Option<String>,
    pub issue_body: Option<String>,
    #[serde(default)]
    pub target_files: Vec<String>,
    #[serde(default)]
    pub definition_of_done: Vec<String>,
    #[serde(default)]
    pub plan: Vec<String>,
    pub current_diff: Option<String>,
    #[serde(default)]
    pub review_comments: Vec<ReviewComment>,
    pub review_verdict: Option<String>,
}

/// Outcome recorded for one fix/retry attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    TestsFailed,
    ReviewRejected,
    SchemaError,
    PolicyViolation,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub outcome: AttemptOutcome,
    pub failure_reason: Option<String>,
    pub diff: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AttemptsState {
    pub current: u32,
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
    #[serde(default)]
    pub failure_patterns: Vec<String>,
}

impl AttemptsState {
    pub fn record(&mut self, outcome: AttemptOutcome, failure_reason: Option<String>, diff: Option<String>) {
        if let Some(reason) = &failure_reason
            && !self.failure_patterns.iter().any(|p| p == reason)
        {
            self.failure_patterns.push(reason.clone());
        }
        self.attempts.push(AttemptRecord {
            outcome,
            failure_reason,
            diff,
        });
    }
}

/// Raw JSON outputs captured from each agent call, for audit and for
/// feeding a later agent (e.g. the fixer reading the coder's output).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentOutputs {
    pub planner: Option<Value>,
    pub coder: Option<Value>,
    pub fixer: Option<Value>,
    pub validator: Option<Value>,
    pub reviewer: Option<Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

/// One child subtask tracked on the parent's [`OrchestrationState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskState {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub target_files: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub status: SubtaskStatus,
    pub child_task_id: Option<String>,
    pub diff: Option<String>,
    pub attempts: u32,
}

/// Embedded on a parent task's session memory only. Children never carry
/// a copy of this - they are looked up by id via the store, not
/// referenced here by value.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrchestrationState {
    pub subtasks: Vec<SubtaskState>,
    pub current_subtask: Option<String>,
    #[serde(default)]
    pub completed_subtasks: Vec<String>,
    pub aggregated_diff: Option<String>,
}

impl OrchestrationState {
    /// `dependsOn` references only subtasks of the same parent, and the
    /// dependency graph is acyclic - checked once at breakdown time.
    pub fn validate_acyclic(&self) -> bool {
        let ids: std::collections::HashSet<&str> = self.subtasks.iter().map(|s| s.id.as_str()).collect();
        for s in &self.subtasks {
            if s.depends_on.iter().any(|d| !ids.contains(d.as_str())) {
                return false;
            }
        }
        let mut visiting = std::collections::HashSet::new();
        let mut visited = std::collections::HashSet::new();
        fn visit<'a>(
            id: &'a str,
            by_id: &HashMap<&'a str, &'a SubtaskState>,
            visiting: &mut std::collections::HashSet<&'a str>,
            visited: &mut std::collections::HashSet<&'a str>,
        ) -> bool {
            if visited.contains(id) {
                return true;
            }
            if !visiting.insert(id) {
                return false;
            }
            if let Some(node) = by_id.get(id) {
                for dep in &node.depends_on {
                    if !visit(dep.as_str(), by_id, visiting, visited) {
                        return false;
                    }
                }
            }
            visiting.remove(id);
            visited.insert(id);
            true
        }
        let by_id: HashMap<&str, &SubtaskState> = self.subtasks.iter().map(|s| (s.id.as_str(), s)).collect();
        self.subtasks
            .iter()
            .all(|s| visit(s.id.as_str(), &by_id, &mut visiting, &mut visited))
    }

    pub fn all_completed(&self) -> bool {
        !self.subtasks.is_empty() && self.subtasks.iter().all(|s| s.status == SubtaskStatus::Completed)
    }

    pub fn any_failed(&self) -> bool {
        self.subtasks.iter().any(|s| s.status == SubtaskStatus::Failed)
    }

    /// Subtasks whose `dependsOn` set is entirely `Completed` and which are
    /// themselves still `Pending` - the runnable-children rule in §5.
    pub fn runnable(&self) -> Vec<&SubtaskState> {
        let completed: std::collections::HashSet<&str> = self
            .subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Completed)
            .map(|s| s.id.as_str())
            .collect();
        self.subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Pending)
            .filter(|s| s.depends_on.iter().all(|d| completed.contains(d.as_str())))
            .collect()
    }
}

/// Per-task mutable memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMemory {
    pub task_id: String,
    pub phase: String,
    #[serde(default)]
    pub context: SessionContext,
    #[serde(default)]
    pub attempts: AttemptsState,
    #[serde(default)]
    pub outputs: AgentOutputs,
    /// Present only on parent (orchestrated) tasks.
    pub orchestration: Option<OrchestrationState>,
    /// Present only on child tasks.
    pub subtask_id: Option<String>,
    pub parent_session_id: Option<String>,
    pub updated_at: i64,
}

impl SessionMemory {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            phase: "new".to_string(),
            context: SessionContext::default(),
            attempts: AttemptsState::default(),
            outputs: AgentOutputs::default(),
            orchestration: None,
            subtask_id: None,
            parent_session_id: None,
            updated_at: now_ms(),
        }
    }

    pub fn new_child(task_id: impl Into<String>, parent_session_id: impl Into<String>, subtask_id: impl Into<String>) -> Self {
        let mut s = Self::new(task_id);
        s.parent_session_id = Some(parent_session_id.into());
        s.subtask_id = Some(subtask_id.into());
        s
    }

    pub fn is_child(&self) -> bool {
        self.parent_session_id.is_some()
    }

    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }
}

impl Record for SessionMemory {
    fn id(&self) -> &str {
        &self.task_id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "session_memory"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("phase".to_string(), IndexValue::Str(self.phase.clone()));
        fields.insert("is_child".to_string(), IndexValue::Bool(self.is_child()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(id: &str, deps: &[&str]) -> SubtaskState {
        SubtaskState {
            id: id.to_string(),
            title: id.to_string(),
            target_files: vec![],
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            status: SubtaskStatus::Pending,
            child_task_id: None,
            diff: None,
            attempts: 0,
        }
    }

    #[test]
    fn acyclic_graph_passes() {
        let state = OrchestrationState {
            subtasks: vec![sub("a", &[]), sub("b", &["a"]), sub("c", &[])],
            ..Default::default()
        };
        assert!(state.validate_acyclic());
    }

    #[test]
    fn cyclic_graph_is_rejected() {
        let state = OrchestrationState {
            subtasks: vec![sub("a", &["b"]), sub("b", &["a"])],
            ..Default::default()
        };
        assert!(!state.validate_acyclic());
    }

    #[test]
    fn runnable_respects_dependencies() {
        let mut state = OrchestrationState {
            subtasks: vec![sub("a", &[]), sub("b", &["a"]), sub("c", &[])],
            ..Default::default()
        };
        let runnable_ids: Vec<&str> = state.runnable().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(runnable_ids, vec!["a", "c"]);

        state.subtasks[0].status = SubtaskStatus::Completed;
        let runnable_ids: Vec<&str> = state.runnable().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(runnable_ids, vec!["b", "c"]);
    }

    #[test]
    fn session_is_child_only_when_parent_set() {
        let parent = SessionMemory::new("task-parent");
        assert!(!parent.is_child());
        let child = SessionMemory::new_child("task-child", "task-parent", "subtask-1");
        assert!(child.is_child());
    }
}

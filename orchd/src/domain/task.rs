//! Task domain type and its status graph.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskstore::{IndexValue, Record, now_ms};
use uuid::Uuid;

/// Per-task status graph (§4.3). `Display` gives the lowercase wire form
/// used in events and indexed fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    New,
    Planning,
    PlanningDone,
    Coding,
    CodingDone,
    Testing,
    TestsPassed,
    TestsFailed,
    Fixing,
    Reviewing,
    ReviewApproved,
    ReviewRejected,
    PrCreated,
    WaitingHuman,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "NEW",
            Self::Planning => "PLANNING",
            Self::PlanningDone => "PLANNING_DONE",
            Self::Coding => "CODING",
            Self::CodingDone => "CODING_DONE",
            Self::Testing => "TESTING",
            Self::TestsPassed => "TESTS_PASSED",
            Self::TestsFailed => "TESTS_FAILED",
            Self::Fixing => "FIXING",
            Self::Reviewing => "REVIEWING",
            Self::ReviewApproved => "REVIEW_APPROVED",
            Self::ReviewRejected => "REVIEW_REJECTED",
            Self::PrCreated => "PR_CREATED",
            Self::WaitingHuman => "WAITING_HUMAN",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

impl TaskStatus {
    /// Tasks terminate in `COMPLETED`, `FAILED`, or `WAITING_HUMAN` (§3
    /// Lifecycle) - the last is a suspension the engine does not resume
    /// automatically, so it counts as terminal for scheduling purposes
    /// even though an external merge signal can later advance it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::WaitingHuman)
    }

    pub fn is_runnable(&self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EstimatedComplexity {
    Xs,
    S,
    M,
    L,
    Xl,
}

impl EstimatedComplexity {
    pub fn meets_orchestration_threshold(&self, threshold: EstimatedComplexity) -> bool {
        *self >= threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatedEffort {
    Trivial,
    Small,
    Medium,
    Large,
}

/// The unit of work for one ticket (§3 Data Model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub repo: String,
    pub issue_ref: String,
    pub status: TaskStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub parent_task_id: Option<String>,
    pub subtask_index: Option<u32>,
    pub is_orchestrated: bool,
    #[serde(default)]
    pub definition_of_done: Vec<String>,
    #[serde(default)]
    pub plan: Vec<String>,
    #[serde(default)]
    pub target_files: Vec<String>,
    pub branch_name: Option<String>,
    pub current_diff: Option<String>,
    pub commit_message: Option<String>,
    pub pr_ref: Option<String>,
    pub last_error: Option<String>,
    pub estimated_complexity: Option<EstimatedComplexity>,
    pub estimated_effort: Option<EstimatedEffort>,
    pub job_id: Option<String>,
    /// Optimistic-concurrency guard checked by `StateManager::update_task`
    /// (§4.4): a worker re-reads and retries its iteration on conflict.
    pub version: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    pub fn new(repo: impl Into<String>, issue_ref: impl Into<String>, max_attempts: u32) -> Self {
        let now = now_ms();
        Self {
            id: Uuid::now_v7().to_string(),
            repo: repo.into(),
            issue_ref: issue_ref.into(),
            status: TaskStatus::New,
            attempt_count: 0,
            max_attempts,
            parent_task_id: None,
            subtask_index: None,
            is_orchestrated: false,
            definition_of_done: Vec::new(),
            plan: Vec::new(),
            target_files: Vec::new(),
            branch_name: None,
            current_diff: None,
            commit_message: None,
            pr_ref: None,
            last_error: None,
            estimated_complexity: None,
            estimated_effort: None,
            job_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a child task for the given parent and subtask index. Per the
    /// isolation contract (§3 Ownership, §4.6 step 4) a child never
    /// carries parent plan/DoD/target-file data beyond what the
    /// orchestrator explicitly copies in here.
    pub fn new_child(
        parent: &Task,
        subtask_index: u32,
        target_files: Vec<String>,
        definition_of_done: Vec<String>,
    ) -> Self {
        let mut child = Self::new(parent.repo.clone(), parent.issue_ref.clone(), parent.max_attempts);
        child.parent_task_id = Some(parent.id.clone());
        child.subtask_index = Some(subtask_index);
        child.target_files = target_files;
        child.definition_of_done = definition_of_done;
        child.job_id = parent.job_id.clone();
        child
    }

    pub fn is_child(&self) -> bool {
        self.parent_task_id.is_some()
    }

    pub fn touch(&mut self) {
        self.updated_at = now_ms();
        self.version += 1;
    }
}

impl Record for Task {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "tasks"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::Str(self.status.to_string()));
        fields.insert("repo".to_string(), IndexValue::Str(self.repo.clone()));
        fields.insert("is_orchestrated".to_string(), IndexValue::Bool(self.is_orchestrated));
        if let Some(parent) = &self.parent_task_id {
            fields.insert("parent_task_id".to_string(), IndexValue::Str(parent.clone()));
        }
        if let Some(job_id) = &self.job_id {
            fields.insert("job_id".to_string(), IndexValue::Str(job_id.clone()));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_include_waiting_human() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::WaitingHuman.is_terminal());
        assert!(!TaskStatus::Coding.is_terminal());
    }

    #[test]
    fn complexity_ordering_drives_threshold_check() {
        assert!(EstimatedComplexity::L.meets_orchestration_threshold(EstimatedComplexity::M));
        assert!(!EstimatedComplexity::S.meets_orchestration_threshold(EstimatedComplexity::M));
    }

    #[test]
    fn child_task_inherits_repo_and_issue_but_not_plan() {
        let mut parent = Task::new("acme/widgets", "issues/42", 3);
        parent.plan = vec!["do the thing".into()];
        parent.job_id = Some("job-1".into());

        let child = Task::new_child(&parent, 0, vec!["src/lib.rs".into()], vec!["compiles".into()]);
        assert_eq!(child.repo, parent.repo);
        assert_eq!(child.parent_task_id, Some(parent.id.clone()));
        assert!(child.plan.is_empty());
        assert_eq!(child.job_id, parent.job_id);
    }
}

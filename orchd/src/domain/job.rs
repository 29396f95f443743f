//! Job domain type. Status is always derived from member tasks - see
//! [`crate::job_controller`] for the pure function that computes it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskstore::{IndexValue, Record, now_ms};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Partial,
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Partial => "partial",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobSummary {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub in_progress: u32,
    #[serde(default)]
    pub prs: Vec<String>,
}

/// An operator-requested batch of tasks against one repo. Owns its
/// tasks' identities, never their state (§3 Ownership).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub repo: String,
    pub status: JobStatus,
    #[serde(default)]
    pub task_ids: Vec<String>,
    #[serde(default)]
    pub summary: JobSummary,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Job {
    pub fn new(repo: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: Uuid::now_v7().to_string(),
            repo: repo.into(),
            status: JobStatus::Pending,
            task_ids: Vec::new(),
            summary: JobSummary::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_task(&mut self, task_id: impl Into<String>) {
        self.task_ids.push(task_id.into());
        self.summary.total = self.task_ids.len() as u32;
        self.updated_at = now_ms();
    }
}

impl Record for Job {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "jobs"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::Str(self.status.to_string()));
        fields.insert("repo".to_string(), IndexValue::Str(self.repo.clone()));
        fields
    }
}

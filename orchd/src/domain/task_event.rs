//! The append-only audit trail for a task (§4.1 Event Log).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskstore::{IndexValue, Record, now_ms};
use uuid::Uuid;

/// The vocabulary of recorded task activity. Closed so the event log
/// never carries a stringly-typed type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskEventType {
    TaskCreated,
    PlanProduced,
    OrchestrationStarted,
    ChildCreated,
    ChildCompleted,
    ChildFailed,
    DiffProduced,
    DiffAggregated,
    ConflictReport,
    CiRequested,
    CiPassed,
    CiFailed,
    ReviewRequested,
    ReviewApproved,
    ReviewRejected,
    ReviewDowngraded,
    PrOpened,
    Merged,
    AttemptExhausted,
    TaskFailed,
    TaskCancelled,
}

impl std::fmt::Display for TaskEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One append-only entry in a task's event log. `(task_id, created_at,
/// id)` is strictly increasing within a task (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: String,
    pub task_id: String,
    pub event_type: TaskEventType,
    pub agent: Option<String>,
    pub input_summary: Option<String>,
    pub output_summary: Option<String>,
    pub tokens_used: Option<u64>,
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: i64,
}

impl TaskEvent {
    pub fn new(task_id: impl Into<String>, event_type: TaskEventType) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            task_id: task_id.into(),
            event_type,
            agent: None,
            input_summary: None,
            output_summary: None,
            tokens_used: None,
            duration_ms: None,
            metadata: Value::Null,
            created_at: now_ms(),
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_output_summary(mut self, summary: impl Into<String>) -> Self {
        self.output_summary = Some(summary.into());
        self
    }

    pub fn with_metrics(mut self, tokens_used: u64, duration_ms: u64) -> Self {
        self.tokens_used = Some(tokens_used);
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

impl Record for TaskEvent {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.created_at
    }

    fn collection_name() -> &'static str {
        "task_events"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("task_id".to_string(), IndexValue::Str(self.task_id.clone()));
        fields.insert("event_type".to_string(), IndexValue::Str(self.event_type.to_string()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_methods_set_expected_fields() {
        let event = TaskEvent::new("task-1", TaskEventType::DiffProduced)
            .with_agent("coder")
            .with_output_summary("12 lines changed")
            .with_metrics(500, 1200);

        assert_eq!(event.agent.as_deref(), Some("coder"));
        assert_eq!(event.tokens_used, Some(500));
        assert_eq!(event.duration_ms, Some(1200));
    }
}

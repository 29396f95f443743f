//! Command vocabulary accepted by the [`super::StateManager`] actor, and
//! the error type its replies carry.

use taskstore::{Cursor, StoreError};
use tokio::sync::oneshot;

use crate::domain::{Job, JobStatus, Task, TaskEvent, TaskStatus};
use contextstore::{SessionMemory, StaticMemory};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("version conflict on task {task_id}: expected {expected}, found {actual}")]
    VersionConflict { task_id: String, expected: u64, actual: u64 },

    #[error("state manager actor is gone")]
    ChannelError,
}

pub type StateResponse<T> = Result<T, StateError>;

/// Optional filters accepted by `ListTasks`. `None` means "don't filter
/// on this field".
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub repo: Option<String>,
    pub parent_task_id: Option<String>,
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub repo: Option<String>,
}

pub enum StateCommand {
    CreateJob {
        job: Job,
        reply: oneshot::Sender<StateResponse<Job>>,
    },
    GetJob {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<Job>>>,
    },
    UpdateJob {
        job: Job,
        reply: oneshot::Sender<StateResponse<Job>>,
    },
    ListJobs {
        filter: JobFilter,
        reply: oneshot::Sender<StateResponse<Vec<Job>>>,
    },

    CreateTask {
        task: Task,
        reply: oneshot::Sender<StateResponse<Task>>,
    },
    GetTask {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<Task>>>,
    },
    /// Optimistic-concurrency update (§4.4): `task.version` must match
    /// the version currently on disk or the command fails with
    /// `VersionConflict` and the caller re-reads and retries.
    UpdateTask {
        task: Task,
        reply: oneshot::Sender<StateResponse<Task>>,
    },
    ListTasks {
        filter: TaskFilter,
        reply: oneshot::Sender<StateResponse<Vec<Task>>>,
    },

    AppendEvent {
        event: TaskEvent,
        reply: oneshot::Sender<StateResponse<TaskEvent>>,
    },
    ListEvents {
        task_id: String,
        reply: oneshot::Sender<StateResponse<Vec<TaskEvent>>>,
    },
    ListEventsSince {
        cursor: Option<Cursor>,
        limit: usize,
        reply: oneshot::Sender<StateResponse<(Vec<TaskEvent>, Option<Cursor>)>>,
    },

    GetSessionMemory {
        task_id: String,
        reply: oneshot::Sender<StateResponse<Option<SessionMemory>>>,
    },
    PutSessionMemory {
        session: SessionMemory,
        reply: oneshot::Sender<StateResponse<()>>,
    },

    GetStaticMemory {
        repo: String,
        reply: oneshot::Sender<StateResponse<Option<StaticMemory>>>,
    },
    PutStaticMemory {
        memory: StaticMemory,
        reply: oneshot::Sender<StateResponse<()>>,
    },

    Shutdown,
}

//! StateManager - actor that owns the [`taskstore::Store`] instances
//! backing jobs, tasks, events, and memory records.
//!
//! Processes commands via a channel so every mutation is serialized
//! through a single task, giving the optimistic-concurrency check on
//! `UpdateTask` a consistent view without locking.

use std::path::Path;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use contextstore::{SessionMemory, StaticMemory};
use taskstore::{Cursor, Filter, FilterOp, IndexValue, Store};

use crate::domain::{Job, Task, TaskEvent};

use super::messages::{JobFilter, StateCommand, StateError, StateResponse, TaskFilter};

/// Handle to send commands to the StateManager actor.
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Spawn a new StateManager actor rooted at `store_path`.
    pub fn spawn(store_path: impl AsRef<Path>) -> Result<Self, taskstore::StoreError> {
        debug!(store_path = %store_path.as_ref().display(), "StateManager::spawn: called");
        let store = Store::open(store_path.as_ref())?;

        let job_count = store.rebuild_indexes::<Job>()?;
        let task_count = store.rebuild_indexes::<Task>()?;
        let event_count = store.rebuild_indexes::<TaskEvent>()?;
        let session_count = store.rebuild_indexes::<SessionMemory>()?;
        let static_count = store.rebuild_indexes::<StaticMemory>()?;
        debug!(
            job_count,
            task_count, event_count, session_count, static_count, "rebuilt indexes from durable log"
        );

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx));

        Ok(Self { tx })
    }

    pub async fn create_job(&self, job: Job) -> StateResponse<Job> {
        self.call(|reply| StateCommand::CreateJob { job, reply }).await
    }

    pub async fn get_job(&self, id: &str) -> StateResponse<Option<Job>> {
        self.call(|reply| StateCommand::GetJob { id: id.to_string(), reply }).await
    }

    pub async fn get_job_required(&self, id: &str) -> StateResponse<Job> {
        self.get_job(id).await?.ok_or_else(|| StateError::NotFound(format!("job {id}")))
    }

    pub async fn update_job(&self, job: Job) -> StateResponse<Job> {
        self.call(|reply| StateCommand::UpdateJob { job, reply }).await
    }

    pub async fn list_jobs(&self, filter: JobFilter) -> StateResponse<Vec<Job>> {
        self.call(|reply| StateCommand::ListJobs { filter, reply }).await
    }

    pub async fn create_task(&self, task: Task) -> StateResponse<Task> {
        self.call(|reply| StateCommand::CreateTask { task, reply }).await
    }

    pub async fn get_task(&self, id: &str) -> StateResponse<Option<Task>> {
        self.call(|reply| StateCommand::GetTask { id: id.to_string(), reply }).await
    }

    pub async fn get_task_required(&self, id: &str) -> StateResponse<Task> {
        self.get_task(id).await?.ok_or_else(|| StateError::NotFound(format!("task {id}")))
    }

    /// Fails with [`StateError::VersionConflict`] if `task.version` does
    /// not match the version currently on disk; the caller re-reads and
    /// retries (§4.4).
    pub async fn update_task(&self, task: Task) -> StateResponse<Task> {
        self.call(|reply| StateCommand::UpdateTask { task, reply }).await
    }

    pub async fn list_tasks(&self, filter: TaskFilter) -> StateResponse<Vec<Task>> {
        self.call(|reply| StateCommand::ListTasks { filter, reply }).await
    }

    pub async fn append_event(&self, event: TaskEvent) -> StateResponse<TaskEvent> {
        self.call(|reply| StateCommand::AppendEvent { event, reply }).await
    }

    pub async fn list_events(&self, task_id: &str) -> StateResponse<Vec<TaskEvent>> {
        self.call(|reply| StateCommand::ListEvents {
            task_id: task_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn list_events_since(&self, cursor: Option<Cursor>, limit: usize) -> StateResponse<(Vec<TaskEvent>, Option<Cursor>)> {
        self.call(|reply| StateCommand::ListEventsSince { cursor, limit, reply }).await
    }

    pub async fn get_session_memory(&self, task_id: &str) -> StateResponse<Option<SessionMemory>> {
        self.call(|reply| StateCommand::GetSessionMemory {
            task_id: task_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn put_session_memory(&self, session: SessionMemory) -> StateResponse<()> {
        self.call(|reply| StateCommand::PutSessionMemory { session, reply }).await
    }

    pub async fn get_static_memory(&self, repo: &str) -> StateResponse<Option<StaticMemory>> {
        self.call(|reply| StateCommand::GetStaticMemory {
            repo: repo.to_string(),
            reply,
        })
        .await
    }

    pub async fn put_static_memory(&self, memory: StaticMemory) -> StateResponse<()> {
        self.call(|reply| StateCommand::PutStaticMemory { memory, reply }).await
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(StateCommand::Shutdown).await;
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(build(reply_tx)).await.map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }
}

fn job_filters(filter: &JobFilter) -> Vec<Filter> {
    let mut filters = Vec::new();
    if let Some(status) = filter.status {
        filters.push(Filter::eq("status", IndexValue::Str(status.to_string())));
    }
    if let Some(repo) = &filter.repo {
        filters.push(Filter::eq("repo", IndexValue::Str(repo.clone())));
    }
    filters
}

fn task_filters(filter: &TaskFilter) -> Vec<Filter> {
    let mut filters = Vec::new();
    if let Some(status) = filter.status {
        filters.push(Filter::eq("status", IndexValue::Str(status.to_string())));
    }
    if let Some(repo) = &filter.repo {
        filters.push(Filter::eq("repo", IndexValue::Str(repo.clone())));
    }
    if let Some(parent) = &filter.parent_task_id {
        filters.push(Filter::eq("parent_task_id", IndexValue::Str(parent.clone())));
    }
    if let Some(job_id) = &filter.job_id {
        filters.push(Filter::eq("job_id", IndexValue::Str(job_id.clone())));
    }
    filters
}

async fn actor_loop(store: Store, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("StateManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::CreateJob { job, reply } => {
                let result = store.put(&job).map(|_| job).map_err(StateError::from);
                let _ = reply.send(result);
            }
            StateCommand::GetJob { id, reply } => {
                let result = store.get::<Job>(&id).map_err(StateError::from);
                let _ = reply.send(result);
            }
            StateCommand::UpdateJob { job, reply } => {
                let result = store.put(&job).map(|_| job).map_err(StateError::from);
                let _ = reply.send(result);
            }
            StateCommand::ListJobs { filter, reply } => {
                let result = store.list::<Job>(&job_filters(&filter)).map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::CreateTask { task, reply } => {
                let result = store.put(&task).map(|_| task).map_err(StateError::from);
                let _ = reply.send(result);
            }
            StateCommand::GetTask { id, reply } => {
                let result = store.get::<Task>(&id).map_err(StateError::from);
                let _ = reply.send(result);
            }
            StateCommand::UpdateTask { task, reply } => {
                let result = update_task(&store, task);
                let _ = reply.send(result);
            }
            StateCommand::ListTasks { filter, reply } => {
                let result = store.list::<Task>(&task_filters(&filter)).map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::AppendEvent { event, reply } => {
                let result = store.append(&event).map(|_| event).map_err(StateError::from);
                let _ = reply.send(result);
            }
            StateCommand::ListEvents { task_id, reply } => {
                let result = store
                    .list::<TaskEvent>(&[Filter::eq("task_id", IndexValue::Str(task_id))])
                    .map(|mut events| {
                        events.sort_by_key(|e| e.created_at);
                        events
                    })
                    .map_err(StateError::from);
                let _ = reply.send(result);
            }
            StateCommand::ListEventsSince { cursor, limit, reply } => {
                let result = store.list_since::<TaskEvent>(cursor.as_ref(), limit).map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::GetSessionMemory { task_id, reply } => {
                let result = store.get::<SessionMemory>(&task_id).map_err(StateError::from);
                let _ = reply.send(result);
            }
            StateCommand::PutSessionMemory { session, reply } => {
                let result = store.put(&session).map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::GetStaticMemory { repo, reply } => {
                let result = store.get::<StaticMemory>(&repo).map_err(StateError::from);
                let _ = reply.send(result);
            }
            StateCommand::PutStaticMemory { memory, reply } => {
                let result = store.put(&memory).map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::Shutdown => {
                debug!("StateManager actor shutting down");
                break;
            }
        }
    }
    warn!("StateManager actor loop exited");
}

fn update_task(store: &Store, mut task: Task) -> StateResponse<Task> {
    let current: Task = store
        .get(&task.id)?
        .ok_or_else(|| StateError::NotFound(format!("task {}", task.id)))?;
    if current.version != task.version {
        return Err(StateError::VersionConflict {
            task_id: task.id.clone(),
            expected: task.version,
            actual: current.version,
        });
    }
    task.touch();
    store.put(&task)?;
    Ok(task)
}

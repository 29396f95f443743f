//! Scheduler / worker pool (§4.4): a bounded pool of async workers that
//! repeatedly pulls *runnable* tasks and drives each one state edge
//! further. The Scheduler does not know what an iteration does — that is
//! the Orchestrator's job via the [`TaskIteration`] trait — it only
//! decides which tasks may run right now, bounds concurrency, enforces
//! timeouts and the wall-clock budget, and retries on optimistic-lock
//! conflicts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use contextstore::{OrchestrationState, SubtaskStatus};

use crate::domain::{Task, TaskSignal, apply};
use crate::state::{StateError, StateManager, TaskFilter};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub worker_concurrency: usize,
    pub agent_timeout: Duration,
    pub task_wall_clock_budget: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 4,
            agent_timeout: Duration::from_secs(120),
            task_wall_clock_budget: Duration::from_secs(3600),
        }
    }
}

/// One `compileContext → invokeAgent → validateOutput → applyTransition`
/// edge for a single task, supplied by the Orchestrator.
#[async_trait]
pub trait TaskIteration: Send + Sync {
    async fn run_iteration(&self, task: Task) -> IterationOutcome;

    /// The parent's orchestration state, needed to evaluate `dependsOn`
    /// for a child task. `None` for non-child tasks.
    async fn parent_orchestration(&self, task: &Task) -> Option<OrchestrationState>;
}

#[derive(Debug)]
pub enum IterationOutcome {
    /// The task advanced; reconsider it on the next sweep.
    Advanced,
    /// The task needs an external signal (CI, review, merge) before it
    /// can run again; the worker releases it without error.
    AwaitingExternalSignal,
    /// The task reached a terminal status.
    Terminal,
    /// The iteration failed; the failure reason is already recorded on
    /// the task/event log by the iteration itself.
    Failed,
}

/// True iff `task` may run right now: non-terminal, and - if it is a
/// child - every subtask it `dependsOn` has completed (§4.4, §4.6 step 3).
/// Does not account for worker ownership; that is the Scheduler's own
/// bookkeeping.
pub fn is_runnable(task: &Task, parent_orchestration: Option<&OrchestrationState>) -> bool {
    if task.status.is_terminal() {
        return false;
    }
    if !task.is_child() {
        return true;
    }
    let Some(orchestration) = parent_orchestration else {
        return false;
    };
    let Some(subtask) = orchestration
        .subtasks
        .iter()
        .find(|s| s.child_task_id.as_deref() == Some(task.id.as_str()))
    else {
        return false;
    };
    subtask.depends_on.iter().all(|dep_id| {
        orchestration
            .subtasks
            .iter()
            .find(|s| &s.id == dep_id)
            .is_some_and(|s| s.status == SubtaskStatus::Completed)
    })
}

/// Registry of per-task cooperative cancellation flags, checked between
/// agent calls. Setting a flag does not abort an in-flight LLM call; its
/// output is simply discarded on the next check (§4.4).
#[derive(Default, Clone)]
pub struct CancellationRegistry {
    flags: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
}

impl CancellationRegistry {
    pub async fn flag_for(&self, task_id: &str) -> Arc<AtomicBool> {
        let mut flags = self.flags.lock().await;
        flags.entry(task_id.to_string()).or_insert_with(|| Arc::new(AtomicBool::new(false))).clone()
    }

    pub async fn cancel(&self, task_id: &str) {
        self.flag_for(task_id).await.store(true, Ordering::SeqCst);
    }

    async fn is_cancelled(&self, task_id: &str) -> bool {
        self.flag_for(task_id).await.load(Ordering::SeqCst)
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    state: StateManager,
    iteration: Arc<dyn TaskIteration>,
    cancellation: CancellationRegistry,
    owned: Arc<Mutex<HashSet<String>>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, state: StateManager, iteration: Arc<dyn TaskIteration>) -> Self {
        Self {
            config,
            state,
            iteration,
            cancellation: CancellationRegistry::default(),
            owned: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn cancellation(&self) -> CancellationRegistry {
        self.cancellation.clone()
    }

    /// Pull every currently-runnable, not-yet-owned task, FIFO by
    /// `created_at`, and dispatch up to `worker_concurrency` of them
    /// concurrently. Returns once the dispatched batch has finished.
    pub async fn run_sweep(&self) -> Result<(), StateError> {
        let mut candidates = self.state.list_tasks(TaskFilter::default()).await?;
        candidates.sort_by_key(|t| t.created_at);

        let semaphore = Arc::new(Semaphore::new(self.config.worker_concurrency.max(1)));
        let mut handles = Vec::new();

        for task in candidates {
            {
                let mut owned = self.owned.lock().await;
                if owned.contains(&task.id) {
                    continue;
                }
                let parent_orchestration = self.iteration.parent_orchestration(&task).await;
                if !is_runnable(&task, parent_orchestration.as_ref()) {
                    continue;
                }
                owned.insert(task.id.clone());
            }

            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let owned = self.owned.clone();
            let state = self.state.clone();
            let iteration = self.iteration.clone();
            let cancellation = self.cancellation.clone();
            let config = self.config.clone();
            let task_id = task.id.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                run_one(&config, &state, iteration.as_ref(), &cancellation, task).await;
                owned.lock().await.remove(&task_id);
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }
}

async fn run_one(
    config: &SchedulerConfig,
    state: &StateManager,
    iteration: &dyn TaskIteration,
    cancellation: &CancellationRegistry,
    task: Task,
) {
    let task_id = task.id.clone();

    if cancellation.is_cancelled(&task_id).await {
        cancel_task(state, task).await;
        return;
    }

    let age = Duration::from_millis((taskstore::now_ms() - task.created_at).max(0) as u64);
    if age > config.task_wall_clock_budget {
        warn!(%task_id, ?age, "task exceeded wall-clock budget");
        fail_task(state, task, "task exceeded its wall-clock budget").await;
        return;
    }

    match tokio::time::timeout(config.agent_timeout, iteration.run_iteration(task)).await {
        Ok(IterationOutcome::Advanced | IterationOutcome::AwaitingExternalSignal | IterationOutcome::Terminal) => {
            debug!(%task_id, "iteration completed");
        }
        Ok(IterationOutcome::Failed) => {
            debug!(%task_id, "iteration reported failure");
        }
        Err(_) => {
            warn!(%task_id, timeout = ?config.agent_timeout, "agent invocation timed out");
        }
    }
}

async fn cancel_task(state: &StateManager, task: Task) {
    let task_id = task.id.clone();
    if let Ok(transition) = apply(task.status, TaskSignal::Cancelled, task.attempt_count, task.max_attempts) {
        let mut updated = task;
        updated.status = transition.next;
        if let Some(reason) = transition.failure_reason {
            updated.last_error = Some(reason);
        }
        if let Err(err) = state.update_task(updated).await {
            warn!(%task_id, %err, "failed to persist cancellation");
        }
    }
}

async fn fail_task(state: &StateManager, mut task: Task, reason: &str) {
    task.status = crate::domain::TaskStatus::Failed;
    task.last_error = Some(reason.to_string());
    let task_id = task.id.clone();
    if let Err(err) = state.update_task(task).await {
        warn!(%task_id, %err, "failed to persist wall-clock-budget failure");
    }
}

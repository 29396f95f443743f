//! The Orchestrator (§4.6): the `TaskIteration` the Scheduler drives.
//! Owns the `compileContext → invokeAgent → validateOutput →
//! applyTransition` cycle per `TaskStatus`, and the breakdown/aggregate
//! machinery for orchestrated (parent/child) tasks.

mod breakdown;
mod policy;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use contextstore::{compile, AgentType, CompileRequest, OrchestrationState, RepoConfig, SessionMemory, StaticMemory, SubtaskStatus};

use crate::collaborators::RepoHost;
use crate::config::Config;
use crate::diff::{aggregate, AggregationResult, SubtaskDiff};
use crate::domain::{apply, Task, TaskEvent, TaskEventType, TaskSignal, TaskStatus};
use crate::llm::schemas::{BreakdownOutput, CodeOutput, PlannerOutput, ReviewVerdict, ReviewerOutput, ValidatorOutput, ValidatorVerdict};
use crate::llm::Agent;
use crate::events::EventBus;
use crate::scheduler::{IterationOutcome, TaskIteration};
use crate::state::StateManager;

/// Every model-backed step the Orchestrator drives. Coder and Fixer
/// share one schema (`CodeOutput`) and one agent instance - only the
/// instruction text passed to `Agent::run` differs, mirroring §4.5's
/// "coder/fixer" shared output contract.
pub struct Orchestrator {
    state: StateManager,
    repo_host: Arc<dyn RepoHost>,
    events: Arc<EventBus>,
    config: Config,
    planner: Agent<PlannerOutput>,
    coder: Agent<CodeOutput>,
    validator: Agent<ValidatorOutput>,
    reviewer: Agent<ReviewerOutput>,
    breakdown_agent: Agent<BreakdownOutput>,
}

impl Orchestrator {
    pub fn new(
        state: StateManager,
        repo_host: Arc<dyn RepoHost>,
        events: Arc<EventBus>,
        config: Config,
        llm_client: Arc<dyn crate::llm::LlmClient>,
    ) -> Self {
        let model = config.llm.model.clone();
        Self {
            state,
            repo_host,
            events,
            config,
            planner: Agent::new(llm_client.clone(), model.clone()),
            coder: Agent::new(llm_client.clone(), model.clone()),
            validator: Agent::new(llm_client.clone(), model.clone()),
            reviewer: Agent::new(llm_client.clone(), model.clone()),
            breakdown_agent: Agent::new(llm_client, model),
        }
    }

    async fn session_for(&self, task: &Task) -> Result<SessionMemory, crate::state::StateError> {
        if let Some(session) = self.state.get_session_memory(&task.id).await? {
            return Ok(session);
        }
        let session = match &task.parent_task_id {
            Some(parent_id) => {
                let subtask_id = task
                    .subtask_index
                    .map(|i| format!("s{i}"))
                    .unwrap_or_else(|| task.id.clone());
                SessionMemory::new_child(task.id.clone(), parent_id.clone(), subtask_id)
            }
            None => SessionMemory::new(task.id.clone()),
        };
        Ok(session)
    }

    async fn static_for(&self, repo: &str) -> Result<StaticMemory, crate::state::StateError> {
        if let Some(memory) = self.state.get_static_memory(repo).await? {
            return Ok(memory);
        }
        let context = self.repo_host.get_repo_context(repo).await.ok();
        let config = RepoConfig {
            language: context.as_ref().map(|c| c.language.clone()).unwrap_or_default(),
            framework: context.as_ref().and_then(|c| c.framework.clone()),
            default_branch: context.map(|c| c.default_branch).unwrap_or_else(|| "main".to_string()),
        };
        let constraints = contextstore::Constraints {
            allowed_paths: self.config.allowed_paths.clone(),
            blocked_paths: self.config.blocked_paths.clone(),
            max_diff_lines: self.config.max_diff_lines,
            max_files_per_task: self.config.max_files_per_task,
        };
        let memory = StaticMemory::new(repo, config, constraints);
        self.state.put_static_memory(memory.clone()).await?;
        Ok(memory)
    }

    async fn emit(&self, event: TaskEvent) {
        let _ = self.state.append_event(event.clone()).await;
        self.events.emit(event);
    }

    /// Apply a signal and persist the resulting task row. Returns the
    /// transitioned task, or `None` on an optimistic-lock conflict (the
    /// caller should let the scheduler retry on the next sweep).
    async fn advance(&self, mut task: Task, signal: TaskSignal) -> Option<Task> {
        let transition = match apply(task.status, signal, task.attempt_count, task.max_attempts) {
            Ok(t) => t,
            Err(err) => {
                warn!(task_id = %task.id, %err, "orchestrator requested an invalid transition");
                return None;
            }
        };

        task.status = transition.next;
        if transition.increment_attempt {
            task.attempt_count += 1;
        }
        if transition.mark_orchestrated {
            task.is_orchestrated = true;
        }
        if let Some(reason) = &transition.failure_reason {
            task.last_error = Some(reason.clone());
        }
        if transition.reviewer_downgraded {
            self.emit(TaskEvent::new(task.id.clone(), TaskEventType::ReviewDowngraded)).await;
        }

        match self.state.update_task(task).await {
            Ok(updated) => Some(updated),
            Err(crate::state::StateError::VersionConflict { task_id, .. }) => {
                info!(%task_id, "version conflict applying transition, will retry next sweep");
                None
            }
            Err(err) => {
                warn!(%err, "failed to persist task transition");
                None
            }
        }
    }

    async fn handle_new(&self, task: Task) -> IterationOutcome {
        let task_id = task.id.clone();
        self.emit(TaskEvent::new(task_id.clone(), TaskEventType::TaskCreated)).await;
        match self.advance(task, TaskSignal::Scheduled).await {
            Some(_) => IterationOutcome::Advanced,
            None => IterationOutcome::Failed,
        }
    }

    async fn handle_planning(&self, task: Task) -> IterationOutcome {
        let Ok(static_memory) = self.static_for(&task.repo).await else {
            return IterationOutcome::Failed;
        };
        let Ok(session) = self.session_for(&task).await else {
            return IterationOutcome::Failed;
        };

        let context = compile(CompileRequest {
            agent_type: AgentType::Planner,
            static_memory: &static_memory,
            session: &session,
            repo_map: None,
            include: None,
        });

        let outcome = match self
            .planner
            .run(&context, "Produce a plan for this ticket: definition of done, step-by-step plan, target files, and an effort/complexity estimate.")
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => return self.fail_non_retryable(task, format!("planner call failed: {err}")).await,
        };

        let mut session = session;
        session.context.definition_of_done = outcome.output.definition_of_done.clone();
        session.context.plan = outcome.output.plan.clone();
        session.context.target_files = outcome.output.target_files.clone();
        session.touch();
        let _ = self.state.put_session_memory(session).await;

        let mut task = task;
        task.definition_of_done = outcome.output.definition_of_done;
        task.plan = outcome.output.plan;
        task.target_files = outcome.output.target_files;
        task.estimated_complexity = Some(outcome.output.estimated_complexity);
        task.estimated_effort = Some(outcome.output.estimated_effort);

        self.emit(
            TaskEvent::new(task.id.clone(), TaskEventType::PlanProduced)
                .with_agent("planner")
                .with_metrics(outcome.input_tokens + outcome.output_tokens, outcome.duration_ms),
        )
        .await;

        // Orchestration is advisory (§4.3): complexity must clear the
        // configured threshold *and* the planner must recommend it. A
        // task that is already a child is never allowed to orchestrate
        // further - the tree has no grandparents.
        let orchestrate = task.parent_task_id.is_none()
            && self.config.orchestration_enabled
            && outcome.output.should_breakdown
            && outcome
                .output
                .estimated_complexity
                .meets_orchestration_threshold(self.config.orchestration_complexity_threshold);

        match self.advance(task, TaskSignal::PlannerCompleted { orchestrate }).await {
            Some(_) => IterationOutcome::Advanced,
            None => IterationOutcome::Failed,
        }
    }

    async fn handle_planning_done(&self, task: Task) -> IterationOutcome {
        if !task.is_orchestrated {
            return match self.advance(task, TaskSignal::StartCoding).await {
                Some(_) => IterationOutcome::Advanced,
                None => IterationOutcome::Failed,
            };
        }

        let Ok(mut session) = self.session_for(&task).await else {
            return IterationOutcome::Failed;
        };

        if session.orchestration.is_none() {
            return self.run_breakdown(task, session).await;
        }

        // Orchestration already started: sync child progress and decide
        // whether to aggregate, propagate failure, or keep waiting.
        let mut orchestration = session.orchestration.take().unwrap();
        self.sync_children(&task, &mut orchestration).await;

        if orchestration.any_failed() {
            session.orchestration = Some(orchestration);
            session.touch();
            let _ = self.state.put_session_memory(session).await;
            return match self.fail_non_retryable(task, "child task exhausted its retry budget".to_string()).await {
                IterationOutcome::Failed => IterationOutcome::Failed,
                other => other,
            };
        }

        if !orchestration.all_completed() {
            session.orchestration = Some(orchestration);
            session.touch();
            let _ = self.state.put_session_memory(session).await;
            return IterationOutcome::AwaitingExternalSignal;
        }

        let subtask_diffs: Vec<SubtaskDiff> = orchestration
            .subtasks
            .iter()
            .map(|s| SubtaskDiff {
                subtask_id: s.id.clone(),
                diff: s.diff.clone().unwrap_or_default(),
            })
            .collect();

        let result = match aggregate(&subtask_diffs, self.config.conflict_strategy, self.config.auto_resolve_threshold) {
            Ok(result) => result,
            Err(err) => {
                session.orchestration = Some(orchestration);
                let _ = self.state.put_session_memory(session).await;
                return self.fail_non_retryable(task, format!("diff aggregation could not parse a child diff: {err}")).await;
            }
        };

        match result {
            AggregationResult::Aggregated { diff, .. } => {
                orchestration.aggregated_diff = Some(diff.clone());
                session.orchestration = Some(orchestration);
                session.context.current_diff = Some(diff.clone());
                session.touch();
                let _ = self.state.put_session_memory(session).await;

                self.emit(TaskEvent::new(task.id.clone(), TaskEventType::DiffAggregated)).await;

                let mut task = task;
                task.current_diff = Some(diff);
                task.commit_message = Some(format!("Aggregated changes for {}", task.issue_ref));
                match self.advance(task, TaskSignal::ChildrenAggregated).await {
                    Some(_) => IterationOutcome::Advanced,
                    None => IterationOutcome::Failed,
                }
            }
            AggregationResult::ManualRequired(report) => {
                session.orchestration = Some(orchestration);
                session.touch();
                let _ = self.state.put_session_memory(session).await;

                let conflict_summary = report
                    .conflicts
                    .iter()
                    .map(|c| format!("{}: {}", c.file, c.reason))
                    .collect::<Vec<_>>()
                    .join("; ");
                self.emit(
                    TaskEvent::new(task.id.clone(), TaskEventType::ConflictReport)
                        .with_output_summary(conflict_summary)
                        .with_metadata(serde_json::json!({ "conflict_count": report.conflicts.len() })),
                )
                .await;

                match self.advance(task, TaskSignal::OrchestrationConflict).await {
                    Some(_) => IterationOutcome::Terminal,
                    None => IterationOutcome::Failed,
                }
            }
        }
    }

    async fn run_breakdown(&self, task: Task, mut session: SessionMemory) -> IterationOutcome {
        let Ok(static_memory) = self.static_for(&task.repo).await else {
            return IterationOutcome::Failed;
        };

        let context = compile(CompileRequest {
            agent_type: AgentType::Planner,
            static_memory: &static_memory,
            session: &session,
            repo_map: None,
            include: None,
        });

        let outcome = self
            .breakdown_agent
            .run(
                &context,
                "Break this ticket into XS subtasks (at most 2 target files, 50 changed lines, 3 steps each) with an explicit, acyclic dependency graph.",
            )
            .await;

        let breakdown_output = match outcome {
            Ok(outcome) => outcome.output,
            Err(err) => {
                warn!(task_id = %task.id, %err, "breakdown call failed, falling back to monolithic coding");
                return self.fall_back_to_monolithic(task).await;
            }
        };

        if !breakdown_output.should_breakdown || breakdown_output.issues.is_empty() {
            return self.fall_back_to_monolithic(task).await;
        }

        let planned = breakdown::plan_subtasks(&task, &breakdown_output);
        let orchestration_state = breakdown::orchestration_state_for(&planned);
        if !orchestration_state.validate_acyclic() {
            warn!(task_id = %task.id, "breakdown produced a cyclic dependency graph, falling back to monolithic coding");
            return self.fall_back_to_monolithic(task).await;
        }

        session.orchestration = Some(orchestration_state);
        session.touch();
        if self.state.put_session_memory(session).await.is_err() {
            return IterationOutcome::Failed;
        }

        self.emit(TaskEvent::new(task.id.clone(), TaskEventType::OrchestrationStarted)).await;

        for planned_subtask in &planned {
            if self.state.create_task(planned_subtask.child.clone()).await.is_err() {
                continue;
            }
            let child_session = SessionMemory::new_child(
                planned_subtask.child.id.clone(),
                task.id.clone(),
                planned_subtask.subtask.id.clone(),
            );
            let _ = self.state.put_session_memory(child_session).await;
            self.emit(
                TaskEvent::new(task.id.clone(), TaskEventType::ChildCreated)
                    .with_output_summary(format!("child {} ({})", planned_subtask.child.id, planned_subtask.subtask.title)),
            )
            .await;
        }

        IterationOutcome::AwaitingExternalSignal
    }

    async fn fall_back_to_monolithic(&self, mut task: Task) -> IterationOutcome {
        task.is_orchestrated = false;
        match self.advance(task, TaskSignal::StartCoding).await {
            Some(_) => IterationOutcome::Advanced,
            None => IterationOutcome::Failed,
        }
    }

    /// Pull every child's current status/diff into the parent's
    /// `OrchestrationState`, requeuing a failed child as a fresh task if
    /// its subtask still has retry budget left (§4.6 step 7).
    async fn sync_children(&self, parent: &Task, orchestration: &mut OrchestrationState) {
        for subtask in &mut orchestration.subtasks {
            let Some(child_id) = subtask.child_task_id.clone() else { continue };
            let Ok(Some(child)) = self.state.get_task(&child_id).await else { continue };

            match child.status {
                TaskStatus::Completed => {
                    subtask.status = SubtaskStatus::Completed;
                    subtask.diff = child.current_diff.clone();
                }
                TaskStatus::Failed => {
                    if subtask.attempts < parent.max_attempts {
                        subtask.attempts += 1;
                        let mut replacement = Task::new_child(
                            parent,
                            child.subtask_index.unwrap_or(0),
                            subtask.target_files.clone(),
                            child.definition_of_done.clone(),
                        );
                        replacement.plan = child.plan.clone();
                        if self.state.create_task(replacement.clone()).await.is_ok() {
                            subtask.child_task_id = Some(replacement.id.clone());
                            subtask.status = SubtaskStatus::Pending;
                            self.emit(TaskEvent::new(parent.id.clone(), TaskEventType::ChildFailed)).await;
                        }
                    } else {
                        subtask.status = SubtaskStatus::Failed;
                        self.emit(TaskEvent::new(parent.id.clone(), TaskEventType::ChildFailed)).await;
                    }
                }
                TaskStatus::New => subtask.status = SubtaskStatus::Pending,
                _ => {
                    if subtask.status != SubtaskStatus::Completed {
                        subtask.status = SubtaskStatus::InProgress;
                    }
                }
            }
        }
    }

    async fn handle_coding(&self, task: Task) -> IterationOutcome {
        self.run_coder_or_fixer(task, AgentType::Coder, "Write the diff that implements the plan against the target files.")
            .await
    }

    async fn handle_fixing(&self, task: Task) -> IterationOutcome {
        self.run_coder_or_fixer(
            task,
            AgentType::Fixer,
            "The previous attempt failed. Using the failure reason and known failure patterns, produce a corrected diff.",
        )
        .await
    }

    async fn run_coder_or_fixer(&self, task: Task, agent_type: AgentType, instruction: &str) -> IterationOutcome {
        let Ok(static_memory) = self.static_for(&task.repo).await else {
            return IterationOutcome::Failed;
        };
        let Ok(mut session) = self.session_for(&task).await else {
            return IterationOutcome::Failed;
        };
        if let Some(reason) = &task.last_error {
            session.attempts.failure_patterns.retain(|p| p != reason);
            session.attempts.failure_patterns.push(reason.clone());
        }

        let context = compile(CompileRequest {
            agent_type,
            static_memory: &static_memory,
            session: &session,
            repo_map: None,
            include: None,
        });

        let outcome = match self.coder.run(&context, instruction).await {
            Ok(outcome) => outcome,
            Err(err) => return self.fail_non_retryable(task, format!("coder call failed: {err}")).await,
        };

        if let Err(reason) = policy::check(&outcome.output, &static_memory.constraints) {
            return self
                .fail_non_retryable(task, format!("generated diff violates repo policy: {reason}"))
                .await;
        }

        session.context.current_diff = Some(outcome.output.diff.clone());
        session.touch();
        let _ = self.state.put_session_memory(session).await;

        let mut task = task;
        task.current_diff = Some(outcome.output.diff);
        task.commit_message = Some(outcome.output.commit_message);
        task.target_files = outcome.output.files_modified;

        self.emit(
            TaskEvent::new(task.id.clone(), TaskEventType::DiffProduced)
                .with_agent(if agent_type == AgentType::Fixer { "fixer" } else { "coder" })
                .with_metrics(outcome.input_tokens + outcome.output_tokens, outcome.duration_ms),
        )
        .await;

        let signal = if agent_type == AgentType::Fixer {
            TaskSignal::FixerCompleted
        } else {
            TaskSignal::CoderCompleted
        };
        match self.advance(task, signal).await {
            Some(_) => IterationOutcome::Advanced,
            None => IterationOutcome::Failed,
        }
    }

    async fn handle_coding_done(&self, task: Task) -> IterationOutcome {
        let Ok(static_memory) = self.static_for(&task.repo).await else {
            return IterationOutcome::Failed;
        };
        let Ok(session) = self.session_for(&task).await else {
            return IterationOutcome::Failed;
        };
        let Some(diff) = task.current_diff.clone() else {
            return self.fail_non_retryable(task, "no diff to validate".to_string()).await;
        };

        let context = compile(CompileRequest {
            agent_type: AgentType::Validator,
            static_memory: &static_memory,
            session: &session,
            repo_map: None,
            include: None,
        });

        let outcome = match self.validator.run(&context, "Validate this diff: syntax, lint, type, and test checks.").await {
            Ok(outcome) => outcome,
            Err(err) => return self.fail_non_retryable(task, format!("validator call failed: {err}")).await,
        };

        if outcome.output.verdict == ValidatorVerdict::Invalid {
            let mut task = task;
            task.last_error = Some(outcome.output.feedback.join("; "));
            return match self.advance(task, TaskSignal::ValidatorInvalid).await {
                Some(_) => IterationOutcome::Advanced,
                None => IterationOutcome::Failed,
            };
        }

        let branch_name = task.branch_name.clone().unwrap_or_else(|| format!("orchd/{}", task.id));
        let default_branch = static_memory.config.default_branch.clone();
        if self.repo_host.create_branch(&task.repo, &branch_name, &default_branch).await.is_err() {
            return self.fail_non_retryable(task, "failed to create branch on code host".to_string()).await;
        }

        let commit_message = task.commit_message.clone().unwrap_or_else(|| task.issue_ref.clone());
        if self.repo_host.apply_diff(&task.repo, &branch_name, &diff, &commit_message).await.is_err() {
            let mut task = task;
            task.last_error = Some("diff failed to apply to branch".to_string());
            return match self.advance(task, TaskSignal::ValidatorInvalid).await {
                Some(_) => IterationOutcome::Advanced,
                None => IterationOutcome::Failed,
            };
        }

        self.emit(TaskEvent::new(task.id.clone(), TaskEventType::CiRequested)).await;

        let mut task = task;
        task.branch_name = Some(branch_name);
        match self.advance(task, TaskSignal::DiffApplied).await {
            Some(_) => IterationOutcome::Advanced,
            None => IterationOutcome::Failed,
        }
    }

    async fn handle_testing(&self, task: Task) -> IterationOutcome {
        let Some(branch) = task.branch_name.clone() else {
            return self.fail_non_retryable(task, "no branch to check".to_string()).await;
        };

        let result = match self
            .repo_host
            .wait_for_checks(&task.repo, &branch, std::time::Duration::from_secs(self.config.agent_timeout_secs))
            .await
        {
            Ok(result) => result,
            Err(err) => return self.fail_non_retryable(task, format!("CI check call failed: {err}")).await,
        };

        let signal = if result.success {
            TaskSignal::CiPassed
        } else {
            TaskSignal::CiFailed {
                error_summary: result.error_summary.unwrap_or_else(|| "CI reported failure".to_string()),
            }
        };
        let event_type = if result.success { TaskEventType::CiPassed } else { TaskEventType::CiFailed };
        self.emit(TaskEvent::new(task.id.clone(), event_type)).await;

        match self.advance(task, signal).await {
            Some(_) => IterationOutcome::Advanced,
            None => IterationOutcome::Failed,
        }
    }

    async fn handle_tests_passed(&self, task: Task) -> IterationOutcome {
        match self.advance(task, TaskSignal::Proceed).await {
            Some(_) => IterationOutcome::Advanced,
            None => IterationOutcome::Failed,
        }
    }

    async fn handle_tests_failed(&self, task: Task) -> IterationOutcome {
        match self.advance(task, TaskSignal::Proceed).await {
            Some(_) => IterationOutcome::Advanced,
            None => IterationOutcome::Failed,
        }
    }

    async fn handle_reviewing(&self, task: Task) -> IterationOutcome {
        let Ok(static_memory) = self.static_for(&task.repo).await else {
            return IterationOutcome::Failed;
        };
        let Ok(session) = self.session_for(&task).await else {
            return IterationOutcome::Failed;
        };

        let context = compile(CompileRequest {
            agent_type: AgentType::Reviewer,
            static_memory: &static_memory,
            session: &session,
            repo_map: None,
            include: None,
        });

        let outcome = match self
            .reviewer
            .run(&context, "Review this diff against the definition of done. Verify each DoD item and flag any issues by severity.")
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => return self.fail_non_retryable(task, format!("reviewer call failed: {err}")).await,
        };

        self.emit(
            TaskEvent::new(task.id.clone(), TaskEventType::ReviewRequested)
                .with_agent("reviewer")
                .with_output_summary(outcome.output.summary.clone()),
        )
        .await;

        let signal = match outcome.output.verdict {
            ReviewVerdict::Approve => TaskSignal::ReviewApproved,
            ReviewVerdict::RequestChanges => TaskSignal::ReviewRejected {
                tests_passed: true,
                has_critical_comment: outcome.output.has_critical_comment(),
            },
            ReviewVerdict::NeedsDiscussion => TaskSignal::ReviewRejected {
                tests_passed: true,
                has_critical_comment: false,
            },
        };
        let approved = matches!(signal, TaskSignal::ReviewApproved);
        self.emit(TaskEvent::new(
            task.id.clone(),
            if approved { TaskEventType::ReviewApproved } else { TaskEventType::ReviewRejected },
        ))
        .await;

        match self.advance(task, signal).await {
            Some(_) => IterationOutcome::Advanced,
            None => IterationOutcome::Failed,
        }
    }

    async fn handle_review_rejected(&self, task: Task) -> IterationOutcome {
        match self.advance(task, TaskSignal::Proceed).await {
            Some(_) => IterationOutcome::Advanced,
            None => IterationOutcome::Failed,
        }
    }

    async fn handle_review_approved(&self, task: Task) -> IterationOutcome {
        let title = format!("{}: {}", task.repo, task.issue_ref);
        let body = task.plan.join("\n");
        let branch = task.branch_name.clone().unwrap_or_default();

        let pr_ref = match self.repo_host.create_pr(&task.repo, &branch, &title, &body).await {
            Ok(pr_ref) => pr_ref,
            Err(err) => return self.fail_non_retryable(task, format!("failed to open pull request: {err}")).await,
        };

        self.emit(TaskEvent::new(task.id.clone(), TaskEventType::PrOpened).with_output_summary(pr_ref.clone())).await;

        let mut task = task;
        task.pr_ref = Some(pr_ref);
        let Some(task) = self.advance(task, TaskSignal::PrOpened).await else {
            return IterationOutcome::Failed;
        };
        // Opening the PR and parking for human merge are not separated
        // by an external signal, so both edges apply in the same
        // iteration (§5 suspension points: the worker suspends after
        // WAITING_HUMAN, not after PR_CREATED).
        match self.advance(task, TaskSignal::Proceed).await {
            Some(_) => IterationOutcome::Terminal,
            None => IterationOutcome::Failed,
        }
    }

    async fn fail_non_retryable(&self, task: Task, reason: String) -> IterationOutcome {
        let task_id = task.id.clone();
        self.emit(TaskEvent::new(task_id.clone(), TaskEventType::TaskFailed).with_output_summary(reason.clone())).await;
        match self.advance(task, TaskSignal::NonRetryableError { reason }).await {
            Some(_) => IterationOutcome::Terminal,
            None => IterationOutcome::Failed,
        }
    }

    /// Apply an externally observed merge signal (§4.3 `WAITING_HUMAN →
    /// COMPLETED`). Not part of `TaskIteration` - the Scheduler never
    /// runs a terminal-for-scheduling task, so this is invoked directly
    /// by the CLI/webhook surface.
    pub async fn record_merge(&self, task_id: &str) -> Result<Task, crate::state::StateError> {
        let task = self.state.get_task_required(task_id).await?;
        self.emit(TaskEvent::new(task.id.clone(), TaskEventType::Merged)).await;
        self.advance(task, TaskSignal::Merged)
            .await
            .ok_or_else(|| crate::state::StateError::NotFound(format!("task {task_id} could not be merged")))
    }
}

#[async_trait]
impl TaskIteration for Orchestrator {
    async fn run_iteration(&self, task: Task) -> IterationOutcome {
        match task.status {
            TaskStatus::New => self.handle_new(task).await,
            TaskStatus::Planning => self.handle_planning(task).await,
            TaskStatus::PlanningDone => self.handle_planning_done(task).await,
            TaskStatus::Coding => self.handle_coding(task).await,
            TaskStatus::CodingDone => self.handle_coding_done(task).await,
            TaskStatus::Testing => self.handle_testing(task).await,
            TaskStatus::TestsPassed => self.handle_tests_passed(task).await,
            TaskStatus::TestsFailed => self.handle_tests_failed(task).await,
            TaskStatus::Fixing => self.handle_fixing(task).await,
            TaskStatus::Reviewing => self.handle_reviewing(task).await,
            TaskStatus::ReviewRejected => self.handle_review_rejected(task).await,
            TaskStatus::ReviewApproved => self.handle_review_approved(task).await,
            TaskStatus::PrCreated | TaskStatus::WaitingHuman | TaskStatus::Completed | TaskStatus::Failed => {
                IterationOutcome::Terminal
            }
        }
    }

    async fn parent_orchestration(&self, task: &Task) -> Option<OrchestrationState> {
        let parent_id = task.parent_task_id.as_ref()?;
        let session = self.state.get_session_memory(parent_id).await.ok()??;
        session.orchestration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MockRepoHost;
    use crate::llm::{CompletionResponse, MockLlmClient, TokenUsage};

    fn completion(json: &str) -> CompletionResponse {
        CompletionResponse {
            text: json.to_string(),
            model: "test-model".to_string(),
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 10,
            },
        }
    }

    async fn orchestrator_with(responses: Vec<CompletionResponse>) -> (Orchestrator, StateManager) {
        let dir = tempfile::tempdir().unwrap();
        let state = StateManager::spawn(dir.path()).unwrap();
        let repo_host = Arc::new(MockRepoHost::new(crate::collaborators::RepoContext {
            default_branch: "main".to_string(),
            language: "rust".to_string(),
            framework: None,
        }));
        let events = Arc::new(EventBus::with_default_capacity());
        let client = Arc::new(MockLlmClient::new(responses));
        let orchestrator = Orchestrator::new(state.clone(), repo_host, events, Config::default(), client);
        (orchestrator, state)
    }

    #[tokio::test]
    async fn new_task_advances_to_planning() {
        let (orchestrator, state) = orchestrator_with(vec![]).await;
        let task = Task::new("acme/widgets", "issues/1", 3);
        state.create_task(task.clone()).await.unwrap();

        let outcome = orchestrator.run_iteration(task.clone()).await;
        assert!(matches!(outcome, IterationOutcome::Advanced));
        let updated = state.get_task_required(&task.id).await.unwrap();
        assert_eq!(updated.status, TaskStatus::Planning);
    }

    #[tokio::test]
    async fn planner_output_below_threshold_skips_orchestration() {
        let planner_json = r#"{
            "definition_of_done": ["it works"],
            "plan": ["write code"],
            "target_files": ["src/lib.rs"],
            "estimated_complexity": "S",
            "estimated_effort": "small",
            "should_breakdown": false
        }"#;
        let (orchestrator, state) = orchestrator_with(vec![completion(planner_json)]).await;
        let mut task = Task::new("acme/widgets", "issues/1", 3);
        task.status = TaskStatus::Planning;
        state.create_task(task.clone()).await.unwrap();

        let outcome = orchestrator.run_iteration(task.clone()).await;
        assert!(matches!(outcome, IterationOutcome::Advanced));
        let updated = state.get_task_required(&task.id).await.unwrap();
        assert_eq!(updated.status, TaskStatus::PlanningDone);
        assert!(!updated.is_orchestrated);
    }

    #[tokio::test]
    async fn high_complexity_with_breakdown_recommendation_marks_orchestrated() {
        let planner_json = r#"{
            "definition_of_done": ["it works"],
            "plan": ["write code"],
            "target_files": ["src/lib.rs"],
            "estimated_complexity": "L",
            "estimated_effort": "large",
            "should_breakdown": true
        }"#;
        let (orchestrator, state) = orchestrator_with(vec![completion(planner_json)]).await;
        let mut task = Task::new("acme/widgets", "issues/1", 3);
        task.status = TaskStatus::Planning;
        state.create_task(task.clone()).await.unwrap();

        orchestrator.run_iteration(task.clone()).await;
        let updated = state.get_task_required(&task.id).await.unwrap();
        assert!(updated.is_orchestrated);
    }
}

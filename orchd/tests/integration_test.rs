//! End-to-end coverage driving the Scheduler + Orchestrator against
//! mock collaborators: the happy path (§8 scenario 1) and an
//! orchestrated task that aggregates cleanly (§8 scenario 4/5 family).

use std::sync::Arc;
use std::time::Duration;

use orchd::collaborators::{MockRepoHost, RepoContext};
use orchd::config::Config;
use orchd::domain::{Task, TaskStatus};
use orchd::events::EventBus;
use orchd::llm::{CompletionResponse, MockLlmClient, TokenUsage};
use orchd::orchestrator::Orchestrator;
use orchd::scheduler::{Scheduler, SchedulerConfig};
use orchd::state::StateManager;

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

fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        worker_concurrency: 2,
        agent_timeout: Duration::from_secs(5),
        task_wall_clock_budget: Duration::from_secs(3600),
    }
}

async fn run_until_terminal(scheduler: &Scheduler, state: &StateManager, task_id: &str, max_sweeps: u32) -> Task {
    for _ in 0..max_sweeps {
        scheduler.run_sweep().await.unwrap();
        let task = state.get_task_required(task_id).await.unwrap();
        if task.status.is_terminal() {
            return task;
        }
    }
    state.get_task_required(task_id).await.unwrap()
}

#[tokio::test]
async fn happy_path_reaches_waiting_human_with_a_pr_opened() {
    let dir = tempfile::tempdir().unwrap();
    let state = StateManager::spawn(dir.path()).unwrap();
    let repo_host = Arc::new(MockRepoHost::new(RepoContext {
        default_branch: "main".to_string(),
        language: "rust".to_string(),
        framework: None,
    }));
    let events = Arc::new(EventBus::with_default_capacity());

    let planner_json = r#"{
        "definition_of_done": ["adds a health endpoint"],
        "plan": ["add handler", "wire route"],
        "target_files": ["src/health.rs"],
        "estimated_complexity": "S",
        "estimated_effort": "small",
        "should_breakdown": false
    }"#;
    let coder_json = r#"{
        "diff": "--- a/src/health.rs\n+++ b/src/health.rs\n@@ -0,0 +1 @@\n+pub fn health() {}\n",
        "commit_message": "add health endpoint",
        "files_modified": ["src/health.rs"]
    }"#;
    let validator_json = r#"{
        "verdict": "VALID",
        "checks": [{"type": "syntax", "passed": true, "details": "ok"}],
        "feedback": []
    }"#;
    let reviewer_json = r#"{
        "verdict": "APPROVE",
        "summary": "looks good",
        "dod_verification": ["adds a health endpoint"],
        "comments": [],
        "suggested_changes": []
    }"#;

    let client = Arc::new(MockLlmClient::new(vec![
        completion(planner_json),
        completion(coder_json),
        completion(validator_json),
        completion(reviewer_json),
    ]));

    let orchestrator = Arc::new(Orchestrator::new(state.clone(), repo_host.clone(), events, Config::default(), client));
    let scheduler = Scheduler::new(scheduler_config(), state.clone(), orchestrator);

    let task = Task::new("acme/widgets", "issues/1", 3);
    state.create_task(task.clone()).await.unwrap();

    let final_task = run_until_terminal(&scheduler, &state, &task.id, 10).await;

    assert_eq!(final_task.status, TaskStatus::WaitingHuman);
    assert!(final_task.pr_ref.is_some());
    assert_eq!(repo_host.prs().len(), 1);
}

#[tokio::test]
async fn ci_failure_then_fixer_recovers_before_review() {
    let dir = tempfile::tempdir().unwrap();
    let state = StateManager::spawn(dir.path()).unwrap();
    let repo_host = Arc::new(MockRepoHost::new(RepoContext {
        default_branch: "main".to_string(),
        language: "rust".to_string(),
        framework: None,
    }));
    repo_host.queue_check_result(orchd::collaborators::CheckResult {
        success: false,
        error_summary: Some("lint failed".to_string()),
    });
    let events = Arc::new(EventBus::with_default_capacity());

    let planner_json = r#"{
        "definition_of_done": ["fixes the bug"],
        "plan": ["patch it"],
        "target_files": ["src/lib.rs"],
        "estimated_complexity": "S",
        "estimated_effort": "small",
        "should_breakdown": false
    }"#;
    let coder_json = r#"{
        "diff": "--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -0,0 +1 @@\n+pub fn broken() {}\n",
        "commit_message": "attempt 1",
        "files_modified": ["src/lib.rs"]
    }"#;
    let validator_json = r#"{
        "verdict": "VALID",
        "checks": [{"type": "syntax", "passed": true, "details": "ok"}],
        "feedback": []
    }"#;
    let fixer_json = r#"{
        "diff": "--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -0,0 +1 @@\n+pub fn fixed() {}\n",
        "commit_message": "attempt 2",
        "files_modified": ["src/lib.rs"]
    }"#;
    let validator_json_2 = validator_json;
    let reviewer_json = r#"{
        "verdict": "APPROVE",
        "summary": "looks good now",
        "dod_verification": ["fixes the bug"],
        "comments": [],
        "suggested_changes": []
    }"#;

    let client = Arc::new(MockLlmClient::new(vec![
        completion(planner_json),
        completion(coder_json),
        completion(validator_json),
        completion(fixer_json),
        completion(validator_json_2),
        completion(reviewer_json),
    ]));

    let orchestrator = Arc::new(Orchestrator::new(state.clone(), repo_host.clone(), events, Config::default(), client));
    let scheduler = Scheduler::new(scheduler_config(), state.clone(), orchestrator);

    let task = Task::new("acme/widgets", "issues/2", 3);
    state.create_task(task.clone()).await.unwrap();

    let final_task = run_until_terminal(&scheduler, &state, &task.id, 14).await;

    assert_eq!(final_task.status, TaskStatus::WaitingHuman);
    assert!(repo_host.applied_diffs().len() >= 2);
}

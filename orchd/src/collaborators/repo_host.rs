//! The code-host collaborator (§6): branch/diff/PR operations against
//! whatever forge hosts the target repo. Mirrors the `LlmClient` trait's
//! shape - one async trait, one in-memory test double.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoHostError {
    #[error("repo not found: {0}")]
    RepoNotFound(String),
    #[error("branch not found: {0}")]
    BranchNotFound(String),
    #[error("diff could not be applied: {0}")]
    ApplyFailed(String),
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Default)]
pub struct RepoContext {
    pub default_branch: String,
    pub language: String,
    pub framework: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub success: bool,
    pub error_summary: Option<String>,
}

/// Branch/diff/PR operations against a code host (§6). `waitForChecks`
/// is the one call allowed to block for the caller's `timeout`; every
/// other method is expected to return promptly.
#[async_trait]
pub trait RepoHost: Send + Sync {
    async fn get_repo_context(&self, repo: &str) -> Result<RepoContext, RepoHostError>;
    async fn get_files_content(&self, repo: &str, paths: &[String]) -> Result<HashMap<String, String>, RepoHostError>;
    async fn create_branch(&self, repo: &str, name: &str, from: &str) -> Result<(), RepoHostError>;
    async fn apply_diff(&self, repo: &str, branch: &str, diff: &str, message: &str) -> Result<String, RepoHostError>;
    async fn create_pr(&self, repo: &str, branch: &str, title: &str, body: &str) -> Result<String, RepoHostError>;
    async fn add_labels(&self, repo: &str, pr_ref: &str, labels: &[String]) -> Result<(), RepoHostError>;
    async fn add_comment(&self, repo: &str, pr_ref: &str, body: &str) -> Result<(), RepoHostError>;
    async fn wait_for_checks(&self, repo: &str, branch: &str, timeout: Duration) -> Result<CheckResult, RepoHostError>;
}

#[derive(Default)]
struct MockRepoHostState {
    branches: HashMap<String, String>,
    applied_diffs: Vec<(String, String, String)>,
    prs: Vec<(String, String, String)>,
    comments: Vec<(String, String)>,
    labels: HashMap<String, Vec<String>>,
    next_check_result: Option<CheckResult>,
}

/// In-memory `RepoHost` for tests: records every call and lets the test
/// script queue canned `waitForChecks` outcomes.
#[derive(Default)]
pub struct MockRepoHost {
    state: Mutex<MockRepoHostState>,
    context: RepoContext,
}

impl MockRepoHost {
    pub fn new(context: RepoContext) -> Self {
        Self {
            state: Mutex::new(MockRepoHostState::default()),
            context,
        }
    }

    pub fn queue_check_result(&self, result: CheckResult) {
        self.state.lock().unwrap().next_check_result = Some(result);
    }

    pub fn applied_diffs(&self) -> Vec<(String, String, String)> {
        self.state.lock().unwrap().applied_diffs.clone()
    }

    pub fn prs(&self) -> Vec<(String, String, String)> {
        self.state.lock().unwrap().prs.clone()
    }
}

#[async_trait]
impl RepoHost for MockRepoHost {
    async fn get_repo_context(&self, _repo: &str) -> Result<RepoContext, RepoHostError> {
        Ok(self.context.clone())
    }

    async fn get_files_content(&self, _repo: &str, paths: &[String]) -> Result<HashMap<String, String>, RepoHostError> {
        Ok(paths.iter().map(|p| (p.clone(), String::new())).collect())
    }

    async fn create_branch(&self, _repo: &str, name: &str, from: &str) -> Result<(), RepoHostError> {
        self.state.lock().unwrap().branches.insert(name.to_string(), from.to_string());
        Ok(())
    }

    async fn apply_diff(&self, _repo: &str, branch: &str, diff: &str, message: &str) -> Result<String, RepoHostError> {
        let mut state = self.state.lock().unwrap();
        if !state.branches.contains_key(branch) {
            return Err(RepoHostError::BranchNotFound(branch.to_string()));
        }
        state.applied_diffs.push((branch.to_string(), diff.to_string(), message.to_string()));
        Ok(format!("sha-{}", state.applied_diffs.len()))
    }

    async fn create_pr(&self, _repo: &str, branch: &str, title: &str, body: &str) -> Result<String, RepoHostError> {
        let mut state = self.state.lock().unwrap();
        state.prs.push((branch.to_string(), title.to_string(), body.to_string()));
        Ok(format!("pr-{}", state.prs.len()))
    }

    async fn add_labels(&self, _repo: &str, pr_ref: &str, labels: &[String]) -> Result<(), RepoHostError> {
        self.state.lock().unwrap().labels.entry(pr_ref.to_string()).or_default().extend(labels.iter().cloned());
        Ok(())
    }

    async fn add_comment(&self, _repo: &str, pr_ref: &str, body: &str) -> Result<(), RepoHostError> {
        self.state.lock().unwrap().comments.push((pr_ref.to_string(), body.to_string()));
        Ok(())
    }

    async fn wait_for_checks(&self, _repo: &str, _branch: &str, _timeout: Duration) -> Result<CheckResult, RepoHostError> {
        Ok(self.state.lock().unwrap().next_check_result.take().unwrap_or(CheckResult {
            success: true,
            error_summary: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_rejects_apply_diff_against_unknown_branch() {
        let host = MockRepoHost::default();
        let err = host.apply_diff("acme/widgets", "feature/x", "diff", "msg").await.unwrap_err();
        assert!(matches!(err, RepoHostError::BranchNotFound(_)));
    }

    #[tokio::test]
    async fn mock_records_applied_diffs_and_prs() {
        let host = MockRepoHost::default();
        host.create_branch("acme/widgets", "feature/x", "main").await.unwrap();
        host.apply_diff("acme/widgets", "feature/x", "diff text", "commit msg").await.unwrap();
        host.create_pr("acme/widgets", "feature/x", "title", "body").await.unwrap();

        assert_eq!(host.applied_diffs().len(), 1);
        assert_eq!(host.prs().len(), 1);
    }

    #[tokio::test]
    async fn queued_check_result_is_returned_once() {
        let host = MockRepoHost::default();
        host.queue_check_result(CheckResult {
            success: false,
            error_summary: Some("lint failed".to_string()),
        });
        let result = host.wait_for_checks("acme/widgets", "feature/x", Duration::from_secs(1)).await.unwrap();
        assert!(!result.success);

        let default_result = host.wait_for_checks("acme/widgets", "feature/x", Duration::from_secs(1)).await.unwrap();
        assert!(default_result.success);
    }
}

//! Job Controller (§4.8): derives [`JobStatus`] and [`JobSummary`] as a
//! pure function of member task statuses. No stored field is
//! authoritative on its own - it is always recomputed from the tasks a
//! job owns.

use crate::domain::{JobSummary, TaskStatus};

/// `all COMPLETED → completed; all terminal with ≥1 FAILED → failed if 0
/// COMPLETED else partial; any non-terminal → running; none scheduled →
/// pending` (§4.8).
pub fn derive_status(statuses: &[TaskStatus]) -> crate::domain::JobStatus {
    use crate::domain::JobStatus::*;

    if statuses.is_empty() {
        return Pending;
    }
    if statuses.iter().any(|s| !s.is_terminal()) {
        return Running;
    }
    let completed = statuses.iter().filter(|s| **s == TaskStatus::Completed).count();
    let failed = statuses.iter().filter(|s| **s == TaskStatus::Failed).count();
    if failed == 0 {
        return Completed;
    }
    if completed == 0 { Failed } else { Partial }
}

/// Recompute the job summary's counters and PR list from its member
/// tasks.
pub fn derive_summary(tasks: &[crate::domain::Task]) -> JobSummary {
    let total = tasks.len() as u32;
    let completed = tasks.iter().filter(|t| t.status == TaskStatus::Completed).count() as u32;
    let failed = tasks.iter().filter(|t| t.status == TaskStatus::Failed).count() as u32;
    let in_progress = total - completed - failed;
    let prs = tasks.iter().filter_map(|t| t.pr_ref.clone()).collect();
    JobSummary {
        total,
        completed,
        failed,
        in_progress,
        prs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Job, JobStatus, Task};

    #[test]
    fn empty_job_is_pending() {
        assert_eq!(derive_status(&[]), JobStatus::Pending);
    }

    #[test]
    fn any_non_terminal_task_keeps_job_running() {
        let statuses = vec![TaskStatus::Completed, TaskStatus::Coding];
        assert_eq!(derive_status(&statuses), JobStatus::Running);
    }

    #[test]
    fn all_completed_is_completed() {
        let statuses = vec![TaskStatus::Completed, TaskStatus::Completed];
        assert_eq!(derive_status(&statuses), JobStatus::Completed);
    }

    #[test]
    fn mixed_terminal_with_some_completed_is_partial() {
        let statuses = vec![TaskStatus::Completed, TaskStatus::Failed];
        assert_eq!(derive_status(&statuses), JobStatus::Partial);
    }

    #[test]
    fn all_failed_with_no_completions_is_failed() {
        let statuses = vec![TaskStatus::Failed, TaskStatus::WaitingHuman];
        assert_eq!(derive_status(&statuses), JobStatus::Failed);
    }

    #[test]
    fn summary_counts_and_collects_pr_refs() {
        let mut job = Job::new("acme/widgets");
        let mut a = Task::new("acme/widgets", "issues/1", 3);
        a.status = TaskStatus::Completed;
        a.pr_ref = Some("acme/widgets#10".to_string());
        let mut b = Task::new("acme/widgets", "issues/2", 3);
        b.status = TaskStatus::Failed;
        job.add_task(&a.id);
        job.add_task(&b.id);

        let summary = derive_summary(&[a, b]);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.prs, vec!["acme/widgets#10".to_string()]);
    }
}

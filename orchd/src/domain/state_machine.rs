//! The task state machine (§4.3), expressed as a pure function so it is
//! unit-testable without the scheduler, store, or agents - the same
//! separation the teacher keeps between pure domain state and the
//! drivers that push it forward.

use thiserror::Error;

use super::task::TaskStatus;

/// Inputs that can drive a task from one status to the next. Each
/// variant carries exactly the data `apply` needs to decide the next
/// state - nothing more.
#[derive(Debug, Clone)]
pub enum TaskSignal {
    Scheduled,
    PlannerCompleted { orchestrate: bool },
    StartCoding,
    CoderCompleted,
    DiffApplied,
    CiPassed,
    CiFailed { error_summary: String },
    ValidatorInvalid,
    FixerCompleted,
    ReviewApproved,
    ReviewRejected { tests_passed: bool, has_critical_comment: bool },
    PrOpened,
    Merged,
    ChildrenAggregated,
    OrchestrationConflict,
    /// No-decision advance for states with exactly one successor
    /// (`TESTS_PASSED → REVIEWING`, `PR_CREATED → WAITING_HUMAN`).
    Proceed,
    Cancelled,
    NonRetryableError { reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("signal {signal:?} is not valid from status {status}")]
    InvalidSignalForStatus { status: TaskStatus, signal: String },
}

/// The result of applying a signal: the next status, whether this
/// transition consumes one attempt, whether it marks the task
/// orchestrated, and whether a reviewer downgrade occurred (for the
/// event the caller records alongside it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: TaskStatus,
    pub increment_attempt: bool,
    pub mark_orchestrated: bool,
    pub reviewer_downgraded: bool,
    pub failure_reason: Option<String>,
}

impl Transition {
    fn to(next: TaskStatus) -> Self {
        Self {
            next,
            increment_attempt: false,
            mark_orchestrated: false,
            reviewer_downgraded: false,
            failure_reason: None,
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            next: TaskStatus::Failed,
            increment_attempt: false,
            mark_orchestrated: false,
            reviewer_downgraded: false,
            failure_reason: Some(reason.into()),
        }
    }
}

fn signal_name(signal: &TaskSignal) -> String {
    format!("{signal:?}")
}

fn invalid(status: TaskStatus, signal: &TaskSignal) -> TransitionError {
    TransitionError::InvalidSignalForStatus {
        status,
        signal: signal_name(signal),
    }
}

/// Apply one signal to the current status, honoring the attempt budget.
/// `attempt_count`/`max_attempts` gate the retry-consuming edges
/// (`TESTS_FAILED → FIXING`, `REVIEW_REJECTED → FIXING`): once the
/// budget is spent the machine fails the task instead of retrying
/// again, per "Any state → FAILED if attemptCount == maxAttempts and
/// the next step would increment again" (§4.3).
pub fn apply(
    current: TaskStatus,
    signal: TaskSignal,
    attempt_count: u32,
    max_attempts: u32,
) -> Result<Transition, TransitionError> {
    use TaskStatus::*;

    if current.is_terminal() && !matches!(signal, TaskSignal::Merged) {
        return Err(invalid(current, &signal));
    }

    if let TaskSignal::Cancelled = signal {
        return Ok(Transition::failed("cancelled"));
    }
    if let TaskSignal::NonRetryableError { reason } = &signal {
        return Ok(Transition::failed(reason.clone()));
    }

    match (current, signal) {
        (New, TaskSignal::Scheduled) => Ok(Transition::to(Planning)),

        (Planning, TaskSignal::PlannerCompleted { orchestrate }) => Ok(Transition {
            next: PlanningDone,
            mark_orchestrated: orchestrate,
            ..Transition::to(PlanningDone)
        }),

        (PlanningDone, TaskSignal::StartCoding) => Ok(Transition::to(Coding)),
        (PlanningDone, TaskSignal::ChildrenAggregated) => Ok(Transition::to(CodingDone)),
        (PlanningDone, TaskSignal::OrchestrationConflict) => Ok(Transition::to(WaitingHuman)),

        (Coding, TaskSignal::CoderCompleted) => Ok(Transition::to(CodingDone)),

        (CodingDone, TaskSignal::DiffApplied) => Ok(Transition::to(Testing)),
        (CodingDone, TaskSignal::ValidatorInvalid) => consume_attempt_or_fail(TestsFailed, attempt_count, max_attempts),

        (Testing, TaskSignal::CiPassed) => Ok(Transition::to(TestsPassed)),
        (Testing, TaskSignal::CiFailed { error_summary }) => {
            let mut t = consume_attempt_or_fail(TestsFailed, attempt_count, max_attempts)?;
            if t.next != Failed {
                t.failure_reason = Some(error_summary);
            }
            Ok(t)
        }

        (TestsPassed, TaskSignal::Proceed) => Ok(Transition::to(Reviewing)),

        (TestsFailed, TaskSignal::Proceed) => consume_attempt_or_fail(Fixing, attempt_count, max_attempts),

        (Fixing, TaskSignal::FixerCompleted) => Ok(Transition::to(CodingDone)),

        (Reviewing, TaskSignal::ReviewApproved) => Ok(Transition::to(ReviewApproved)),
        (
            Reviewing,
            TaskSignal::ReviewRejected {
                tests_passed,
                has_critical_comment,
            },
        ) => {
            // The reviewer may downgrade REQUEST_CHANGES -> APPROVE iff
            // tests passed and no critical comment; any other downgrade
            // is forbidden (§4.3 tie-breaks).
            if tests_passed && !has_critical_comment {
                Ok(Transition {
                    reviewer_downgraded: true,
                    ..Transition::to(ReviewApproved)
                })
            } else {
                Ok(Transition::to(ReviewRejected))
            }
        }
        (ReviewRejected, TaskSignal::Proceed) => consume_attempt_or_fail(Fixing, attempt_count, max_attempts),

        (ReviewApproved, TaskSignal::PrOpened) => Ok(Transition::to(PrCreated)),
        (PrCreated, TaskSignal::Proceed) => Ok(Transition::to(WaitingHuman)),
        (WaitingHuman, TaskSignal::Merged) => Ok(Transition::to(Completed)),

        (status, signal) => Err(invalid(status, &signal)),
    }
}

fn consume_attempt_or_fail(next: TaskStatus, attempt_count: u32, max_attempts: u32) -> Result<Transition, TransitionError> {
    if attempt_count >= max_attempts {
        return Ok(Transition::failed("attempts exhausted"));
    }
    Ok(Transition {
        increment_attempt: true,
        ..Transition::to(next)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_monolithic() {
        let t = apply(TaskStatus::New, TaskSignal::Scheduled, 0, 3).unwrap();
        assert_eq!(t.next, TaskStatus::Planning);

        let t = apply(TaskStatus::Planning, TaskSignal::PlannerCompleted { orchestrate: false }, 0, 3).unwrap();
        assert_eq!(t.next, TaskStatus::PlanningDone);
        assert!(!t.mark_orchestrated);

        let t = apply(TaskStatus::PlanningDone, TaskSignal::StartCoding, 0, 3).unwrap();
        assert_eq!(t.next, TaskStatus::Coding);

        let t = apply(TaskStatus::Coding, TaskSignal::CoderCompleted, 0, 3).unwrap();
        assert_eq!(t.next, TaskStatus::CodingDone);

        let t = apply(TaskStatus::CodingDone, TaskSignal::DiffApplied, 0, 3).unwrap();
        assert_eq!(t.next, TaskStatus::Testing);

        let t = apply(TaskStatus::Testing, TaskSignal::CiPassed, 0, 3).unwrap();
        assert_eq!(t.next, TaskStatus::TestsPassed);

        let t = apply(TaskStatus::TestsPassed, TaskSignal::Proceed, 0, 3).unwrap();
        assert_eq!(t.next, TaskStatus::Reviewing);

        let t = apply(TaskStatus::Reviewing, TaskSignal::ReviewApproved, 0, 3).unwrap();
        assert_eq!(t.next, TaskStatus::ReviewApproved);

        let t = apply(TaskStatus::ReviewApproved, TaskSignal::PrOpened, 0, 3).unwrap();
        assert_eq!(t.next, TaskStatus::PrCreated);

        let t = apply(TaskStatus::PrCreated, TaskSignal::Proceed, 0, 3).unwrap();
        assert_eq!(t.next, TaskStatus::WaitingHuman);

        let t = apply(TaskStatus::WaitingHuman, TaskSignal::Merged, 0, 3).unwrap();
        assert_eq!(t.next, TaskStatus::Completed);
    }

    #[test]
    fn ci_failure_consumes_an_attempt_then_fixes() {
        let t = apply(
            TaskStatus::Testing,
            TaskSignal::CiFailed {
                error_summary: "tsc: T1234".into(),
            },
            0,
            3,
        )
        .unwrap();
        assert_eq!(t.next, TaskStatus::TestsFailed);
        assert!(t.increment_attempt);
        assert_eq!(t.failure_reason.as_deref(), Some("tsc: T1234"));

        let t = apply(TaskStatus::TestsFailed, TaskSignal::Proceed, 1, 3).unwrap();
        assert_eq!(t.next, TaskStatus::Fixing);
        assert!(t.increment_attempt);
    }

    #[test]
    fn exhausting_attempts_fails_instead_of_retrying() {
        let t = apply(TaskStatus::TestsFailed, TaskSignal::Proceed, 2, 2).unwrap();
        assert_eq!(t.next, TaskStatus::Failed);
    }

    #[test]
    fn reviewer_downgrade_allowed_only_without_critical_and_with_passing_tests() {
        let t = apply(
            TaskStatus::Reviewing,
            TaskSignal::ReviewRejected {
                tests_passed: true,
                has_critical_comment: false,
            },
            0,
            3,
        )
        .unwrap();
        assert_eq!(t.next, TaskStatus::ReviewApproved);
        assert!(t.reviewer_downgraded);

        let t = apply(
            TaskStatus::Reviewing,
            TaskSignal::ReviewRejected {
                tests_passed: true,
                has_critical_comment: true,
            },
            0,
            3,
        )
        .unwrap();
        assert_eq!(t.next, TaskStatus::ReviewRejected);
        assert!(!t.reviewer_downgraded);

        let t = apply(TaskStatus::ReviewRejected, TaskSignal::Proceed, 0, 3).unwrap();
        assert_eq!(t.next, TaskStatus::Fixing);
        assert!(t.increment_attempt);
    }

    #[test]
    fn invalid_signal_for_status_is_rejected() {
        let err = apply(TaskStatus::New, TaskSignal::CiPassed, 0, 3).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidSignalForStatus { .. }));
    }

    #[test]
    fn cancellation_terminates_from_any_non_terminal_status() {
        let t = apply(TaskStatus::Coding, TaskSignal::Cancelled, 0, 3).unwrap();
        assert_eq!(t.next, TaskStatus::Failed);
        assert_eq!(t.failure_reason.as_deref(), Some("cancelled"));
    }

    #[test]
    fn orchestration_conflict_parks_at_waiting_human() {
        let t = apply(TaskStatus::PlanningDone, TaskSignal::OrchestrationConflict, 0, 3).unwrap();
        assert_eq!(t.next, TaskStatus::WaitingHuman);
    }

    #[test]
    fn children_aggregated_skips_the_parents_own_coder() {
        let t = apply(TaskStatus::PlanningDone, TaskSignal::ChildrenAggregated, 0, 3).unwrap();
        assert_eq!(t.next, TaskStatus::CodingDone);
    }
}

//! The closed output schemas agents parse their completions into (§4.5).
//! Each is a tagged Rust type: unknown variants fail to deserialize
//! rather than falling through to a stringly-typed default (§9 Design
//! Notes - dynamic/untyped LLM outputs become tagged variants here).

use serde::{Deserialize, Serialize};

use crate::domain::{EstimatedComplexity, EstimatedEffort};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerOutput {
    pub definition_of_done: Vec<String>,
    pub plan: Vec<String>,
    pub target_files: Vec<String>,
    pub estimated_complexity: EstimatedComplexity,
    pub estimated_effort: EstimatedEffort,
    /// Planner's own recommendation on whether to hand off to the
    /// Orchestrator; advisory only (§4.3 tie-break) - the engine may
    /// still proceed monolithically even when this is true, and a
    /// complexity below the configured threshold never triggers
    /// orchestration regardless of this flag.
    #[serde(default)]
    pub should_breakdown: bool,
}

/// Shared shape for the coder and fixer agents - both produce a diff
/// against the current branch (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeOutput {
    pub diff: String,
    pub commit_message: String,
    pub files_modified: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidatorVerdict {
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Syntax,
    Lint,
    #[serde(rename = "type")]
    Type,
    Test,
    Diff,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorCheck {
    #[serde(rename = "type")]
    pub check_type: CheckType,
    pub passed: bool,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorOutput {
    pub verdict: ValidatorVerdict,
    pub checks: Vec<ValidatorCheck>,
    #[serde(default)]
    pub feedback: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReviewVerdict {
    Approve,
    #[serde(rename = "REQUEST_CHANGES")]
    RequestChanges,
    #[serde(rename = "NEEDS_DISCUSSION")]
    NeedsDiscussion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentSeverity {
    Critical,
    Major,
    Minor,
    Suggestion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerComment {
    pub file: String,
    pub line: Option<u32>,
    pub severity: CommentSeverity,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerOutput {
    pub verdict: ReviewVerdict,
    pub summary: String,
    #[serde(default)]
    pub dod_verification: Vec<String>,
    #[serde(default)]
    pub comments: Vec<ReviewerComment>,
    #[serde(default)]
    pub suggested_changes: Vec<String>,
}

impl ReviewerOutput {
    pub fn has_critical_comment(&self) -> bool {
        self.comments.iter().any(|c| c.severity == CommentSeverity::Critical)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Modify,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakdownIssue {
    pub title: String,
    pub body: String,
    pub target_files: Vec<String>,
    pub change_type: ChangeType,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub estimated_lines: u32,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub edges: Vec<DependencyEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakdownOutput {
    pub should_breakdown: bool,
    #[serde(default)]
    pub issues: Vec<BreakdownIssue>,
    #[serde(default)]
    pub dependency_graph: DependencyGraph,
    #[serde(default)]
    pub execution_plan: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_verdict_variant_fails_to_parse() {
        let json = r#"{"verdict":"MAYBE","summary":"","dodVerification":[],"comments":[],"suggestedChanges":[]}"#;
        assert!(serde_json::from_str::<ReviewerOutput>(json).is_err());
    }

    #[test]
    fn reviewer_output_detects_critical_comments() {
        let out = ReviewerOutput {
            verdict: ReviewVerdict::RequestChanges,
            summary: "needs work".to_string(),
            dod_verification: vec![],
            comments: vec![ReviewerComment {
                file: "src/lib.rs".to_string(),
                line: Some(10),
                severity: CommentSeverity::Critical,
                comment: "unsafe unwrap".to_string(),
            }],
            suggested_changes: vec![],
        };
        assert!(out.has_critical_comment());
    }

    #[test]
    fn planner_output_parses_recognized_fields() {
        let json = r#"{
            "definition_of_done": ["compiles"],
            "plan": ["write the function"],
            "target_files": ["src/lib.rs"],
            "estimated_complexity": "M",
            "estimated_effort": "medium",
            "should_breakdown": true
        }"#;
        let parsed: PlannerOutput = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.estimated_complexity, EstimatedComplexity::M);
        assert!(parsed.should_breakdown);
    }
}

//! The compiler: turns static memory + session memory into the minimal
//! prompt context for one agent call.
//!
//! `compile` never reads anything beyond its arguments. A parent task's
//! compilation cannot see a child's [`SessionMemory`] and vice versa -
//! the only session memory it ever touches is the one the caller passed
//! in, and nothing here knows how to look one up.

use serde::{Deserialize, Serialize};

use crate::session_memory::SessionMemory;
use crate::static_memory::StaticMemory;

/// Which pipeline stage is asking for context - controls the default
/// [`IncludeSet`] when the caller doesn't override one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Planner,
    Coder,
    Fixer,
    Validator,
    Reviewer,
}

/// Which sections of session memory to fold into the compiled context.
/// Defaults are per [`AgentType`]; callers may override for edge cases
/// (e.g. re-running a fixer with review comments attached).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncludeSet {
    pub plan: bool,
    pub current_diff: bool,
    pub review_comments: bool,
    pub failure_patterns: bool,
    pub agent_instructions: bool,
}

impl IncludeSet {
    fn for_agent(agent_type: AgentType) -> Self {
        match agent_type {
            AgentType::Planner => Self {
                plan: false,
                current_diff: false,
                review_comments: false,
                failure_patterns: false,
                agent_instructions: true,
            },
            AgentType::Coder => Self {
                plan: true,
                current_diff: false,
                review_comments: false,
                failure_patterns: false,
                agent_instructions: true,
            },
            AgentType::Fixer => Self {
                plan: true,
                current_diff: true,
                review_comments: false,
                failure_patterns: true,
                agent_instructions: true,
            },
            AgentType::Validator => Self {
                plan: false,
                current_diff: true,
                review_comments: false,
                failure_patterns: false,
                agent_instructions: false,
            },
            AgentType::Reviewer => Self {
                plan: true,
                current_diff: true,
                review_comments: true,
                failure_patterns: false,
                agent_instructions: true,
            },
        }
    }
}

/// Input to [`compile`]. Holds borrowed references only - the compiler
/// is not a store client, it assembles what the caller already fetched.
pub struct CompileRequest<'a> {
    pub agent_type: AgentType,
    pub static_memory: &'a StaticMemory,
    pub session: &'a SessionMemory,
    pub repo_map: Option<&'a str>,
    pub include: Option<IncludeSet>,
}

/// What actually got folded into the compiled context, for audit and
/// for estimating whether a prompt needs trimming upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMetadata {
    pub agent_type: AgentType,
    pub included_sections: Vec<String>,
    pub approx_chars: usize,
}

/// The output handed to an [`crate::session_memory::SessionMemory`]-scoped
/// agent call. `stable_prefix` is the part that never varies within a
/// task (repo config, constraints, instructions) so callers may cache or
/// reuse it across retries; `variable_suffix` carries the part that
/// changes attempt to attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledContext {
    pub stable_prefix: String,
    pub variable_suffix: String,
    pub metadata: ContextMetadata,
}

pub fn compile(request: CompileRequest<'_>) -> CompiledContext {
    let include = request.include.unwrap_or_else(|| IncludeSet::for_agent(request.agent_type));
    let mut included_sections = Vec::new();

    let mut stable_prefix = String::new();
    stable_prefix.push_str(&format!("Repository: {}\n", request.static_memory.repo));
    stable_prefix.push_str(&format!("Language: {}\n", request.static_memory.config.language));
    if let Some(framework) = &request.static_memory.config.framework {
        stable_prefix.push_str(&format!("Framework: {}\n", framework));
    }
    stable_prefix.push_str(&format!(
        "Constraints: max_diff_lines={} max_files_per_task={}\n",
        request.static_memory.constraints.max_diff_lines, request.static_memory.constraints.max_files_per_task
    ));
    included_sections.push("repo_config".to_string());
    included_sections.push("constraints".to_string());

    if include.agent_instructions
        && let Some(instructions) = &request.static_memory.agent_instructions
    {
        stable_prefix.push_str("\nAgent instructions:\n");
        stable_prefix.push_str(instructions);
        stable_prefix.push('\n');
        included_sections.push("agent_instructions".to_string());
    }

    if let Some(repo_map) = request.repo_map {
        stable_prefix.push_str("\nRepo map:\n");
        stable_prefix.push_str(repo_map);
        stable_prefix.push('\n');
        included_sections.push("repo_map".to_string());
    }

    let mut variable_suffix = String::new();
    let ctx = &request.session.context;

    if let Some(title) = &ctx.issue_title {
        variable_suffix.push_str(&format!("Issue: {}\n", title));
        included_sections.push("issue".to_string());
    }
    if let Some(body) = &ctx.issue_body {
        variable_suffix.push_str(&format!("{}\n", body));
    }
    if !ctx.definition_of_done.is_empty() {
        variable_suffix.push_str("\nDefinition of done:\n");
        for item in &ctx.definition_of_done {
            variable_suffix.push_str(&format!("- {}\n", item));
        }
        included_sections.push("definition_of_done".to_string());
    }

    if include.plan && !ctx.plan.is_empty() {
        variable_suffix.push_str("\nPlan:\n");
        for (i, step) in ctx.plan.iter().enumerate() {
            variable_suffix.push_str(&format!("{}. {}\n", i + 1, step));
        }
        included_sections.push("plan".to_string());
    }

    if include.current_diff
        && let Some(diff) = &ctx.current_diff
    {
        variable_suffix.push_str("\nCurrent diff:\n");
        variable_suffix.push_str(diff);
        variable_suffix.push('\n');
        included_sections.push("current_diff".to_string());
    }

    if include.review_comments && !ctx.review_comments.is_empty() {
        variable_suffix.push_str("\nReview comments:\n");
        for comment in &ctx.review_comments {
            let location = match comment.line {
                Some(line) => format!("{}:{}", comment.file, line),
                None => comment.file.clone(),
            };
            variable_suffix.push_str(&format!("- [{}] {}: {}\n", comment.severity, location, comment.comment));
        }
        included_sections.push("review_comments".to_string());
    }

    if include.failure_patterns && !request.session.attempts.failure_patterns.is_empty() {
        variable_suffix.push_str("\nKnown failure patterns (avoid repeating):\n");
        for pattern in &request.session.attempts.failure_patterns {
            variable_suffix.push_str(&format!("- {}\n", pattern));
        }
        included_sections.push("failure_patterns".to_string());
    }

    let approx_chars = stable_prefix.len() + variable_suffix.len();
    CompiledContext {
        stable_prefix,
        variable_suffix,
        metadata: ContextMetadata {
            agent_type: request.agent_type,
            included_sections,
            approx_chars,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::static_memory::{Constraints, RepoConfig};

    fn static_memory() -> StaticMemory {
        StaticMemory::new(
            "acme/widgets",
            RepoConfig {
                language: "rust".into(),
                framework: Some("tokio".into()),
                default_branch: "main".into(),
            },
            Constraints::default(),
        )
        .with_agent_instructions("Follow the repo's existing style.")
    }

    #[test]
    fn planner_context_excludes_plan_and_diff() {
        let mut session = SessionMemory::new("task-1");
        session.context.plan = vec!["step one".into()];
        session.context.current_diff = Some("diff --git a/x b/x".into());

        let compiled = compile(CompileRequest {
            agent_type: AgentType::Planner,
            static_memory: &static_memory(),
            session: &session,
            repo_map: None,
            include: None,
        });

        assert!(!compiled.metadata.included_sections.contains(&"plan".to_string()));
        assert!(!compiled.variable_suffix.contains("diff --git"));
        assert!(compiled.stable_prefix.contains("Follow the repo's existing style."));
    }

    #[test]
    fn fixer_context_includes_diff_plan_and_failure_patterns() {
        let mut session = SessionMemory::new("task-1");
        session.context.plan = vec!["step one".into()];
        session.context.current_diff = Some("diff --git a/x b/x".into());
        session.attempts.failure_patterns.push("tests failed: timeout".into());

        let compiled = compile(CompileRequest {
            agent_type: AgentType::Fixer,
            static_memory: &static_memory(),
            session: &session,
            repo_map: None,
            include: None,
        });

        assert!(compiled.variable_suffix.contains("diff --git"));
        assert!(compiled.variable_suffix.contains("step one"));
        assert!(compiled.variable_suffix.contains("tests failed: timeout"));
    }

    #[test]
    fn explicit_include_set_overrides_agent_default() {
        let mut session = SessionMemory::new("task-1");
        session.context.current_diff = Some("diff --git a/x b/x".into());

        let compiled = compile(CompileRequest {
            agent_type: AgentType::Planner,
            static_memory: &static_memory(),
            session: &session,
            repo_map: None,
            include: Some(IncludeSet {
                plan: false,
                current_diff: true,
                review_comments: false,
                failure_patterns: false,
                agent_instructions: false,
            }),
        });

        assert!(compiled.variable_suffix.contains("diff --git"));
        assert!(!compiled.stable_prefix.contains("Follow the repo's existing style."));
    }

    #[test]
    fn compiled_context_is_pure_given_same_inputs() {
        let session = SessionMemory::new("task-1");
        let mem = static_memory();
        let a = compile(CompileRequest {
            agent_type: AgentType::Coder,
            static_memory: &mem,
            session: &session,
            repo_map: Some("src/lib.rs"),
            include: None,
        });
        let b = compile(CompileRequest {
            agent_type: AgentType::Coder,
            static_memory: &mem,
            session: &session,
            repo_map: Some("src/lib.rs"),
            include: None,
        });
        assert_eq!(a.stable_prefix, b.stable_prefix);
        assert_eq!(a.variable_suffix, b.variable_suffix);
    }
}

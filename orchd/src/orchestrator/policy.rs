//! Path and size constraints on a coder/fixer diff (§6 Configuration
//! options), checked before a diff is ever applied to the code host.

use contextstore::Constraints;

use crate::llm::schemas::CodeOutput;

fn changed_line_count(diff: &str) -> u32 {
    diff.lines()
        .filter(|l| (l.starts_with('+') || l.starts_with('-')) && !l.starts_with("+++") && !l.starts_with("---"))
        .count() as u32
}

fn path_allowed(path: &str, constraints: &Constraints) -> bool {
    if constraints.blocked_paths.iter().any(|p| path.starts_with(p.as_str())) {
        return false;
    }
    constraints.allowed_paths.is_empty() || constraints.allowed_paths.iter().any(|p| path.starts_with(p.as_str()))
}

/// Returns the violation summary if `output` breaks a repo constraint.
pub fn check(output: &CodeOutput, constraints: &Constraints) -> Result<(), String> {
    if output.files_modified.len() as u32 > constraints.max_files_per_task {
        return Err(format!(
            "touches {} files, exceeding max_files_per_task={}",
            output.files_modified.len(),
            constraints.max_files_per_task
        ));
    }

    let changed = changed_line_count(&output.diff);
    if changed > constraints.max_diff_lines {
        return Err(format!("diff changes {changed} lines, exceeding max_diff_lines={}", constraints.max_diff_lines));
    }

    for path in &output.files_modified {
        if !path_allowed(path, constraints) {
            return Err(format!("path {path} is blocked or outside allowed_paths"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraints() -> Constraints {
        Constraints {
            allowed_paths: vec!["src/".to_string()],
            blocked_paths: vec!["src/secrets/".to_string()],
            max_diff_lines: 10,
            max_files_per_task: 2,
        }
    }

    fn output(files: Vec<&str>, diff: &str) -> CodeOutput {
        CodeOutput {
            diff: diff.to_string(),
            commit_message: "msg".to_string(),
            files_modified: files.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn rejects_path_outside_allowed_set() {
        let out = output(vec!["docs/readme.md"], "+x\n");
        assert!(check(&out, &constraints()).is_err());
    }

    #[test]
    fn rejects_blocked_path_even_if_under_allowed_prefix() {
        let out = output(vec!["src/secrets/key.rs"], "+x\n");
        assert!(check(&out, &constraints()).is_err());
    }

    #[test]
    fn rejects_diff_over_line_budget() {
        let diff = "+a\n+b\n+c\n+d\n+e\n+f\n+g\n+h\n+i\n+j\n+k\n";
        let out = output(vec!["src/lib.rs"], diff);
        assert!(check(&out, &constraints()).is_err());
    }

    #[test]
    fn allows_diff_within_every_constraint() {
        let out = output(vec!["src/lib.rs"], "+one line\n");
        assert!(check(&out, &constraints()).is_ok());
    }
}

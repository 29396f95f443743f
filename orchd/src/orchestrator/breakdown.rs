//! Pure helpers for Orchestrator step 1-2 (§4.6): turn a validated
//! `BreakdownOutput` into the child tasks and parent `OrchestrationState`
//! to materialize, without touching the store or any collaborator.

use contextstore::{OrchestrationState, SubtaskState, SubtaskStatus};

use crate::domain::Task;
use crate::llm::schemas::BreakdownOutput;

/// One subtask ready to materialize: its state-store representation plus
/// the child `Task` to create for it.
#[derive(Clone)]
pub struct PlannedSubtask {
    pub subtask: SubtaskState,
    pub child: Task,
}

/// Assigns each issue a stable id from its position (`s0`, `s1`, ...) and
/// resolves `dependencyGraph.edges` by matching node names against issue
/// titles - the breakdown schema has no explicit subtask id field, so
/// title is the only handle the dependency graph and the issue list
/// share.
pub fn plan_subtasks(parent: &Task, output: &BreakdownOutput) -> Vec<PlannedSubtask> {
    let ids: Vec<String> = (0..output.issues.len()).map(|i| format!("s{i}")).collect();
    let id_for_title = |title: &str| output.issues.iter().position(|issue| issue.title == title).map(|i| ids[i].clone());

    output
        .issues
        .iter()
        .enumerate()
        .map(|(index, issue)| {
            let depends_on: Vec<String> = output
                .dependency_graph
                .edges
                .iter()
                .filter(|edge| edge.to == issue.title)
                .filter_map(|edge| id_for_title(&edge.from))
                .collect();

            let child = Task::new_child(
                parent,
                index as u32,
                issue.target_files.clone(),
                issue.acceptance_criteria.clone(),
            );

            let subtask = SubtaskState {
                id: ids[index].clone(),
                title: issue.title.clone(),
                target_files: issue.target_files.clone(),
                depends_on,
                status: SubtaskStatus::Pending,
                child_task_id: Some(child.id.clone()),
                diff: None,
                attempts: 0,
            };

            PlannedSubtask { subtask, child }
        })
        .collect()
}

pub fn orchestration_state_for(planned: &[PlannedSubtask]) -> OrchestrationState {
    OrchestrationState {
        subtasks: planned.iter().map(|p| p.subtask.clone()).collect(),
        current_subtask: None,
        completed_subtasks: Vec::new(),
        aggregated_diff: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::schemas::{BreakdownIssue, ChangeType, DependencyEdge, DependencyGraph};

    fn issue(title: &str) -> BreakdownIssue {
        BreakdownIssue {
            title: title.to_string(),
            body: String::new(),
            target_files: vec![format!("{title}.rs")],
            change_type: ChangeType::Modify,
            dependencies: vec![],
            estimated_lines: 20,
            acceptance_criteria: vec![format!("{title} compiles")],
        }
    }

    #[test]
    fn dependency_edges_resolve_by_title_to_subtask_ids() {
        let parent = Task::new("acme/widgets", "issues/1", 3);
        let output = BreakdownOutput {
            should_breakdown: true,
            issues: vec![issue("core"), issue("tests")],
            dependency_graph: DependencyGraph {
                nodes: vec!["core".to_string(), "tests".to_string()],
                edges: vec![DependencyEdge {
                    from: "core".to_string(),
                    to: "tests".to_string(),
                }],
            },
            execution_plan: vec![],
        };

        let planned = plan_subtasks(&parent, &output);
        assert_eq!(planned.len(), 2);
        assert!(planned[0].subtask.depends_on.is_empty());
        assert_eq!(planned[1].subtask.depends_on, vec!["s0".to_string()]);
        assert_eq!(planned[1].child.parent_task_id, Some(parent.id.clone()));
    }

    #[test]
    fn orchestration_state_lists_every_planned_subtask() {
        let parent = Task::new("acme/widgets", "issues/1", 3);
        let output = BreakdownOutput {
            should_breakdown: true,
            issues: vec![issue("only")],
            dependency_graph: DependencyGraph::default(),
            execution_plan: vec![],
        };
        let planned = plan_subtasks(&parent, &output);
        let state = orchestration_state_for(&planned);
        assert_eq!(state.subtasks.len(), 1);
        assert_eq!(state.subtasks[0].child_task_id, planned[0].subtask.child_task_id);
    }
}

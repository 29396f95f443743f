//! CLI command definitions and subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "orchd", about = "Autonomous software-development orchestrator", version)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Operate on a batch of tasks against one repo
    Job {
        #[command(subcommand)]
        command: JobCommand,
    },
    /// Inspect or advance a single task
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
    /// Read the durable event log
    Events {
        #[command(subcommand)]
        command: EventsCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum JobCommand {
    /// Create a job with one task per issue reference
    Create {
        repo: String,
        /// Issue references, e.g. `issues/42`
        #[arg(required = true)]
        issues: Vec<String>,
    },
    /// Sweep the scheduler against a job's tasks until every task
    /// terminates or `max_sweeps` is reached
    Run {
        job_id: String,
        #[arg(long, default_value = "200")]
        max_sweeps: u32,
    },
    /// Request cancellation of every non-terminal task in a job
    Cancel { job_id: String },
    /// Show a job's derived status and summary
    Show { job_id: String },
}

#[derive(Debug, Subcommand)]
pub enum TaskCommand {
    /// Show a task's current state
    Show { task_id: String },
    /// Record an external merge signal for a task parked at WAITING_HUMAN
    Merge { task_id: String },
}

#[derive(Debug, Subcommand)]
pub enum EventsCommand {
    /// List recorded events for one task, in order
    Tail { task_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_job_create_with_multiple_issues() {
        let cli = Cli::parse_from(["orchd", "job", "create", "acme/widgets", "issues/1", "issues/2"]);
        match cli.command {
            Command::Job {
                command: JobCommand::Create { repo, issues },
            } => {
                assert_eq!(repo, "acme/widgets");
                assert_eq!(issues, vec!["issues/1".to_string(), "issues/2".to_string()]);
            }
            _ => panic!("expected JobCommand::Create"),
        }
    }

    #[test]
    fn parses_task_merge() {
        let cli = Cli::parse_from(["orchd", "task", "merge", "task-1"]);
        assert!(matches!(
            cli.command,
            Command::Task {
                command: TaskCommand::Merge { task_id }
            } if task_id == "task-1"
        ));
    }

    #[test]
    fn parses_events_tail() {
        let cli = Cli::parse_from(["orchd", "events", "tail", "task-1"]);
        assert!(matches!(
            cli.command,
            Command::Events {
                command: EventsCommand::Tail { task_id }
            } if task_id == "task-1"
        ));
    }
}

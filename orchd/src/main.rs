//! CLI entry point: wires `Config`, `StateManager`, `EventBus`, a
//! `RepoHost`, an `LlmClient`, and the `Orchestrator`, then dispatches
//! one subcommand before exiting.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use orchd::cli::{Cli, Command, EventsCommand, JobCommand, TaskCommand};
use orchd::collaborators::{MockRepoHost, RepoContext, RepoHost};
use orchd::config::Config;
use orchd::domain::{Job, Task};
use orchd::events::EventBus;
use orchd::job_controller;
use orchd::llm::{LlmClient, MockLlmClient, OpenAIClient};
use orchd::orchestrator::Orchestrator;
use orchd::scheduler::{Scheduler, SchedulerConfig};
use orchd::state::{StateManager, TaskFilter};

fn setup_logging(log_level: Option<&str>) {
    let level = log_level.map(str::to_uppercase).unwrap_or_else(|| "INFO".to_string());
    let level: tracing::Level = level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

/// Build the configured `LlmClient`: a real `OpenAIClient` when the
/// configured API key env var is set, otherwise an in-memory mock so
/// the CLI stays usable without credentials (no fixture server is
/// wired up here - that is a Non-goal per §6).
fn build_llm_client(config: &Config) -> Result<Arc<dyn LlmClient>> {
    if let Some(env_var) = &config.llm.api_key_env {
        if let Ok(api_key) = std::env::var(env_var) {
            let base_url = config.llm.base_url.clone().unwrap_or_else(|| "https://api.openai.com/v1".to_string());
            let client = OpenAIClient::new(api_key, base_url, Duration::from_secs(config.agent_timeout_secs))
                .context("failed to build OpenAI client")?;
            return Ok(Arc::new(client));
        }
    }
    info!("no LLM API key configured, falling back to a mock client");
    Ok(Arc::new(MockLlmClient::new(Vec::new())))
}

/// The code-host collaborator. A real REST/webhook client against a
/// forge is out of scope (§6 Non-goals); `MockRepoHost` stands in so
/// every CLI command still exercises the same `RepoHost` seam a real
/// integration would.
fn build_repo_host() -> Arc<dyn RepoHost> {
    Arc::new(MockRepoHost::new(RepoContext {
        default_branch: "main".to_string(),
        language: "rust".to_string(),
        framework: None,
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref());

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let state = StateManager::spawn(&config.store_path).context("failed to open task store")?;
    let events = Arc::new(EventBus::with_default_capacity());
    let repo_host = build_repo_host();
    let llm_client = build_llm_client(&config)?;

    let orchestrator = Arc::new(Orchestrator::new(state.clone(), repo_host, events, config.clone(), llm_client));

    match cli.command {
        Command::Job { command } => run_job_command(command, &state, orchestrator, &config).await,
        Command::Task { command } => run_task_command(command, &state, orchestrator).await,
        Command::Events { command } => run_events_command(command, &state).await,
    }
}

async fn run_job_command(
    command: JobCommand,
    state: &StateManager,
    orchestrator: Arc<Orchestrator>,
    config: &Config,
) -> Result<()> {
    match command {
        JobCommand::Create { repo, issues } => {
            let mut job = Job::new(repo.clone());
            for issue_ref in &issues {
                let mut task = Task::new(repo.clone(), issue_ref.clone(), config.max_attempts_per_task);
                task.job_id = Some(job.id.clone());
                let task = state.create_task(task).await?;
                job.add_task(task.id);
            }
            let job = state.create_job(job).await?;
            println!("created job {} with {} task(s)", job.id, job.task_ids.len());
            Ok(())
        }
        JobCommand::Run { job_id, max_sweeps } => {
            let scheduler_config = SchedulerConfig {
                worker_concurrency: config.worker_concurrency,
                agent_timeout: Duration::from_secs(config.agent_timeout_secs),
                task_wall_clock_budget: Duration::from_secs(config.task_wall_clock_budget_secs),
            };
            let scheduler = Scheduler::new(scheduler_config, state.clone(), orchestrator);

            for sweep in 0..max_sweeps {
                scheduler.run_sweep().await?;
                let tasks = state
                    .list_tasks(TaskFilter {
                        job_id: Some(job_id.clone()),
                        ..Default::default()
                    })
                    .await?;
                let status = job_controller::derive_status(&tasks.iter().map(|t| t.status).collect::<Vec<_>>());
                if !matches!(status, orchd::domain::JobStatus::Running | orchd::domain::JobStatus::Pending) {
                    info!(job_id, sweep, ?status, "job reached a terminal status");
                    break;
                }
            }

            print_job_status(state, &job_id).await
        }
        JobCommand::Cancel { job_id } => {
            let tasks = state
                .list_tasks(TaskFilter {
                    job_id: Some(job_id.clone()),
                    ..Default::default()
                })
                .await?;
            let cancellation = orchd::scheduler::CancellationRegistry::default();
            for task in &tasks {
                cancellation.cancel(&task.id).await;
            }
            println!("requested cancellation for {} task(s) in job {job_id}", tasks.len());
            Ok(())
        }
        JobCommand::Show { job_id } => print_job_status(state, &job_id).await,
    }
}

async fn print_job_status(state: &StateManager, job_id: &str) -> Result<()> {
    let job = state.get_job_required(job_id).await?;
    let tasks = state
        .list_tasks(TaskFilter {
            job_id: Some(job_id.to_string()),
            ..Default::default()
        })
        .await?;
    let status = job_controller::derive_status(&tasks.iter().map(|t| t.status).collect::<Vec<_>>());
    let summary = job_controller::derive_summary(&tasks);
    println!("job {} ({}): {status}", job.id, job.repo);
    println!(
        "  total={} completed={} failed={} in_progress={}",
        summary.total, summary.completed, summary.failed, summary.in_progress
    );
    for pr in &summary.prs {
        println!("  pr: {pr}");
    }
    Ok(())
}

async fn run_task_command(command: TaskCommand, state: &StateManager, orchestrator: Arc<Orchestrator>) -> Result<()> {
    match command {
        TaskCommand::Show { task_id } => {
            let task = state.get_task_required(&task_id).await?;
            println!("task {} [{}] status={}", task.id, task.issue_ref, task.status);
            if let Some(pr) = &task.pr_ref {
                println!("  pr: {pr}");
            }
            if let Some(error) = &task.last_error {
                println!("  last_error: {error}");
            }
            Ok(())
        }
        TaskCommand::Merge { task_id } => {
            let task = orchestrator.record_merge(&task_id).await?;
            println!("task {} merged, status={}", task.id, task.status);
            Ok(())
        }
    }
}

async fn run_events_command(command: EventsCommand, state: &StateManager) -> Result<()> {
    match command {
        EventsCommand::Tail { task_id } => {
            let events = state.list_events(&task_id).await?;
            for event in events {
                println!("{} {} {:?}", event.created_at, event.task_id, event.event_type);
            }
            Ok(())
        }
    }
}

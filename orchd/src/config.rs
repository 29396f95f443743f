//! Configuration, grounded in `contextstore::Config::load`'s
//! fallback-chain pattern: explicit path, then `.orchd.yml` in the
//! current directory, then the user's XDG config dir, then defaults.

use std::path::{Path, PathBuf};

use eyre::Result;
use serde::{Deserialize, Serialize};

use crate::domain::EstimatedComplexity;
use crate::diff::ConflictStrategy;

fn default_max_attempts_per_task() -> u32 {
    3
}
fn default_worker_concurrency() -> usize {
    4
}
fn default_agent_timeout_secs() -> u64 {
    120
}
fn default_task_wall_clock_budget_secs() -> u64 {
    3600
}
fn default_orchestration_enabled() -> bool {
    true
}
fn default_orchestration_complexity_threshold() -> EstimatedComplexity {
    EstimatedComplexity::L
}
fn default_conflict_strategy() -> ConflictStrategy {
    ConflictStrategy::Manual
}
fn default_auto_resolve_threshold() -> u32 {
    20
}
fn default_max_diff_lines() -> u32 {
    800
}
fn default_max_files_per_task() -> u32 {
    12
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-5".to_string(),
            base_url: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default = "default_max_attempts_per_task")]
    pub max_attempts_per_task: u32,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
    #[serde(default = "default_task_wall_clock_budget_secs")]
    pub task_wall_clock_budget_secs: u64,

    #[serde(default = "default_orchestration_enabled")]
    pub orchestration_enabled: bool,
    #[serde(default = "default_orchestration_complexity_threshold")]
    pub orchestration_complexity_threshold: EstimatedComplexity,

    #[serde(default = "default_conflict_strategy")]
    pub conflict_strategy: ConflictStrategy,
    #[serde(default = "default_auto_resolve_threshold")]
    pub auto_resolve_threshold: u32,

    #[serde(default = "default_max_diff_lines")]
    pub max_diff_lines: u32,
    #[serde(default = "default_max_files_per_task")]
    pub max_files_per_task: u32,
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default)]
    pub blocked_paths: Vec<String>,
}

fn default_store_path() -> PathBuf {
    dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("orchd")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            llm: LlmConfig::default(),
            max_attempts_per_task: default_max_attempts_per_task(),
            worker_concurrency: default_worker_concurrency(),
            agent_timeout_secs: default_agent_timeout_secs(),
            task_wall_clock_budget_secs: default_task_wall_clock_budget_secs(),
            orchestration_enabled: default_orchestration_enabled(),
            orchestration_complexity_threshold: default_orchestration_complexity_threshold(),
            conflict_strategy: default_conflict_strategy(),
            auto_resolve_threshold: default_auto_resolve_threshold(),
            max_diff_lines: default_max_diff_lines(),
            max_files_per_task: default_max_files_per_task(),
            allowed_paths: Vec::new(),
            blocked_paths: Vec::new(),
        }
    }
}

impl Config {
    /// Explicit path, then `.orchd.yml` in the current directory, then
    /// `$XDG_CONFIG_HOME/orchd/config.yml`, then defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::read(path);
        }

        let candidates = [
            Some(PathBuf::from(".orchd.yml")),
            dirs::config_dir().map(|p| p.join("orchd").join("config.yml")),
        ];
        for candidate in candidates.into_iter().flatten() {
            if candidate.exists() {
                return Self::read(&candidate);
            }
        }
        Ok(Config::default())
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = Config::default();
        assert_eq!(config.max_attempts_per_task, 3);
        assert_eq!(config.conflict_strategy, ConflictStrategy::Manual);
    }

    #[test]
    fn conflict_strategy_round_trips_through_yaml() {
        let config = Config {
            conflict_strategy: ConflictStrategy::MergeAdditive,
            ..Config::default()
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.conflict_strategy, ConflictStrategy::MergeAdditive);
    }

    #[test]
    fn missing_explicit_path_falls_back_to_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/path/config.yml")));
        assert!(config.is_err());
    }
}

//! Per-repo static memory: configuration and constraints that hold for
//! the lifetime of a task and are shared across every agent call made on
//! its behalf.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use taskstore::{IndexValue, Record, now_ms};

use crate::error::ContextResult;

/// Repo-level configuration (language, framework, default branch).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RepoConfig {
    pub language: String,
    #[serde(default)]
    pub framework: Option<String>,
    pub default_branch: String,
}

/// Policy constraints enforced on every task against this repo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default)]
    pub blocked_paths: Vec<String>,
    pub max_diff_lines: u32,
    pub max_files_per_task: u32,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            allowed_paths: Vec::new(),
            blocked_paths: Vec::new(),
            max_diff_lines: 800,
            max_files_per_task: 12,
        }
    }
}

/// Immutable (within a task's lifetime) per-repo memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticMemory {
    pub repo: String,
    pub config: RepoConfig,
    pub constraints: Constraints,
    #[serde(default)]
    pub agent_instructions: Option<String>,
    pub updated_at: i64,
}

impl StaticMemory {
    pub fn new(repo: impl Into<String>, config: RepoConfig, constraints: Constraints) -> Self {
        Self {
            repo: repo.into(),
            config,
            constraints,
            agent_instructions: None,
            updated_at: now_ms(),
        }
    }

    pub fn with_agent_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.agent_instructions = Some(instructions.into());
        self
    }

    /// Load from a YAML file (the on-disk form operators edit).
    pub fn load(path: impl AsRef<Path>) -> ContextResult<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> ContextResult<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// True if `path` may be touched by a task against this repo.
    pub fn path_is_allowed(&self, path: &str) -> bool {
        let blocked = self
            .constraints
            .blocked_paths
            .iter()
            .any(|pat| glob_match(pat, path));
        if blocked {
            return false;
        }
        if self.constraints.allowed_paths.is_empty() {
            return true;
        }
        self.constraints.allowed_paths.iter().any(|pat| glob_match(pat, path))
    }
}

fn glob_match(pattern: &str, path: &str) -> bool {
    glob::Pattern::new(pattern).map(|p| p.matches(path)).unwrap_or(false)
}

impl Record for StaticMemory {
    fn id(&self) -> &str {
        &self.repo
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "static_memory"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("repo".to_string(), IndexValue::Str(self.repo.clone()));
        fields
    }
}

/// Explicit, invalidatable in-process cache keyed by repo, so a hot loop
/// over many tasks for the same repo doesn't re-read the store (and
/// re-parse YAML) on every agent call. Updates to static memory call
/// [`StaticMemoryCache::invalidate`] rather than rewriting past events.
#[derive(Default)]
pub struct StaticMemoryCache {
    entries: RwLock<HashMap<String, Arc<StaticMemory>>>,
}

impl StaticMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, repo: &str) -> Option<Arc<StaticMemory>> {
        self.entries.read().unwrap().get(repo).cloned()
    }

    pub fn put(&self, memory: StaticMemory) -> Arc<StaticMemory> {
        let arc = Arc::new(memory);
        self.entries.write().unwrap().insert(arc.repo.clone(), arc.clone());
        arc
    }

    pub fn invalidate(&self, repo: &str) {
        self.entries.write().unwrap().remove(repo);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_allowed_when_no_allowlist_and_not_blocked() {
        let mem = StaticMemory::new(
            "acme/widgets",
            RepoConfig {
                language: "rust".into(),
                framework: None,
                default_branch: "main".into(),
            },
            Constraints {
                allowed_paths: vec![],
                blocked_paths: vec!["secrets/**".into()],
                max_diff_lines: 500,
                max_files_per_task: 5,
            },
        );
        assert!(mem.path_is_allowed("src/lib.rs"));
        assert!(!mem.path_is_allowed("secrets/keys.pem"));
    }

    #[test]
    fn path_requires_membership_in_allowlist_when_present() {
        let mem = StaticMemory::new(
            "acme/widgets",
            RepoConfig::default(),
            Constraints {
                allowed_paths: vec!["src/**".into()],
                blocked_paths: vec![],
                max_diff_lines: 500,
                max_files_per_task: 5,
            },
        );
        assert!(mem.path_is_allowed("src/main.rs"));
        assert!(!mem.path_is_allowed("infra/deploy.sh"));
    }

    #[test]
    fn cache_put_get_invalidate() {
        let cache = StaticMemoryCache::new();
        assert!(cache.get("acme/widgets").is_none());
        cache.put(StaticMemory::new("acme/widgets", RepoConfig::default(), Constraints::default()));
        assert!(cache.get("acme/widgets").is_some());
        cache.invalidate("acme/widgets");
        assert!(cache.get("acme/widgets").is_none());
    }
}

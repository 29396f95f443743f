//! Builds the lightweight repo map handed to planner/coder agents: a
//! flat listing of paths the task is allowed to touch, plus an optional
//! grep-backed snippet search so an agent can be handed a few matching
//! lines instead of whole files.

use std::path::Path;

use grep_matcher::Matcher;
use grep_regex::RegexMatcher;
use grep_searcher::{Searcher, sinks::UTF8};
use walkdir::WalkDir;

use crate::error::ContextResult;
use crate::static_memory::StaticMemory;

/// One path entry in a compiled repo map.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RepoMapEntry {
    pub path: String,
    pub is_dir: bool,
}

/// Walk `root`, keeping only entries [`StaticMemory::path_is_allowed`]
/// permits, capped at `max_entries` (the map is context for a prompt,
/// not a full tree).
pub fn build_repo_map(root: impl AsRef<Path>, static_memory: &StaticMemory, max_entries: usize) -> Vec<RepoMapEntry> {
    let root = root.as_ref();
    let mut entries = Vec::new();

    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name().to_str().is_none_or(|n| !n.starts_with(".git")))
        .filter_map(Result::ok)
    {
        if entries.len() >= max_entries {
            break;
        }
        let rel = match entry.path().strip_prefix(root) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        if !static_memory.path_is_allowed(&rel_str) {
            continue;
        }
        entries.push(RepoMapEntry {
            path: rel_str,
            is_dir: entry.file_type().is_dir(),
        });
    }

    entries
}

/// One matching line from [`search_repo`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SearchHit {
    pub path: String,
    pub line_number: u64,
    pub line: String,
}

/// Grep `pattern` across the allowed files under `root`, returning up to
/// `max_hits` matches. Used to hand an agent a handful of relevant lines
/// (e.g. a symbol definition) instead of whole files when the task's
/// target files are not already known.
pub fn search_repo(
    root: impl AsRef<Path>,
    static_memory: &StaticMemory,
    pattern: &str,
    max_hits: usize,
) -> ContextResult<Vec<SearchHit>> {
    let root = root.as_ref();
    let matcher = RegexMatcher::new(pattern)?;
    let mut hits = Vec::new();

    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name().to_str().is_none_or(|n| !n.starts_with(".git")))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        if hits.len() >= max_hits {
            break;
        }
        let rel = match entry.path().strip_prefix(root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        if !static_memory.path_is_allowed(&rel) {
            continue;
        }

        let path = entry.path().to_path_buf();
        let rel_for_sink = rel.clone();
        let remaining = max_hits - hits.len();
        let mut local_hits = Vec::new();
        let result = Searcher::new().search_path(
            &matcher,
            &path,
            UTF8(|line_number, line| {
                if local_hits.len() >= remaining {
                    return Ok(false);
                }
                local_hits.push(SearchHit {
                    path: rel_for_sink.clone(),
                    line_number,
                    line: line.trim_end().to_string(),
                });
                Ok(true)
            }),
        );
        if result.is_ok() {
            hits.extend(local_hits);
        }
    }

    Ok(hits)
}

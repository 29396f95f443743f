//! Diff Aggregator (§4.7): merges each child subtask's diff into one
//! unified diff for the parent, or reports a conflict that needs a human.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::parser::{DiffHunk, FileDiff, ParseError, parse_unified_diff, render_file_diff};

#[derive(Debug, Clone)]
pub struct SubtaskDiff {
    pub subtask_id: String,
    pub diff: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    LastWins,
    FirstWins,
    MergeAdditive,
    Manual,
}

#[derive(Debug, Clone)]
pub struct FileChangeSummary {
    pub path: String,
    pub insertions: u32,
    pub deletions: u32,
    pub is_new_file: bool,
    pub is_deleted: bool,
    pub contributing_subtasks: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ConflictEntry {
    pub file: String,
    pub subtasks: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConflictReport {
    pub conflicts: Vec<ConflictEntry>,
}

#[derive(Debug, Clone)]
pub enum AggregationResult {
    Aggregated { diff: String, summaries: Vec<FileChangeSummary> },
    ManualRequired(ConflictReport),
}

struct TaggedHunk {
    subtask_id: String,
    subtask_order: usize,
    hunk: DiffHunk,
}

struct TaggedFile {
    is_new_file: bool,
    is_deleted: bool,
    hunks: Vec<TaggedHunk>,
}

/// Run the six-step algorithm over `subtask_diffs` in the given order
/// (their index is the tie-break for `first_wins`/`last_wins`).
pub fn aggregate(
    subtask_diffs: &[SubtaskDiff],
    strategy: ConflictStrategy,
    auto_resolve_threshold: u32,
) -> Result<AggregationResult, ParseError> {
    // Step 1: parse, and reject create-vs-modify conflicts up front.
    let mut created_by: HashMap<String, Vec<String>> = HashMap::new();
    let mut modified_by: HashMap<String, Vec<String>> = HashMap::new();
    let mut by_file: HashMap<String, TaggedFile> = HashMap::new();

    for (order, subtask) in subtask_diffs.iter().enumerate() {
        let files = parse_unified_diff(&subtask.diff)?;
        for file in files {
            if file.is_new_file {
                created_by.entry(file.path.clone()).or_default().push(subtask.subtask_id.clone());
            } else {
                modified_by.entry(file.path.clone()).or_default().push(subtask.subtask_id.clone());
            }
            let entry = by_file.entry(file.path.clone()).or_insert_with(|| TaggedFile {
                is_new_file: file.is_new_file,
                is_deleted: file.is_deleted,
                hunks: Vec::new(),
            });
            entry.is_new_file |= file.is_new_file;
            entry.is_deleted |= file.is_deleted;
            for hunk in file.hunks {
                entry.hunks.push(TaggedHunk {
                    subtask_id: subtask.subtask_id.clone(),
                    subtask_order: order,
                    hunk,
                });
            }
        }
    }

    let mut report = ConflictReport::default();
    for (path, creators) in &created_by {
        if let Some(modifiers) = modified_by.get(path) {
            let mut subtasks = creators.clone();
            subtasks.extend(modifiers.clone());
            report.conflicts.push(ConflictEntry {
                file: path.clone(),
                subtasks,
                reason: "file created by one subtask and modified by another".to_string(),
            });
        }
    }
    if !report.conflicts.is_empty() {
        return Ok(AggregationResult::ManualRequired(report));
    }

    // Steps 2-5: per file, group, detect conflicting clusters, resolve.
    let mut summaries = Vec::new();
    let mut rendered_files = Vec::new();

    let mut paths: Vec<&String> = by_file.keys().collect();
    paths.sort();

    for path in paths {
        let tagged = by_file.remove(path).unwrap();
        let clusters = cluster_overlapping(tagged.hunks);

        let mut resolved_hunks = Vec::new();
        let mut contributing = std::collections::BTreeSet::new();

        for cluster in clusters {
            let distinct_subtasks: std::collections::HashSet<&str> =
                cluster.iter().map(|h| h.subtask_id.as_str()).collect();

            if distinct_subtasks.len() <= 1 {
                for h in &cluster {
                    contributing.insert(h.subtask_id.clone());
                }
                resolved_hunks.extend(cluster.into_iter().map(|h| h.hunk));
                continue;
            }

            match resolve_conflict(cluster, strategy, auto_resolve_threshold) {
                Ok((hunk, subtasks)) => {
                    contributing.extend(subtasks);
                    resolved_hunks.push(hunk);
                }
                Err(subtasks) => {
                    report.conflicts.push(ConflictEntry {
                        file: path.clone(),
                        subtasks,
                        reason: "overlapping hunks could not be auto-resolved".to_string(),
                    });
                }
            }
        }

        if !report.conflicts.is_empty() {
            continue;
        }

        resolved_hunks.sort_by_key(|h| h.old_start);
        recompute_offsets(&mut resolved_hunks);

        let insertions: u32 = resolved_hunks
            .iter()
            .flat_map(|h| h.lines.iter())
            .filter(|l| l.starts_with('+'))
            .count() as u32;
        let deletions: u32 = resolved_hunks
            .iter()
            .flat_map(|h| h.lines.iter())
            .filter(|l| l.starts_with('-'))
            .count() as u32;

        summaries.push(FileChangeSummary {
            path: path.clone(),
            insertions,
            deletions,
            is_new_file: tagged.is_new_file,
            is_deleted: tagged.is_deleted,
            contributing_subtasks: contributing.into_iter().collect(),
        });
        rendered_files.push(FileDiff {
            path: path.clone(),
            is_new_file: tagged.is_new_file,
            is_deleted: tagged.is_deleted,
            hunks: resolved_hunks,
        });
    }

    if !report.conflicts.is_empty() {
        return Ok(AggregationResult::ManualRequired(report));
    }

    let diff = rendered_files.iter().map(render_file_diff).collect::<Vec<_>>().join("");
    Ok(AggregationResult::Aggregated { diff, summaries })
}

/// Two hunks conflict iff they come from different subtasks and their
/// old-line ranges overlap as closed intervals (§4.7 step 3). Clusters
/// transitively merge any hunks that overlap, so a chain A-B, B-C groups
/// as one cluster even if A and C don't directly overlap.
fn cluster_overlapping(mut hunks: Vec<TaggedHunk>) -> Vec<Vec<TaggedHunk>> {
    hunks.sort_by_key(|h| h.hunk.old_start);
    let mut clusters: Vec<Vec<TaggedHunk>> = Vec::new();

    'outer: for hunk in hunks {
        for cluster in clusters.iter_mut() {
            if cluster.iter().any(|existing| ranges_overlap(existing, &hunk)) {
                cluster.push(hunk);
                continue 'outer;
            }
        }
        clusters.push(vec![hunk]);
    }
    clusters
}

fn ranges_overlap(a: &TaggedHunk, b: &TaggedHunk) -> bool {
    a.hunk.old_start <= b.hunk.old_end() && b.hunk.old_start <= a.hunk.old_end()
}

/// Resolve one conflicting cluster (hunks from ≥2 subtasks) per policy.
/// Returns the surviving hunk plus the subtask ids it is attributed to,
/// or the full set of involved subtasks on failure to resolve.
fn resolve_conflict(
    mut cluster: Vec<TaggedHunk>,
    strategy: ConflictStrategy,
    auto_resolve_threshold: u32,
) -> Result<(DiffHunk, Vec<String>), Vec<String>> {
    let involved: Vec<String> = cluster.iter().map(|h| h.subtask_id.clone()).collect();

    match strategy {
        ConflictStrategy::LastWins => {
            cluster.sort_by_key(|h| h.subtask_order);
            let winner = cluster.pop().unwrap();
            Ok((winner.hunk, vec![winner.subtask_id]))
        }
        ConflictStrategy::FirstWins => {
            cluster.sort_by_key(|h| h.subtask_order);
            let winner = cluster.into_iter().next().unwrap();
            Ok((winner.hunk, vec![winner.subtask_id]))
        }
        ConflictStrategy::MergeAdditive => {
            let all_pure_additions = cluster.iter().all(|h| h.hunk.old_lines == 0);
            let combined_lines: usize = cluster.iter().map(|h| h.hunk.lines.len()).sum();
            if !all_pure_additions || combined_lines as u32 > auto_resolve_threshold {
                return Err(involved);
            }
            cluster.sort_by_key(|h| h.subtask_order);
            let old_start = cluster[0].hunk.old_start;
            let new_start = cluster[0].hunk.new_start;
            let mut lines = Vec::new();
            for h in &cluster {
                lines.extend(h.hunk.lines.clone());
            }
            let mut merged = DiffHunk {
                old_start,
                old_lines: 0,
                new_start,
                new_lines: 0,
                lines,
            };
            merged.recount();
            Ok((merged, involved))
        }
        ConflictStrategy::Manual => Err(involved),
    }
}

/// Recompute `new_start`/`old_lines`/`new_lines` for a file's final,
/// ascending-`old_start` hunk list so offsets stay consistent after
/// merging hunks from different subtasks (§4.7 step 5).
fn recompute_offsets(hunks: &mut [DiffHunk]) {
    let mut delta: i64 = 0;
    for hunk in hunks.iter_mut() {
        hunk.recount();
        hunk.new_start = (hunk.old_start as i64 + delta).max(0) as u32;
        delta += hunk.new_lines as i64 - hunk.old_lines as i64;
    }
}

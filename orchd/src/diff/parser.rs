//! A minimal unified-diff parser: just enough structure (files, hunks,
//! hunk header numbers, raw hunk body lines) for the aggregator to
//! detect overlaps and recompute headers. No crate in the corpus covers
//! this, so it is hand-rolled rather than imported (§4.7).

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffHunk {
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
    /// Raw body lines, each still carrying its leading ` `/`+`/`-` marker.
    pub lines: Vec<String>,
}

impl DiffHunk {
    pub fn old_end(&self) -> u32 {
        if self.old_lines == 0 {
            self.old_start
        } else {
            self.old_start + self.old_lines - 1
        }
    }

    /// Recompute `old_lines`/`new_lines` from the body's marker lines.
    pub fn recount(&mut self) {
        self.old_lines = self.lines.iter().filter(|l| !l.starts_with('+')).count() as u32;
        self.new_lines = self.lines.iter().filter(|l| !l.starts_with('-')).count() as u32;
    }

    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_lines, self.new_start, self.new_lines
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub path: String,
    pub is_new_file: bool,
    pub is_deleted: bool,
    pub hunks: Vec<DiffHunk>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed hunk header: {0}")]
    MalformedHeader(String),
    #[error("hunk body before any file header")]
    HunkWithoutFile,
}

/// Parse a unified diff into one [`FileDiff`] per `--- a/... +++ b/...`
/// pair. Tolerant of a leading `diff --git` line, which is ignored.
pub fn parse_unified_diff(text: &str) -> Result<Vec<FileDiff>, ParseError> {
    let mut files = Vec::new();
    let mut current: Option<FileDiff> = None;
    let mut current_hunk: Option<DiffHunk> = None;

    for line in text.lines() {
        if line.starts_with("diff --git") {
            continue;
        }
        if let Some(path) = line.strip_prefix("--- ") {
            finish_hunk(&mut current, &mut current_hunk);
            if let Some(f) = current.take() {
                files.push(f);
            }
            let is_new_file = path.trim() == "/dev/null";
            current = Some(FileDiff {
                path: strip_prefix_marker(path),
                is_new_file,
                is_deleted: false,
                hunks: Vec::new(),
            });
            continue;
        }
        if let Some(path) = line.strip_prefix("+++ ") {
            if let Some(f) = current.as_mut() {
                if path.trim() == "/dev/null" {
                    f.is_deleted = true;
                } else if f.path.is_empty() || f.is_new_file {
                    f.path = strip_prefix_marker(path);
                }
            }
            continue;
        }
        if line.starts_with("@@ ") {
            finish_hunk(&mut current, &mut current_hunk);
            current_hunk = Some(parse_hunk_header(line)?);
            continue;
        }
        if current_hunk.is_some() {
            current_hunk.as_mut().unwrap().lines.push(line.to_string());
        }
    }
    finish_hunk(&mut current, &mut current_hunk);
    if let Some(f) = current.take() {
        files.push(f);
    }
    Ok(files)
}

fn finish_hunk(file: &mut Option<FileDiff>, hunk: &mut Option<DiffHunk>) {
    if let (Some(f), Some(h)) = (file.as_mut(), hunk.take()) {
        f.hunks.push(h);
    }
}

fn strip_prefix_marker(path: &str) -> String {
    let path = path.trim();
    path.strip_prefix("a/").or_else(|| path.strip_prefix("b/")).unwrap_or(path).to_string()
}

fn parse_hunk_header(line: &str) -> Result<DiffHunk, ParseError> {
    let body = line
        .strip_prefix("@@ ")
        .and_then(|rest| rest.split(" @@").next())
        .ok_or_else(|| ParseError::MalformedHeader(line.to_string()))?;

    let mut parts = body.split_whitespace();
    let old = parts.next().ok_or_else(|| ParseError::MalformedHeader(line.to_string()))?;
    let new = parts.next().ok_or_else(|| ParseError::MalformedHeader(line.to_string()))?;

    let (old_start, old_lines) = parse_range(old.trim_start_matches('-'), &line)?;
    let (new_start, new_lines) = parse_range(new.trim_start_matches('+'), &line)?;

    Ok(DiffHunk {
        old_start,
        old_lines,
        new_start,
        new_lines,
        lines: Vec::new(),
    })
}

fn parse_range(range: &str, whole_line: &str) -> Result<(u32, u32), ParseError> {
    let err = || ParseError::MalformedHeader(whole_line.to_string());
    if let Some((start, count)) = range.split_once(',') {
        Ok((start.parse().map_err(|_| err())?, count.parse().map_err(|_| err())?))
    } else {
        Ok((range.parse().map_err(|_| err())?, 1))
    }
}

/// Render a file's hunks back into unified-diff text.
pub fn render_file_diff(file: &FileDiff) -> String {
    let mut out = String::new();
    let old_label = if file.is_new_file { "/dev/null".to_string() } else { format!("a/{}", file.path) };
    let new_label = if file.is_deleted { "/dev/null".to_string() } else { format!("b/{}", file.path) };
    out.push_str(&format!("--- {old_label}\n+++ {new_label}\n"));
    for hunk in &file.hunks {
        out.push_str(&hunk.header());
        out.push('\n');
        for line in &hunk.lines {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

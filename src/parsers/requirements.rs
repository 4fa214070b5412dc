//! Parser for requirements.txt-style requirement line lists.
//!
//! Each line is `name[extras]<op>version [; marker] [# comment]`. The
//! parser tolerates inline comments, editable `-e` markers, VCS URLs
//! (`git+...@ref`), and `-r other-file` inclusions (skipped, never
//! recursed). Invalid lines are skipped and collected as diagnostics, not
//! raised. Dev classification comes from the filename when the format has
//! no explicit marker (`requirements-dev.txt`, `test-requirements.txt`).

use tracing::debug;

use super::{DirectRanges, Parser, clean_version};
use crate::error::ScanError;
use crate::formats::FormatId;
use crate::graph::{Dependency, Ecosystem};

/// Filename substrings that mark a requirements file as development-only.
const DEV_FILENAME_HINTS: &[&str] = &["dev", "test", "testing", "lint", "format", "doc", "build"];

/// Parser for requirement-line files
#[derive(Debug, Default)]
pub struct RequirementsParser {
    dev: bool,
}

impl RequirementsParser {
    pub fn new() -> Self {
        Self { dev: false }
    }

    /// Construct with dev classification derived from the filename.
    pub fn for_filename(filename: &str) -> Self {
        Self {
            dev: is_dev_filename(filename),
        }
    }
}

/// Filename heuristic for dev requirements (`requirements-dev.txt`,
/// `test_requirements.txt`, ...).
pub fn is_dev_filename(filename: &str) -> bool {
    let basename = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .to_lowercase();
    DEV_FILENAME_HINTS.iter().any(|hint| basename.contains(hint))
}

impl Parser for RequirementsParser {
    fn parse(&self, content: &str) -> Result<Vec<Dependency>, ScanError> {
        if content.trim().is_empty() {
            return Err(ScanError::EmptyInput);
        }

        let mut deps = Vec::new();
        let mut skipped = 0usize;

        for line in content.lines() {
            match parse_line(line) {
                LineResult::Dependency(name, version) => {
                    deps.push(
                        Dependency::direct(&name, &version, Ecosystem::PyPi).dev(self.dev),
                    );
                }
                LineResult::Blank => {}
                LineResult::Skipped => skipped += 1,
            }
        }

        if skipped > 0 {
            debug!("skipped {skipped} unparsable or non-requirement line(s)");
        }
        Ok(deps)
    }

    fn supported_formats(&self) -> &[FormatId] {
        &[FormatId::Requirements]
    }
}

enum LineResult {
    Dependency(String, String),
    Blank,
    Skipped,
}

fn parse_line(line: &str) -> LineResult {
    let trimmed = line.trim();

    if trimmed.is_empty() || trimmed.starts_with('#') {
        return LineResult::Blank;
    }

    // Inline comments
    let without_comment = trimmed.split('#').next().unwrap_or(trimmed).trim();
    if without_comment.is_empty() {
        return LineResult::Blank;
    }

    // File inclusions and pip options are never recursed into
    if without_comment.starts_with("-r ")
        || without_comment.starts_with("-c ")
        || without_comment.starts_with("--")
    {
        return LineResult::Skipped;
    }

    // Editable installs: strip the marker and parse the remainder
    let spec = without_comment.strip_prefix("-e ").unwrap_or(without_comment).trim();

    if spec.contains("git+") || spec.starts_with("hg+") || spec.starts_with("svn+") {
        return parse_vcs_url(spec);
    }

    // `pkg @ https://...` direct-URL requirements carry no usable version
    if spec.contains(" @ ") {
        return LineResult::Skipped;
    }

    parse_requirement(spec)
}

/// Parse a plain PEP 508-ish requirement: `Name[extra]>=1.0,<2.0 ; marker`.
/// Returns the normalized name and cleaned version, or `None` for lines
/// that carry no usable pin.
pub(crate) fn parse_pep508(spec: &str) -> Option<(String, String)> {
    match parse_requirement(spec) {
        LineResult::Dependency(name, version) => Some((name, version)),
        _ => None,
    }
}

fn parse_requirement(spec: &str) -> LineResult {
    let Some((name, range)) = parse_pep508_range(spec) else {
        return LineResult::Skipped;
    };
    let version = clean_version(&range);
    if version.is_empty() {
        return LineResult::Skipped;
    }
    LineResult::Dependency(name, version)
}

/// Split `Name[extra]>=1.0,<2.0 ; marker` into the normalized name and the
/// raw specifier, keeping the full declared range.
pub(crate) fn parse_pep508_range(spec: &str) -> Option<(String, String)> {
    // Environment markers
    let spec = spec.split(';').next().unwrap_or(spec).trim();

    let operators = ["===", "==", ">=", "<=", "!=", "~=", ">", "<"];
    let mut op_pos = spec.len();
    for op in operators {
        if let Some(pos) = spec.find(op) {
            op_pos = op_pos.min(pos);
        }
    }

    let name_part = &spec[..op_pos];
    let name = name_part.split('[').next().unwrap_or(name_part).trim();
    if name.is_empty() || !name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
        return None;
    }

    if op_pos == spec.len() {
        // Bare name, no version pin: nothing to match against
        return None;
    }

    let range = spec[op_pos..].trim();
    if range.is_empty() {
        return None;
    }
    Some((normalize_name(name), range.to_string()))
}

/// Raw declared ranges of a requirements file (`flask>=2.0,<3.0` keeps
/// `>=2.0,<3.0`), for the transitive resolver. The whole file is dev or
/// not, per the filename heuristic.
pub fn direct_ranges(content: &str, filename: &str) -> Result<DirectRanges, ScanError> {
    if content.trim().is_empty() {
        return Err(ScanError::EmptyInput);
    }
    let dev = is_dev_filename(filename);
    let mut ranges = DirectRanges::default();
    for line in content.lines() {
        if let Some((name, range)) = parse_line_range(line) {
            let target = if dev {
                &mut ranges.dev_dependencies
            } else {
                &mut ranges.dependencies
            };
            target.insert(name, range);
        }
    }
    Ok(ranges)
}

/// Like [`parse_line`] but keeps the declared specifier instead of
/// cleaning it to one version.
fn parse_line_range(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let without_comment = trimmed.split('#').next().unwrap_or(trimmed).trim();
    if without_comment.is_empty()
        || without_comment.starts_with("-r ")
        || without_comment.starts_with("-c ")
        || without_comment.starts_with("--")
    {
        return None;
    }

    let spec = without_comment.strip_prefix("-e ").unwrap_or(without_comment).trim();

    if spec.contains("git+") || spec.starts_with("hg+") || spec.starts_with("svn+") {
        // A VCS ref is already pinned; it passes through as an exact range
        return match parse_vcs_url(spec) {
            LineResult::Dependency(name, version) => Some((name, version)),
            _ => None,
        };
    }

    if spec.contains(" @ ") {
        return None;
    }

    parse_pep508_range(spec)
}

/// Parse a VCS requirement like
/// `git+https://github.com/user/repo.git@v1.2.3#egg=package`.
fn parse_vcs_url(spec: &str) -> LineResult {
    let name = spec
        .split("#egg=")
        .nth(1)
        .map(|egg| egg.split(['&', '[']).next().unwrap_or(egg).to_string())
        .or_else(|| repo_name_from_url(spec));

    let Some(name) = name.filter(|n| !n.is_empty()) else {
        return LineResult::Skipped;
    };

    // `...@ref` after the repo path names the pinned revision
    let version = spec
        .split('#')
        .next()
        .and_then(|base| {
            let after_scheme = base.splitn(2, "://").nth(1)?;
            after_scheme.rsplit_once('@').map(|(_, r)| r.to_string())
        })
        .map(|r| r.trim_start_matches('v').to_string())
        .unwrap_or_else(|| "unknown".to_string());

    LineResult::Dependency(normalize_name(&name), version)
}

/// Last path segment of a repo URL, without the `.git` suffix or `@ref`.
fn repo_name_from_url(spec: &str) -> Option<String> {
    let without_fragment = spec.split('#').next()?;
    let after_scheme = without_fragment.splitn(2, "://").nth(1)?;
    let without_ref = after_scheme
        .rsplit_once('@')
        .map_or(after_scheme, |(base, _)| base);
    let last = without_ref.rsplit('/').next()?;
    let name = last.trim_end_matches(".git");
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// PEP 503 normalization: lowercase, `_`/`.` → `-`.
fn normalize_name(name: &str) -> String {
    name.to_lowercase().replace(['_', '.'], "-")
}

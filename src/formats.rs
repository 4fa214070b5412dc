//! Dependency file format detection and best-file selection.
//!
//! A filename (plus a peek at the content where filenames are ambiguous,
//! e.g. `package-lock.json` v1 vs v2/v3) maps to a [`FormatId`]. Lockfiles
//! outrank manifests: when several files are available for one ecosystem,
//! [`select_best`] picks the most authoritative one.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;
use crate::graph::Ecosystem;

/// Identifier for a supported dependency file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatId {
    /// package-lock.json with nested `dependencies` objects (lockfileVersion 1)
    PackageLockV1,
    /// package-lock.json with a flat `packages` map (lockfileVersion 2/3)
    PackageLockV2,
    /// yarn.lock line-oriented block format
    YarnLock,
    /// `npm ls --json` installed-tree snapshot
    NpmLsTree,
    /// package.json manifest
    PackageJson,
    /// poetry.lock `[[package]]` TOML
    PoetryLock,
    /// Pipfile.lock category-keyed JSON
    PipfileLock,
    /// pyproject.toml (PEP 621 or poetry tables)
    Pyproject,
    /// Pipfile `[packages]`/`[dev-packages]` TOML
    Pipfile,
    /// requirements.txt-style requirement lines
    Requirements,
}

impl FormatId {
    /// The ecosystem this format belongs to.
    pub fn ecosystem(&self) -> Ecosystem {
        match self {
            FormatId::PackageLockV1
            | FormatId::PackageLockV2
            | FormatId::YarnLock
            | FormatId::NpmLsTree
            | FormatId::PackageJson => Ecosystem::Npm,
            FormatId::PoetryLock
            | FormatId::PipfileLock
            | FormatId::Pyproject
            | FormatId::Pipfile
            | FormatId::Requirements => Ecosystem::PyPi,
        }
    }

    /// Whether this format pins resolved versions (as opposed to ranges).
    pub fn is_lockfile(&self) -> bool {
        matches!(
            self,
            FormatId::PackageLockV1
                | FormatId::PackageLockV2
                | FormatId::YarnLock
                | FormatId::NpmLsTree
                | FormatId::PoetryLock
                | FormatId::PipfileLock
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatId::PackageLockV1 => "package-lock.json (v1)",
            FormatId::PackageLockV2 => "package-lock.json (v2/v3)",
            FormatId::YarnLock => "yarn.lock",
            FormatId::NpmLsTree => "npm ls tree",
            FormatId::PackageJson => "package.json",
            FormatId::PoetryLock => "poetry.lock",
            FormatId::PipfileLock => "Pipfile.lock",
            FormatId::Pyproject => "pyproject.toml",
            FormatId::Pipfile => "Pipfile",
            FormatId::Requirements => "requirements.txt",
        }
    }
}

impl std::fmt::Display for FormatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority rank for a format; lower is more authoritative. Lockfiles
/// always outrank manifests within an ecosystem.
pub fn priority(format: FormatId) -> u8 {
    match format {
        FormatId::PackageLockV1 | FormatId::PackageLockV2 => 0,
        FormatId::YarnLock => 1,
        FormatId::NpmLsTree => 2,
        FormatId::PackageJson => 3,
        FormatId::PoetryLock => 0,
        FormatId::PipfileLock => 1,
        FormatId::Pyproject => 2,
        FormatId::Pipfile => 3,
        FormatId::Requirements => 4,
    }
}

/// Map a filename (plus a peek at the content) to a format.
pub fn detect(filename: &str, content: &str) -> Result<FormatId, ScanError> {
    let basename = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    match basename {
        "package-lock.json" | "npm-shrinkwrap.json" => Ok(detect_package_lock_version(content)),
        "yarn.lock" => Ok(FormatId::YarnLock),
        "npm-ls.json" => Ok(FormatId::NpmLsTree),
        "package.json" => Ok(FormatId::PackageJson),
        "poetry.lock" => Ok(FormatId::PoetryLock),
        "Pipfile.lock" => Ok(FormatId::PipfileLock),
        "Pipfile" => Ok(FormatId::Pipfile),
        "pyproject.toml" => Ok(FormatId::Pyproject),
        _ if is_requirements_filename(basename) => Ok(FormatId::Requirements),
        _ => Err(ScanError::UnsupportedFormat {
            filename: filename.to_string(),
        }),
    }
}

/// requirements.txt and its common variants (requirements-dev.txt,
/// dev-requirements.txt, test_requirements.txt, ...)
fn is_requirements_filename(basename: &str) -> bool {
    let lower = basename.to_lowercase();
    lower.ends_with(".txt") && (lower.contains("requirements") || lower.contains("constraints"))
}

/// Peek at the lockfile body to tell v1 apart from v2/v3.
///
/// v2/v3 carry a `lockfileVersion >= 2` and a flat `packages` map; v1 has
/// `lockfileVersion: 1` (or none at all in very old files) and nested
/// `dependencies` objects.
fn detect_package_lock_version(content: &str) -> FormatId {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(content) {
        if let Some(version) = value.get("lockfileVersion").and_then(|v| v.as_u64()) {
            return if version >= 2 {
                FormatId::PackageLockV2
            } else {
                FormatId::PackageLockV1
            };
        }
        if value.get("packages").is_some() {
            return FormatId::PackageLockV2;
        }
    }
    FormatId::PackageLockV1
}

/// Fixed per-ecosystem selection order, most authoritative first.
fn candidate_order(ecosystem: Ecosystem) -> &'static [&'static str] {
    match ecosystem {
        Ecosystem::Npm => &[
            "package-lock.json",
            "npm-shrinkwrap.json",
            "yarn.lock",
            "npm-ls.json",
            "package.json",
        ],
        Ecosystem::PyPi => &[
            "poetry.lock",
            "Pipfile.lock",
            "pyproject.toml",
            "Pipfile",
            "requirements.txt",
        ],
    }
}

/// Walk the ecosystem's fixed priority list over the available files and
/// return the first match. Requirements-style filenames are matched by
/// pattern so `requirements-dev.txt` still qualifies when no plain
/// `requirements.txt` exists.
pub fn select_best(
    ecosystem: Ecosystem,
    files: &HashMap<String, String>,
) -> Result<(String, FormatId), ScanError> {
    for candidate in candidate_order(ecosystem) {
        if let Some(content) = files.get(*candidate) {
            return detect(candidate, content).map(|f| (candidate.to_string(), f));
        }
    }

    if ecosystem == Ecosystem::PyPi {
        let mut names: Vec<&String> = files
            .keys()
            .filter(|name| is_requirements_filename(name))
            .collect();
        names.sort();
        if let Some(name) = names.first() {
            return Ok(((*name).clone(), FormatId::Requirements));
        }
    }

    Err(ScanError::NoSupportedFiles { ecosystem })
}

//! Parsers for dependency files (lockfiles, manifests, tree snapshots).
//!
//! One implementation per [`FormatId`]; [`parser_for_file`] is the factory
//! that maps a detected format to its parser. Parsers turn raw text into a
//! flat list of [`Dependency`] records with provenance paths and never
//! partially mutate caller state: they either return a list or a
//! [`ScanError`].

use std::collections::BTreeMap;

use crate::error::ScanError;
use crate::formats::FormatId;
use crate::graph::Dependency;

pub mod npm_tree;
pub mod package_json;
pub mod package_lock;
pub mod pipfile;
pub mod pipfile_lock;
pub mod poetry_lock;
pub mod pyproject;
pub mod requirements;
pub mod yarn_lock;

/// Trait for parsing dependency files.
///
/// A parser that finds zero dependencies returns an empty list, not an
/// error; an error means the input itself was empty or structurally
/// invalid.
pub trait Parser: Send + Sync {
    /// Parse the given file content and extract dependencies.
    fn parse(&self, content: &str) -> Result<Vec<Dependency>, ScanError>;

    /// The formats this parser accepts.
    fn supported_formats(&self) -> &[FormatId];
}

/// Map a detected format to its parser.
///
/// The filename is threaded through because requirements-style files carry
/// their dev classification in the name (`requirements-dev.txt`).
pub fn parser_for_file(filename: &str, format: FormatId) -> Box<dyn Parser> {
    match format {
        FormatId::PackageJson => Box::new(package_json::PackageJsonParser::new()),
        FormatId::PackageLockV1 | FormatId::PackageLockV2 => {
            Box::new(package_lock::PackageLockParser::new())
        }
        FormatId::YarnLock => Box::new(yarn_lock::YarnLockParser::new()),
        FormatId::NpmLsTree => Box::new(npm_tree::NpmTreeParser::new()),
        FormatId::Requirements => {
            Box::new(requirements::RequirementsParser::for_filename(filename))
        }
        FormatId::Pyproject => Box::new(pyproject::PyprojectParser::new()),
        FormatId::Pipfile => Box::new(pipfile::PipfileParser::new()),
        FormatId::PoetryLock => Box::new(poetry_lock::PoetryLockParser::new()),
        FormatId::PipfileLock => Box::new(pipfile_lock::PipfileLockParser::new()),
    }
}

/// Direct version-range maps of a manifest, for the transitive resolver
/// (which wants the declared ranges, not cleaned versions).
///
/// Only npm manifests populate `peer_dependencies`; for PyPI formats it
/// stays empty.
#[derive(Debug, Default, Clone)]
pub struct DirectRanges {
    pub dependencies: BTreeMap<String, String>,
    pub dev_dependencies: BTreeMap<String, String>,
    pub peer_dependencies: BTreeMap<String, String>,
}

/// Extract the raw declared ranges of a manifest, keyed by package name.
///
/// Lockfiles and tree snapshots carry resolved versions rather than
/// ranges; they go through the format's [`Parser`] instead.
pub fn direct_ranges(
    filename: &str,
    format: FormatId,
    content: &str,
) -> Result<DirectRanges, ScanError> {
    match format {
        FormatId::PackageJson => package_json::direct_ranges(content),
        FormatId::Requirements => requirements::direct_ranges(content, filename),
        FormatId::Pyproject => pyproject::direct_ranges(content),
        FormatId::Pipfile => pipfile::direct_ranges(content),
        _ => Err(ScanError::UnsupportedFormat {
            filename: filename.to_string(),
        }),
    }
}

/// Range prefixes passed through unmodified by [`clean_version`]: these are
/// not versions and stripping operators from them would corrupt them.
const PASSTHROUGH_PREFIXES: &[&str] = &["file:", "link:", "git+"];

/// Reduce a version-range expression to its most concrete version string.
///
/// Strips leading `^ ~ > = < !` operators and keeps only the first
/// alternative of ranges joined by ` - `, ` || `, or `,`. Cleaning an
/// already-clean version is the identity.
pub fn clean_version(range: &str) -> String {
    let trimmed = range.trim();

    for prefix in PASSTHROUGH_PREFIXES {
        if trimmed.starts_with(prefix) {
            return trimmed.to_string();
        }
    }

    // First alternative only
    let first = trimmed
        .split(" - ")
        .next()
        .unwrap_or(trimmed)
        .split(" || ")
        .next()
        .unwrap_or(trimmed)
        .split(',')
        .next()
        .unwrap_or(trimmed);

    first
        .trim_start_matches(['^', '~', '>', '=', '<', '!'])
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_version_operators() {
        assert_eq!(clean_version("^1.2.3"), "1.2.3");
        assert_eq!(clean_version("~2.0"), "2.0");
        assert_eq!(clean_version(">=3.1.0"), "3.1.0");
        assert_eq!(clean_version("<4"), "4");
        assert_eq!(clean_version("!=2.2"), "2.2");
        assert_eq!(clean_version("==2.3.2"), "2.3.2");
    }

    #[test]
    fn test_clean_version_idempotent() {
        assert_eq!(clean_version("1.2.3"), "1.2.3");
        assert_eq!(clean_version(clean_version("^1.2.3").as_str()), "1.2.3");
    }

    #[test]
    fn test_clean_version_first_alternative() {
        assert_eq!(clean_version("1.0.0 - 2.0.0"), "1.0.0");
        assert_eq!(clean_version("^1.0.0 || ^2.0.0"), "1.0.0");
        assert_eq!(clean_version(">=1.0,<2.0"), "1.0");
    }

    #[test]
    fn test_clean_version_passthrough() {
        assert_eq!(clean_version("file:../local-pkg"), "file:../local-pkg");
        assert_eq!(clean_version("link:../sibling"), "link:../sibling");
        assert_eq!(
            clean_version("git+https://github.com/user/repo.git#v1.0"),
            "git+https://github.com/user/repo.git#v1.0"
        );
    }

    #[test]
    fn test_factory_covers_all_formats() {
        let formats = [
            FormatId::PackageJson,
            FormatId::PackageLockV1,
            FormatId::PackageLockV2,
            FormatId::YarnLock,
            FormatId::NpmLsTree,
            FormatId::Requirements,
            FormatId::Pyproject,
            FormatId::Pipfile,
            FormatId::PoetryLock,
            FormatId::PipfileLock,
        ];
        for format in formats {
            let parser = parser_for_file("whatever", format);
            assert!(
                parser.supported_formats().contains(&format),
                "parser for {format} does not claim it"
            );
        }
    }
}

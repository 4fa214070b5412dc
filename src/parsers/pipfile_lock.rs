//! Parser for Pipfile.lock files (category-keyed JSON).
//!
//! The lockfile stores no edge information, so every pinned entry is
//! emitted as direct.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::{Parser, clean_version};
use crate::error::ScanError;
use crate::formats::FormatId;
use crate::graph::{Dependency, Ecosystem};

#[derive(Debug, Deserialize, Default)]
struct PipfileLock {
    #[serde(default)]
    default: BTreeMap<String, LockedEntry>,
    #[serde(default)]
    develop: BTreeMap<String, LockedEntry>,
}

#[derive(Debug, Deserialize)]
struct LockedEntry {
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Default)]
pub struct PipfileLockParser;

impl PipfileLockParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for PipfileLockParser {
    fn parse(&self, content: &str) -> Result<Vec<Dependency>, ScanError> {
        if content.trim().is_empty() {
            return Err(ScanError::EmptyInput);
        }

        let lockfile: PipfileLock =
            serde_json::from_str(content).map_err(|e| ScanError::Parse {
                format: FormatId::PipfileLock,
                cause: e.to_string(),
            })?;

        let mut deps = Vec::new();
        push_category(&mut deps, &lockfile.default, false);
        push_category(&mut deps, &lockfile.develop, true);
        Ok(deps)
    }

    fn supported_formats(&self) -> &[FormatId] {
        &[FormatId::PipfileLock]
    }
}

fn push_category(deps: &mut Vec<Dependency>, table: &BTreeMap<String, LockedEntry>, dev: bool) {
    for (name, entry) in table {
        // VCS and path entries carry a ref instead of a version pin
        let Some(raw) = entry.version.as_deref() else {
            continue;
        };
        let version = clean_version(raw);
        if version.is_empty() {
            continue;
        }
        let name = name.to_lowercase().replace(['_', '.'], "-");
        deps.push(Dependency::direct(&name, &version, Ecosystem::PyPi).dev(dev));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_and_develop() {
        let content = r#"{
            "_meta": { "pipfile-spec": 6 },
            "default": {
                "flask": { "version": "==2.3.2", "hashes": [] },
                "requests": { "version": "==2.28.0" }
            },
            "develop": {
                "pytest": { "version": "==7.4.0" }
            }
        }"#;
        let parser = PipfileLockParser::new();
        let deps = parser.parse(content).unwrap();
        assert_eq!(deps.len(), 3);

        let flask = deps.iter().find(|d| d.name == "flask").unwrap();
        assert_eq!(flask.version, "2.3.2");
        assert!(flask.is_direct);
        assert!(!flask.is_dev);

        let pytest = deps.iter().find(|d| d.name == "pytest").unwrap();
        assert!(pytest.is_dev);
        assert!(pytest.is_direct);
    }

    #[test]
    fn test_entries_without_version_skipped() {
        let content = r#"{
            "default": {
                "mylib": { "git": "https://github.com/user/mylib.git", "ref": "main" },
                "flask": { "version": "==2.0.0" }
            }
        }"#;
        let parser = PipfileLockParser::new();
        let deps = parser.parse(content).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "flask");
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let parser = PipfileLockParser::new();
        assert!(matches!(
            parser.parse("{ not json"),
            Err(ScanError::Parse { .. })
        ));
    }
}

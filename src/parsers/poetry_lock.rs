//! Parser for poetry.lock files (`[[package]]` TOML array).
//!
//! The lockfile stores a flat, fully-pinned package list. Each entry may
//! carry a `[package.dependencies]` table, which gives us edges to rebuild
//! provenance paths with; entries no other package depends on are the
//! roots and come out direct.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use super::Parser;
use crate::error::ScanError;
use crate::formats::FormatId;
use crate::graph::{Dependency, Ecosystem, flat_path_for, parent_index};

#[derive(Debug, Deserialize, Default)]
struct PoetryLockFile {
    #[serde(default)]
    package: Vec<LockedPackage>,
}

#[derive(Debug, Deserialize)]
struct LockedPackage {
    name: String,
    version: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    groups: Vec<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, toml::Value>,
}

impl LockedPackage {
    /// Poetry <1.5 records `category = "dev"`; newer lockfiles record a
    /// `groups` list instead.
    fn is_dev(&self) -> bool {
        if let Some(category) = &self.category {
            return category != "main";
        }
        !self.groups.is_empty() && self.groups.iter().all(|g| g != "main")
    }
}

#[derive(Debug, Default)]
pub struct PoetryLockParser;

impl PoetryLockParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for PoetryLockParser {
    fn parse(&self, content: &str) -> Result<Vec<Dependency>, ScanError> {
        if content.trim().is_empty() {
            return Err(ScanError::EmptyInput);
        }

        let lockfile: PoetryLockFile = toml::from_str(content).map_err(|e| ScanError::Parse {
            format: FormatId::PoetryLock,
            cause: e.to_string(),
        })?;

        let edges: Vec<(String, Vec<String>)> = lockfile
            .package
            .iter()
            .map(|p| {
                (
                    normalize(&p.name),
                    p.dependencies.keys().map(|k| normalize(k)).collect(),
                )
            })
            .collect();
        let parents = parent_index(&edges);
        // Roots are inferred from the edges; the lockfile itself does not
        // mark direct dependencies.
        let direct = HashSet::new();

        let mut deps = Vec::with_capacity(lockfile.package.len());
        for package in &lockfile.package {
            let name = normalize(&package.name);
            let path = flat_path_for(&name, &direct, &parents);
            deps.push(
                Dependency::at_path(&name, &package.version, Ecosystem::PyPi, path)
                    .dev(package.is_dev()),
            );
        }
        Ok(deps)
    }

    fn supported_formats(&self) -> &[FormatId] {
        &[FormatId::PoetryLock]
    }
}

fn normalize(name: &str) -> String {
    name.to_lowercase().replace(['_', '.'], "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCK: &str = r#"
[[package]]
name = "flask"
version = "2.3.2"
category = "main"

[package.dependencies]
click = ">=8.1.3"
Werkzeug = ">=2.3.3"

[[package]]
name = "click"
version = "8.1.7"
category = "main"

[[package]]
name = "werkzeug"
version = "2.3.7"
category = "main"

[[package]]
name = "pytest"
version = "7.4.0"
category = "dev"
"#;

    #[test]
    fn test_provenance_from_dependency_tables() {
        let parser = PoetryLockParser::new();
        let deps = parser.parse(LOCK).unwrap();
        assert_eq!(deps.len(), 4);

        let flask = deps.iter().find(|d| d.name == "flask").unwrap();
        assert!(flask.is_direct);
        assert_eq!(flask.path, vec!["flask"]);

        let click = deps.iter().find(|d| d.name == "click").unwrap();
        assert!(!click.is_direct);
        assert_eq!(click.path, vec!["flask", "click"]);

        let werkzeug = deps.iter().find(|d| d.name == "werkzeug").unwrap();
        assert_eq!(werkzeug.path, vec!["flask", "werkzeug"]);
    }

    #[test]
    fn test_category_dev_flag() {
        let parser = PoetryLockParser::new();
        let deps = parser.parse(LOCK).unwrap();
        let pytest = deps.iter().find(|d| d.name == "pytest").unwrap();
        assert!(pytest.is_dev);
        assert!(pytest.is_direct);
    }

    #[test]
    fn test_groups_dev_flag() {
        let content = r#"
[[package]]
name = "black"
version = "23.1.0"
groups = ["dev"]

[[package]]
name = "requests"
version = "2.28.0"
groups = ["main"]
"#;
        let parser = PoetryLockParser::new();
        let deps = parser.parse(content).unwrap();
        assert!(deps.iter().find(|d| d.name == "black").unwrap().is_dev);
        assert!(!deps.iter().find(|d| d.name == "requests").unwrap().is_dev);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let parser = PoetryLockParser::new();
        assert!(matches!(
            parser.parse("[[package]\nbad"),
            Err(ScanError::Parse { .. })
        ));
    }
}

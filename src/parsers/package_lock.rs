//! Parser for package-lock.json (and npm-shrinkwrap.json), versions 1–3.
//!
//! Lockfile v1 stores a nested `dependencies` tree which is walked
//! recursively, the parent chain becoming the provenance path. v2/v3 store
//! a flat `packages` map keyed by `node_modules/...` install paths; names
//! are extracted by stripping `node_modules/` segments (scoped
//! `@scope/name` keys span two segments) and provenance is rebuilt from
//! each entry's declared dependency names.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use tracing::debug;

use super::Parser;
use crate::error::ScanError;
use crate::formats::FormatId;
use crate::graph::{self, Dependency, Ecosystem};

/// Parser for npm lockfiles, all versions
#[derive(Debug, Default)]
pub struct PackageLockParser;

impl PackageLockParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for PackageLockParser {
    fn parse(&self, content: &str) -> Result<Vec<Dependency>, ScanError> {
        if content.trim().is_empty() {
            return Err(ScanError::EmptyInput);
        }

        let root: Value = serde_json::from_str(content).map_err(|e| ScanError::Parse {
            format: FormatId::PackageLockV1,
            cause: e.to_string(),
        })?;

        if root.get("packages").is_some() {
            parse_v2(&root)
        } else {
            parse_v1(&root)
        }
    }

    fn supported_formats(&self) -> &[FormatId] {
        &[FormatId::PackageLockV1, FormatId::PackageLockV2]
    }
}

/// Walk the nested `dependencies` objects of a v1 lockfile.
fn parse_v1(root: &Value) -> Result<Vec<Dependency>, ScanError> {
    let mut deps = Vec::new();
    let mut cycles = 0usize;

    if let Some(tree) = root.get("dependencies").and_then(|d| d.as_object()) {
        for (name, entry) in tree {
            walk_v1(name, entry, &[], &mut deps, &mut cycles);
        }
    }

    if cycles > 0 {
        debug!("v1 lockfile walk stopped at {cycles} cycle(s)");
    }
    Ok(deps)
}

fn walk_v1(
    name: &str,
    entry: &Value,
    parent_path: &[String],
    out: &mut Vec<Dependency>,
    cycles: &mut usize,
) {
    if graph::would_cycle(parent_path, name) {
        *cycles += 1;
        return;
    }

    let Some(version) = entry.get("version").and_then(|v| v.as_str()) else {
        return;
    };
    let is_dev = entry.get("dev").and_then(|v| v.as_bool()).unwrap_or(false);

    let path = graph::create_path(parent_path, name);
    out.push(Dependency::at_path(name, version, Ecosystem::Npm, path.clone()).dev(is_dev));

    if let Some(children) = entry.get("dependencies").and_then(|d| d.as_object()) {
        for (child_name, child_entry) in children {
            walk_v1(child_name, child_entry, &path, out, cycles);
        }
    }
}

/// Parse the flat `packages` map of a v2/v3 lockfile.
///
/// A package is direct iff its name appears in the root package's merged
/// `dependencies` + `devDependencies` map. Transitive entries get a
/// provenance path by chasing the declared-dependency parent index;
/// entries no other package declares stay classified direct.
fn parse_v2(root: &Value) -> Result<Vec<Dependency>, ScanError> {
    let packages = root
        .get("packages")
        .and_then(|p| p.as_object())
        .ok_or(ScanError::Parse {
            format: FormatId::PackageLockV2,
            cause: "packages is not an object".to_string(),
        })?;

    let direct = root_declared_names(packages.get("").unwrap_or(&Value::Null));

    // (name -> version/dev) plus declared edges for provenance
    let mut info: BTreeMap<String, (String, bool)> = BTreeMap::new();
    let mut edges: Vec<(String, Vec<String>)> = Vec::new();

    for (key, entry) in packages {
        if key.is_empty() {
            continue;
        }
        let Some(name) = package_name_from_key(key) else {
            continue;
        };
        let Some(version) = entry.get("version").and_then(|v| v.as_str()) else {
            continue;
        };
        let is_dev = entry.get("dev").and_then(|v| v.as_bool()).unwrap_or(false);

        // First occurrence wins; deeper nested duplicates are shadowed copies
        info.entry(name.clone())
            .or_insert_with(|| (version.to_string(), is_dev));

        let declared: Vec<String> = entry
            .get("dependencies")
            .and_then(|d| d.as_object())
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default();
        if !declared.is_empty() {
            edges.push((name, declared));
        }
    }

    let parents = graph::parent_index(&edges);
    let mut deps = Vec::new();
    for (name, (version, is_dev)) in info {
        let path = graph::flat_path_for(&name, &direct, &parents);
        deps.push(Dependency::at_path(&name, &version, Ecosystem::Npm, path).dev(is_dev));
    }
    Ok(deps)
}

/// Merged direct-dependency names from the root (`""`) package entry.
fn root_declared_names(root_entry: &Value) -> HashSet<String> {
    let mut names = HashSet::new();
    for section in ["dependencies", "devDependencies"] {
        if let Some(map) = root_entry.get(section).and_then(|d| d.as_object()) {
            names.extend(map.keys().cloned());
        }
    }
    names
}

/// Extract a package name from a `node_modules/...` map key.
///
/// The name is everything after the last `node_modules/` segment, which
/// keeps scoped two-segment names (`@scope/name`) intact.
fn package_name_from_key(key: &str) -> Option<String> {
    let name = key.rsplit("node_modules/").next()?;
    if name.is_empty() || name.ends_with('/') {
        return None;
    }
    Some(name.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v1_nested_paths() {
        let parser = PackageLockParser::new();
        let content = r#"{
  "lockfileVersion": 1,
  "dependencies": {
    "express": {
      "version": "4.18.2",
      "dependencies": {
        "accepts": {
          "version": "1.3.8",
          "dependencies": {
            "mime-types": { "version": "2.1.35" }
          }
        }
      }
    }
  }
}"#;
        let deps = parser.parse(content).unwrap();
        assert_eq!(deps.len(), 3);

        let mime = deps.iter().find(|d| d.name == "mime-types").unwrap();
        assert_eq!(mime.path, vec!["express", "accepts", "mime-types"]);
        assert!(!mime.is_direct);
        assert_eq!(mime.immediate_parent(), Some("accepts"));

        let express = deps.iter().find(|d| d.name == "express").unwrap();
        assert!(express.is_direct);
    }

    #[test]
    fn test_v1_dev_flag() {
        let parser = PackageLockParser::new();
        let content = r#"{
  "dependencies": {
    "jest": { "version": "29.0.0", "dev": true },
    "express": { "version": "4.18.2" }
  }
}"#;
        let deps = parser.parse(content).unwrap();
        assert!(deps.iter().find(|d| d.name == "jest").unwrap().is_dev);
        assert!(!deps.iter().find(|d| d.name == "express").unwrap().is_dev);
    }

    #[test]
    fn test_v1_cycle_terminates() {
        // a -> a nested again: the walk must stop, not recurse forever
        let parser = PackageLockParser::new();
        let content = r#"{
  "dependencies": {
    "a": {
      "version": "1.0.0",
      "dependencies": {
        "b": {
          "version": "1.0.0",
          "dependencies": {
            "a": { "version": "1.0.0" }
          }
        }
      }
    }
  }
}"#;
        let deps = parser.parse(content).unwrap();
        assert_eq!(deps.len(), 2);
    }

    #[test]
    fn test_v2_flat_packages() {
        let parser = PackageLockParser::new();
        let content = r#"{
  "lockfileVersion": 3,
  "packages": {
    "": {
      "dependencies": { "express": "^4.18.0" },
      "devDependencies": { "jest": "^29.0.0" }
    },
    "node_modules/express": {
      "version": "4.18.2",
      "dependencies": { "accepts": "~1.3.8" }
    },
    "node_modules/accepts": {
      "version": "1.3.8",
      "dependencies": { "mime-types": "~2.1.34" }
    },
    "node_modules/mime-types": { "version": "2.1.35" },
    "node_modules/jest": { "version": "29.0.0", "dev": true }
  }
}"#;
        let deps = parser.parse(content).unwrap();
        assert_eq!(deps.len(), 4);

        let express = deps.iter().find(|d| d.name == "express").unwrap();
        assert!(express.is_direct);

        let jest = deps.iter().find(|d| d.name == "jest").unwrap();
        assert!(jest.is_direct);
        assert!(jest.is_dev);

        let accepts = deps.iter().find(|d| d.name == "accepts").unwrap();
        assert!(!accepts.is_direct);
        assert_eq!(accepts.path, vec!["express", "accepts"]);

        let mime = deps.iter().find(|d| d.name == "mime-types").unwrap();
        assert_eq!(mime.path, vec!["express", "accepts", "mime-types"]);
    }

    #[test]
    fn test_v2_scoped_names() {
        let parser = PackageLockParser::new();
        let content = r#"{
  "lockfileVersion": 2,
  "packages": {
    "": { "dependencies": { "@babel/core": "^7.0.0" } },
    "node_modules/@babel/core": { "version": "7.22.0" },
    "node_modules/@babel/core/node_modules/@babel/types": { "version": "7.22.5" }
  }
}"#;
        let deps = parser.parse(content).unwrap();
        assert!(deps.iter().any(|d| d.name == "@babel/core" && d.is_direct));
        assert!(deps.iter().any(|d| d.name == "@babel/types"));
    }

    #[test]
    fn test_v2_orphan_classified_direct() {
        let parser = PackageLockParser::new();
        let content = r#"{
  "lockfileVersion": 3,
  "packages": {
    "": {},
    "node_modules/stray": { "version": "1.0.0" }
  }
}"#;
        let deps = parser.parse(content).unwrap();
        assert_eq!(deps.len(), 1);
        assert!(deps[0].is_direct);
        assert_eq!(deps[0].path, vec!["stray"]);
    }

    #[test]
    fn test_package_name_from_key() {
        assert_eq!(
            package_name_from_key("node_modules/express").as_deref(),
            Some("express")
        );
        assert_eq!(
            package_name_from_key("node_modules/a/node_modules/b").as_deref(),
            Some("b")
        );
        assert_eq!(
            package_name_from_key("node_modules/@scope/name").as_deref(),
            Some("@scope/name")
        );
        assert_eq!(
            package_name_from_key("node_modules/a/node_modules/@s/n").as_deref(),
            Some("@s/n")
        );
    }

    #[test]
    fn test_malformed_input() {
        let parser = PackageLockParser::new();
        assert!(matches!(parser.parse(""), Err(ScanError::EmptyInput)));
        assert!(matches!(parser.parse("[1,2"), Err(ScanError::Parse { .. })));
    }
}

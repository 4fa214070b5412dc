//! Parser for yarn.lock (classic v1 block format).
//!
//! The file is a sequence of blocks: an unindented header line listing one
//! or more `name@range` selectors and ending with `:`, followed by indented
//! `version "x"` and optional `dependencies:` sub-block lines. The flat
//! entry list carries no direct/transitive marker, so provenance is rebuilt
//! from the declared dependency names: entries no other entry declares are
//! classified direct.

use std::collections::{BTreeMap, HashSet};

use super::Parser;
use crate::error::ScanError;
use crate::formats::FormatId;
use crate::graph::{self, Dependency, Ecosystem};

/// Parser for yarn.lock files
#[derive(Debug, Default)]
pub struct YarnLockParser;

impl YarnLockParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for YarnLockParser {
    fn parse(&self, content: &str) -> Result<Vec<Dependency>, ScanError> {
        if content.trim().is_empty() {
            return Err(ScanError::EmptyInput);
        }

        let mut versions: BTreeMap<String, String> = BTreeMap::new();
        let mut edges: Vec<(String, Vec<String>)> = Vec::new();

        let mut current: Option<String> = None;
        let mut in_dependencies = false;

        for line in content.lines() {
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }

            // Unindented line ending with ':' starts a new block
            if !line.starts_with(' ') && !line.starts_with('\t') {
                in_dependencies = false;
                current = parse_header(line);
                continue;
            }

            let Some(name) = current.clone() else {
                continue;
            };
            let trimmed = line.trim();

            if let Some(rest) = trimmed.strip_prefix("version ") {
                versions.insert(name, unquote(rest).to_string());
                in_dependencies = false;
            } else if trimmed == "dependencies:" || trimmed == "optionalDependencies:" {
                in_dependencies = true;
            } else if in_dependencies && indent_depth(line) >= 4 {
                if let Some(dep_name) = parse_dependency_line(trimmed) {
                    match edges.iter_mut().find(|(n, _)| *n == name) {
                        Some((_, list)) => list.push(dep_name),
                        None => edges.push((name, vec![dep_name])),
                    }
                }
            } else {
                // resolved/integrity or an unknown field ends the sub-block
                in_dependencies = false;
            }
        }

        if versions.is_empty() {
            return Err(ScanError::Parse {
                format: FormatId::YarnLock,
                cause: "no package blocks found".to_string(),
            });
        }

        let direct: HashSet<String> = HashSet::new();
        let parents = graph::parent_index(&edges);
        let deps = versions
            .into_iter()
            .map(|(name, version)| {
                let path = graph::flat_path_for(&name, &direct, &parents);
                Dependency::at_path(&name, &version, Ecosystem::Npm, path)
            })
            .collect();

        Ok(deps)
    }

    fn supported_formats(&self) -> &[FormatId] {
        &[FormatId::YarnLock]
    }
}

/// Parse a block header like `express@^4.18.0:` or
/// `"@babel/core@^7.0.0", "@babel/core@^7.1.0":`, returning the package
/// name of the first selector.
fn parse_header(line: &str) -> Option<String> {
    let header = line.trim_end().strip_suffix(':')?;
    let first = header.split(", ").next()?;
    let selector = unquote(first.trim());
    name_of_selector(selector)
}

/// Split `name@range` at the last `@`, keeping scoped names intact.
fn name_of_selector(selector: &str) -> Option<String> {
    let at = selector.rfind('@')?;
    if at == 0 {
        // `@scope/name` with no range separator
        return Some(selector.to_string());
    }
    Some(selector[..at].to_string())
}

/// Parse a dependencies sub-block line: `accepts "~1.3.8"`.
fn parse_dependency_line(trimmed: &str) -> Option<String> {
    let (name, _range) = trimmed.split_once(' ')?;
    let name = unquote(name.trim());
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

fn unquote(s: &str) -> &str {
    s.trim().trim_matches('"')
}

fn indent_depth(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"# THIS IS AN AUTOGENERATED FILE. DO NOT EDIT THIS FILE DIRECTLY.
# yarn lockfile v1

express@^4.18.0:
  version "4.18.2"
  resolved "https://registry.yarnpkg.com/express/-/express-4.18.2.tgz"
  integrity sha512-xxx
  dependencies:
    accepts "~1.3.8"
    body-parser "1.20.1"

accepts@~1.3.8:
  version "1.3.8"
  dependencies:
    mime-types "~2.1.34"

mime-types@~2.1.34:
  version "2.1.35"

body-parser@1.20.1:
  version "1.20.1"
"#;

    #[test]
    fn test_parse_blocks() {
        let parser = YarnLockParser::new();
        let deps = parser.parse(SAMPLE).unwrap();
        assert_eq!(deps.len(), 4);

        let express = deps.iter().find(|d| d.name == "express").unwrap();
        assert_eq!(express.version, "4.18.2");
        assert!(express.is_direct);

        let mime = deps.iter().find(|d| d.name == "mime-types").unwrap();
        assert_eq!(mime.version, "2.1.35");
        assert!(!mime.is_direct);
        assert_eq!(mime.path, vec!["express", "accepts", "mime-types"]);
    }

    #[test]
    fn test_multi_selector_header() {
        let parser = YarnLockParser::new();
        let content = r#"
"@babel/core@^7.0.0", "@babel/core@^7.1.0":
  version "7.22.0"
"#;
        let deps = parser.parse(content).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "@babel/core");
        assert_eq!(deps[0].version, "7.22.0");
    }

    #[test]
    fn test_name_of_selector() {
        assert_eq!(name_of_selector("express@^4.18.0").as_deref(), Some("express"));
        assert_eq!(
            name_of_selector("@babel/core@^7.0.0").as_deref(),
            Some("@babel/core")
        );
        assert_eq!(name_of_selector("@babel/core").as_deref(), Some("@babel/core"));
    }

    #[test]
    fn test_dependencies_block_ends_on_new_field() {
        let parser = YarnLockParser::new();
        // `resolved` after the dependencies block must not be read as a dep
        let content = r#"
a@^1.0.0:
  version "1.0.0"
  dependencies:
    b "^2.0.0"

b@^2.0.0:
  version "2.0.0"
  resolved "https://example.com/b.tgz"
"#;
        let deps = parser.parse(content).unwrap();
        assert_eq!(deps.len(), 2);
        let b = deps.iter().find(|d| d.name == "b").unwrap();
        assert_eq!(b.path, vec!["a", "b"]);
    }

    #[test]
    fn test_empty_and_invalid() {
        let parser = YarnLockParser::new();
        assert!(matches!(parser.parse(""), Err(ScanError::EmptyInput)));
        assert!(matches!(
            parser.parse("# only comments\n"),
            Err(ScanError::Parse { .. })
        ));
    }
}

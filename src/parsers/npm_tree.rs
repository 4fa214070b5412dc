//! Parser for `npm ls --json` installed-tree snapshots.
//!
//! The snapshot is a recursive JSON tree rooted at the project itself:
//! `{"name": ..., "dependencies": {"express": {"version": ...,
//! "dependencies": {...}}}}`. The root is excluded from provenance paths;
//! children of the root are direct.

use serde_json::Value;
use tracing::debug;

use super::Parser;
use crate::error::ScanError;
use crate::formats::FormatId;
use crate::graph::{self, Dependency, Ecosystem};

/// Parser for npm installed-tree snapshots
#[derive(Debug, Default)]
pub struct NpmTreeParser;

impl NpmTreeParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for NpmTreeParser {
    fn parse(&self, content: &str) -> Result<Vec<Dependency>, ScanError> {
        if content.trim().is_empty() {
            return Err(ScanError::EmptyInput);
        }

        let root: Value = serde_json::from_str(content).map_err(|e| ScanError::Parse {
            format: FormatId::NpmLsTree,
            cause: e.to_string(),
        })?;

        let mut deps = Vec::new();
        let mut cycles = 0usize;

        if let Some(children) = root.get("dependencies").and_then(|d| d.as_object()) {
            for (name, entry) in children {
                walk(name, entry, &[], &mut deps, &mut cycles);
            }
        }

        if cycles > 0 {
            debug!("npm tree walk stopped at {cycles} cycle(s)");
        }
        Ok(deps)
    }

    fn supported_formats(&self) -> &[FormatId] {
        &[FormatId::NpmLsTree]
    }
}

fn walk(
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

    // `npm ls` emits empty objects for missing/peer placeholders
    let Some(version) = entry.get("version").and_then(|v| v.as_str()) else {
        return;
    };

    let path = graph::create_path(parent_path, name);
    out.push(Dependency::at_path(name, version, Ecosystem::Npm, path.clone()));

    if let Some(children) = entry.get("dependencies").and_then(|d| d.as_object()) {
        for (child_name, child_entry) in children {
            walk(child_name, child_entry, &path, out, cycles);
        }
    }
}

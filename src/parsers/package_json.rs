//! Parser for package.json manifests.
//!
//! A manifest declares direct dependencies only; version ranges are cleaned
//! to their most concrete component (`^18.2.0` → `18.2.0`). Dev and peer
//! sections are tagged so the caller can filter them.

use serde::Deserialize;
use std::collections::BTreeMap;

use super::{DirectRanges, Parser, clean_version};
use crate::error::ScanError;
use crate::formats::FormatId;
use crate::graph::{Dependency, Ecosystem};

/// Parser for npm package.json manifests
#[derive(Debug, Default)]
pub struct PackageJsonParser;

impl PackageJsonParser {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Deserialize)]
struct PackageJson {
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "peerDependencies")]
    peer_dependencies: BTreeMap<String, String>,
}

impl Parser for PackageJsonParser {
    fn parse(&self, content: &str) -> Result<Vec<Dependency>, ScanError> {
        if content.trim().is_empty() {
            return Err(ScanError::EmptyInput);
        }

        let manifest: PackageJson =
            serde_json::from_str(content).map_err(|e| ScanError::Parse {
                format: FormatId::PackageJson,
                cause: e.to_string(),
            })?;

        let mut deps = Vec::new();
        for (name, range) in &manifest.dependencies {
            deps.push(Dependency::direct(name, &clean_version(range), Ecosystem::Npm));
        }
        for (name, range) in &manifest.dev_dependencies {
            deps.push(Dependency::direct(name, &clean_version(range), Ecosystem::Npm).dev(true));
        }
        for (name, range) in &manifest.peer_dependencies {
            // peers the project itself must satisfy count as direct deps
            deps.push(Dependency::direct(name, &clean_version(range), Ecosystem::Npm));
        }

        Ok(deps)
    }

    fn supported_formats(&self) -> &[FormatId] {
        &[FormatId::PackageJson]
    }
}

/// Extract the raw range maps without cleaning.
pub fn direct_ranges(content: &str) -> Result<DirectRanges, ScanError> {
    if content.trim().is_empty() {
        return Err(ScanError::EmptyInput);
    }
    let manifest: PackageJson = serde_json::from_str(content).map_err(|e| ScanError::Parse {
        format: FormatId::PackageJson,
        cause: e.to_string(),
    })?;
    Ok(DirectRanges {
        dependencies: manifest.dependencies,
        dev_dependencies: manifest.dev_dependencies,
        peer_dependencies: manifest.peer_dependencies,
    })
}

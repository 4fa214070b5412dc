//! Parser for Pipfile manifests (`[packages]` / `[dev-packages]` tables).

use std::collections::BTreeMap;

use serde::Deserialize;

use super::{DirectRanges, Parser, clean_version};
use crate::error::ScanError;
use crate::formats::FormatId;
use crate::graph::{Dependency, Ecosystem};

#[derive(Debug, Deserialize, Default)]
struct PipfileToml {
    #[serde(default)]
    packages: BTreeMap<String, PipfileVersion>,
    #[serde(default, rename = "dev-packages")]
    dev_packages: BTreeMap<String, PipfileVersion>,
}

/// `flask = "==2.3.2"` or `flask = { version = "==2.3.2", extras = [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PipfileVersion {
    Plain(String),
    Detailed {
        #[serde(default)]
        version: Option<String>,
    },
}

impl PipfileVersion {
    fn as_str(&self) -> Option<&str> {
        match self {
            Self::Plain(v) => Some(v),
            Self::Detailed { version } => version.as_deref(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PipfileParser;

impl PipfileParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for PipfileParser {
    fn parse(&self, content: &str) -> Result<Vec<Dependency>, ScanError> {
        if content.trim().is_empty() {
            return Err(ScanError::EmptyInput);
        }

        let manifest: PipfileToml = toml::from_str(content).map_err(|e| ScanError::Parse {
            format: FormatId::Pipfile,
            cause: e.to_string(),
        })?;

        let mut deps = Vec::new();
        push_table(&mut deps, &manifest.packages, false);
        push_table(&mut deps, &manifest.dev_packages, true);
        Ok(deps)
    }

    fn supported_formats(&self) -> &[FormatId] {
        &[FormatId::Pipfile]
    }
}

/// Raw declared ranges of the manifest, for the transitive resolver.
/// Unlike [`Parser::parse`], a bare `"*"` survives here: any-version is a
/// meaningful range once a registry can answer it.
pub fn direct_ranges(content: &str) -> Result<DirectRanges, ScanError> {
    if content.trim().is_empty() {
        return Err(ScanError::EmptyInput);
    }
    let manifest: PipfileToml = toml::from_str(content).map_err(|e| ScanError::Parse {
        format: FormatId::Pipfile,
        cause: e.to_string(),
    })?;

    let mut ranges = DirectRanges::default();
    collect_ranges(&mut ranges.dependencies, &manifest.packages);
    collect_ranges(&mut ranges.dev_dependencies, &manifest.dev_packages);
    Ok(ranges)
}

fn collect_ranges(target: &mut BTreeMap<String, String>, table: &BTreeMap<String, PipfileVersion>) {
    for (name, value) in table {
        let Some(raw) = value.as_str() else {
            continue;
        };
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let name = name.to_lowercase().replace(['_', '.'], "-");
        target.insert(name, raw.to_string());
    }
}

fn push_table(deps: &mut Vec<Dependency>, table: &BTreeMap<String, PipfileVersion>, dev: bool) {
    for (name, value) in table {
        let Some(raw) = value.as_str() else {
            // Table entries without a version (VCS refs, local paths)
            continue;
        };
        // A bare "*" accepts any version and carries nothing to match
        if raw.trim() == "*" {
            continue;
        }
        let version = clean_version(raw);
        if version.is_empty() {
            continue;
        }
        let name = name.to_lowercase().replace(['_', '.'], "-");
        deps.push(Dependency::direct(&name, &version, Ecosystem::PyPi).dev(dev));
    }
}

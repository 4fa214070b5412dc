//! Parser for pyproject.toml manifests.
//!
//! Handles both PEP 621 `[project]` requirement lists and the Poetry
//! `[tool.poetry.*]` dependency tables, where a version is either a plain
//! string or a table carrying a `version` key.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::requirements::{parse_pep508, parse_pep508_range};
use super::{DirectRanges, Parser, clean_version};
use crate::error::ScanError;
use crate::formats::FormatId;
use crate::graph::{Dependency, Ecosystem};

#[derive(Debug, Deserialize, Default)]
struct PyprojectToml {
    #[serde(default)]
    project: Option<ProjectSection>,
    #[serde(default)]
    tool: Option<ToolSection>,
}

#[derive(Debug, Deserialize, Default)]
struct ProjectSection {
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default, rename = "optional-dependencies")]
    optional_dependencies: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct ToolSection {
    #[serde(default)]
    poetry: Option<PoetrySection>,
}

#[derive(Debug, Deserialize, Default)]
struct PoetrySection {
    #[serde(default)]
    dependencies: BTreeMap<String, PoetryVersion>,
    #[serde(default, rename = "dev-dependencies")]
    dev_dependencies: BTreeMap<String, PoetryVersion>,
    #[serde(default)]
    group: BTreeMap<String, PoetryGroup>,
}

#[derive(Debug, Deserialize, Default)]
struct PoetryGroup {
    #[serde(default)]
    dependencies: BTreeMap<String, PoetryVersion>,
}

/// Poetry accepts `flask = "^2.0"` or `flask = { version = "^2.0", ... }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PoetryVersion {
    Plain(String),
    Detailed {
        #[serde(default)]
        version: Option<String>,
    },
}

impl PoetryVersion {
    fn as_str(&self) -> Option<&str> {
        match self {
            Self::Plain(v) => Some(v),
            Self::Detailed { version } => version.as_deref(),
        }
    }
}

/// Group names that mark a dependency group as development-only.
fn is_dev_group(name: &str) -> bool {
    let lower = name.to_lowercase();
    ["dev", "test", "testing", "lint", "format", "doc", "docs", "build"]
        .iter()
        .any(|hint| lower.contains(hint))
}

#[derive(Debug, Default)]
pub struct PyprojectParser;

impl PyprojectParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for PyprojectParser {
    fn parse(&self, content: &str) -> Result<Vec<Dependency>, ScanError> {
        if content.trim().is_empty() {
            return Err(ScanError::EmptyInput);
        }

        let manifest: PyprojectToml =
            toml::from_str(content).map_err(|e| ScanError::Parse {
                format: FormatId::Pyproject,
                cause: e.to_string(),
            })?;

        let mut deps = Vec::new();

        if let Some(project) = &manifest.project {
            for line in &project.dependencies {
                if let Some((name, version)) = parse_pep508(line) {
                    deps.push(Dependency::direct(&name, &version, Ecosystem::PyPi));
                }
            }
            for (group, lines) in &project.optional_dependencies {
                let dev = is_dev_group(group);
                for line in lines {
                    if let Some((name, version)) = parse_pep508(line) {
                        deps.push(
                            Dependency::direct(&name, &version, Ecosystem::PyPi).dev(dev),
                        );
                    }
                }
            }
        }

        if let Some(poetry) = manifest.tool.as_ref().and_then(|t| t.poetry.as_ref()) {
            push_poetry_table(&mut deps, &poetry.dependencies, false);
            push_poetry_table(&mut deps, &poetry.dev_dependencies, true);
            for (group, table) in &poetry.group {
                push_poetry_table(&mut deps, &table.dependencies, is_dev_group(group));
            }
        }

        Ok(deps)
    }

    fn supported_formats(&self) -> &[FormatId] {
        &[FormatId::Pyproject]
    }
}

/// Raw declared ranges of the manifest, for the transitive resolver.
pub fn direct_ranges(content: &str) -> Result<DirectRanges, ScanError> {
    if content.trim().is_empty() {
        return Err(ScanError::EmptyInput);
    }
    let manifest: PyprojectToml = toml::from_str(content).map_err(|e| ScanError::Parse {
        format: FormatId::Pyproject,
        cause: e.to_string(),
    })?;

    let mut ranges = DirectRanges::default();

    if let Some(project) = &manifest.project {
        for line in &project.dependencies {
            if let Some((name, range)) = parse_pep508_range(line) {
                ranges.dependencies.insert(name, range);
            }
        }
        for (group, lines) in &project.optional_dependencies {
            let dev = is_dev_group(group);
            for line in lines {
                if let Some((name, range)) = parse_pep508_range(line) {
                    let target = if dev {
                        &mut ranges.dev_dependencies
                    } else {
                        &mut ranges.dependencies
                    };
                    target.insert(name, range);
                }
            }
        }
    }

    if let Some(poetry) = manifest.tool.as_ref().and_then(|t| t.poetry.as_ref()) {
        collect_poetry_ranges(&mut ranges, &poetry.dependencies, false);
        collect_poetry_ranges(&mut ranges, &poetry.dev_dependencies, true);
        for (group, table) in &poetry.group {
            collect_poetry_ranges(&mut ranges, &table.dependencies, is_dev_group(group));
        }
    }

    Ok(ranges)
}

fn collect_poetry_ranges(
    ranges: &mut DirectRanges,
    table: &BTreeMap<String, PoetryVersion>,
    dev: bool,
) {
    for (name, value) in table {
        if name.eq_ignore_ascii_case("python") {
            continue;
        }
        let Some(raw) = value.as_str() else {
            continue;
        };
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let name = name.to_lowercase().replace(['_', '.'], "-");
        let target = if dev {
            &mut ranges.dev_dependencies
        } else {
            &mut ranges.dependencies
        };
        target.insert(name, raw.to_string());
    }
}

fn push_poetry_table(
    deps: &mut Vec<Dependency>,
    table: &BTreeMap<String, PoetryVersion>,
    dev: bool,
) {
    for (name, value) in table {
        // The python interpreter constraint is not a package
        if name.eq_ignore_ascii_case("python") {
            continue;
        }
        let Some(raw) = value.as_str() else {
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

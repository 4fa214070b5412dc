//! Client for the PyPI JSON API.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{PackageManifest, PackageRegistry, sort_versions_desc};
use crate::error::ScanError;

const DEFAULT_BASE_URL: &str = "https://pypi.org/pypi";

pub struct PyPiRegistry {
    client: Arc<Client>,
    base_url: String,
}

impl PyPiRegistry {
    pub fn with_client(client: Arc<Client>) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(client: Arc<Client>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    #[cfg(test)]
    pub fn http_client(&self) -> &Arc<Client> {
        &self.client
    }

    fn unavailable(package: &str, message: impl Into<String>) -> ScanError {
        ScanError::RegistryUnavailable {
            package: package.to_string(),
            message: message.into(),
        }
    }
}

/// PEP 503 normalization: lookups are case-insensitive with `_`/`.`
/// treated as `-`.
fn normalize_name(name: &str) -> String {
    name.to_lowercase().replace(['_', '.'], "-")
}

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    #[serde(default)]
    releases: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    info: ReleaseInfo,
}

#[derive(Debug, Deserialize, Default)]
struct ReleaseInfo {
    #[serde(default)]
    requires_dist: Option<Vec<String>>,
}

/// Parse one `requires_dist` entry into `(name, range)`.
///
/// Both historical shapes appear in the wild: `click (>=8.0)` and
/// `click>=8.0`. Entries gated behind an `extra ==` marker are optional
/// and skipped.
fn parse_requires_dist(entry: &str) -> Option<(String, String)> {
    let (requirement, marker) = match entry.split_once(';') {
        Some((req, marker)) => (req.trim(), Some(marker)),
        None => (entry.trim(), None),
    };
    if marker.is_some_and(|m| m.contains("extra ==") || m.contains("extra==")) {
        return None;
    }

    // Parenthesized range form
    if let Some(open) = requirement.find('(') {
        let name = requirement[..open].trim();
        let name = name.split('[').next().unwrap_or(name).trim();
        let range = requirement[open + 1..].trim_end_matches(')').trim();
        if name.is_empty() {
            return None;
        }
        return Some((normalize_name(name), range.to_string()));
    }

    let op_pos = requirement
        .find(['>', '<', '=', '~', '!'])
        .unwrap_or(requirement.len());
    let name = requirement[..op_pos].trim();
    let name = name.split('[').next().unwrap_or(name).trim();
    if name.is_empty() {
        return None;
    }
    let range = requirement[op_pos..].trim();
    // A bare name means any version
    let range = if range.is_empty() { "*" } else { range };
    Some((normalize_name(name), range.to_string()))
}

#[async_trait]
impl PackageRegistry for PyPiRegistry {
    async fn list_versions(&self, name: &str) -> Result<Vec<String>, ScanError> {
        let url = format!("{}/{}/json", self.base_url, normalize_name(name));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::unavailable(name, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::unavailable(
                name,
                format!("PyPI returned {}", response.status()),
            ));
        }

        let doc: ProjectResponse = response
            .json()
            .await
            .map_err(|e| Self::unavailable(name, e.to_string()))?;

        let mut versions: Vec<String> = doc.releases.into_keys().collect();
        sort_versions_desc(&mut versions);
        Ok(versions)
    }

    async fn dependencies_of(
        &self,
        name: &str,
        version: &str,
    ) -> Result<PackageManifest, ScanError> {
        let url = format!(
            "{}/{}/{}/json",
            self.base_url,
            normalize_name(name),
            version
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::unavailable(name, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::unavailable(
                name,
                format!("PyPI returned {} for {name}=={version}", response.status()),
            ));
        }

        let doc: ReleaseResponse = response
            .json()
            .await
            .map_err(|e| Self::unavailable(name, e.to_string()))?;

        let mut manifest = PackageManifest::default();
        for entry in doc.info.requires_dist.unwrap_or_default() {
            if let Some((dep_name, range)) = parse_requires_dist(&entry) {
                manifest.dependencies.entry(dep_name).or_insert(range);
            }
        }
        Ok(manifest)
    }
}

//! Client for the npm registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{PackageManifest, PackageRegistry, sort_versions_desc};
use crate::error::ScanError;

const DEFAULT_BASE_URL: &str = "https://registry.npmjs.org";

pub struct NpmRegistry {
    client: Arc<Client>,
    base_url: String,
}

impl NpmRegistry {
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

    /// Scoped packages are URL-encoded: `@scope/name` -> `@scope%2fname`.
    fn encode_name(name: &str) -> String {
        if name.starts_with('@') {
            name.replace('/', "%2f")
        } else {
            name.to_string()
        }
    }

    fn unavailable(package: &str, message: impl Into<String>) -> ScanError {
        ScanError::RegistryUnavailable {
            package: package.to_string(),
            message: message.into(),
        }
    }
}

// Full packument: we only need the version keys
#[derive(Debug, Deserialize)]
struct PackageDocument {
    #[serde(default)]
    versions: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct VersionDocument {
    #[serde(default)]
    dependencies: HashMap<String, String>,
    #[serde(default)]
    dev_dependencies: HashMap<String, String>,
    #[serde(default)]
    peer_dependencies: HashMap<String, String>,
}

#[async_trait]
impl PackageRegistry for NpmRegistry {
    async fn list_versions(&self, name: &str) -> Result<Vec<String>, ScanError> {
        let url = format!("{}/{}", self.base_url, Self::encode_name(name));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::unavailable(name, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::unavailable(
                name,
                format!("npm registry returned {}", response.status()),
            ));
        }

        let doc: PackageDocument = response
            .json()
            .await
            .map_err(|e| Self::unavailable(name, e.to_string()))?;

        let mut versions: Vec<String> = doc.versions.into_keys().collect();
        sort_versions_desc(&mut versions);
        Ok(versions)
    }

    async fn dependencies_of(
        &self,
        name: &str,
        version: &str,
    ) -> Result<PackageManifest, ScanError> {
        let url = format!("{}/{}/{}", self.base_url, Self::encode_name(name), version);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::unavailable(name, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::unavailable(
                name,
                format!(
                    "npm registry returned {} for {name}@{version}",
                    response.status()
                ),
            ));
        }

        let doc: VersionDocument = response
            .json()
            .await
            .map_err(|e| Self::unavailable(name, e.to_string()))?;

        Ok(PackageManifest {
            dependencies: doc.dependencies,
            dev_dependencies: doc.dev_dependencies,
            peer_dependencies: doc.peer_dependencies,
        })
    }
}

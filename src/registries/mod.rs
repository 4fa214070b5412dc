//! Registry clients for fetching package versions and dependency metadata.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::ScanError;

pub mod http_client;
pub mod npm;
pub mod pypi;

/// Dependency metadata for one published package version.
#[derive(Debug, Clone, Default)]
pub struct PackageManifest {
    /// Runtime dependencies: name -> declared range
    pub dependencies: HashMap<String, String>,
    /// Development dependencies
    pub dev_dependencies: HashMap<String, String>,
    /// Peer dependencies (npm only)
    pub peer_dependencies: HashMap<String, String>,
}

impl PackageManifest {
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
            && self.dev_dependencies.is_empty()
            && self.peer_dependencies.is_empty()
    }
}

/// Trait for package registry clients.
///
/// Object-safe so resolvers can hold `Arc<dyn PackageRegistry>` per
/// ecosystem without knowing the concrete client.
#[async_trait]
pub trait PackageRegistry: Send + Sync {
    /// All published version strings for a package, newest first.
    async fn list_versions(&self, name: &str) -> Result<Vec<String>, ScanError>;

    /// Dependency metadata for one published version.
    async fn dependencies_of(&self, name: &str, version: &str)
    -> Result<PackageManifest, ScanError>;
}

/// Sort version strings newest first, semver-aware with a lexicographic
/// fallback for versions semver cannot parse.
pub(crate) fn sort_versions_desc(versions: &mut [String]) {
    versions.sort_by(|a, b| {
        match (semver::Version::parse(a), semver::Version::parse(b)) {
            (Ok(va), Ok(vb)) => vb.cmp(&va),
            _ => b.cmp(a),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_versions_desc() {
        let mut versions = vec![
            "1.0.0".to_string(),
            "2.1.0".to_string(),
            "1.10.0".to_string(),
            "2.0.0".to_string(),
        ];
        sort_versions_desc(&mut versions);
        assert_eq!(versions, vec!["2.1.0", "2.0.0", "1.10.0", "1.0.0"]);
    }

    #[test]
    fn test_manifest_is_empty() {
        assert!(PackageManifest::default().is_empty());

        let mut manifest = PackageManifest::default();
        manifest
            .dependencies
            .insert("lodash".to_string(), "^4.17.21".to_string());
        assert!(!manifest.is_empty());
    }
}

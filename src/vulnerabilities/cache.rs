//! Vulnerability query cache with configurable TTL.
//!
//! Reduces OSV API traffic for repeated scans of the same manifests.
//! Keys are sha256 digests of `ecosystem:name:version` so cache keys stay
//! fixed-width regardless of package name length.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use super::Vulnerability;
use crate::graph::Ecosystem;

struct CacheEntry {
    vulnerabilities: Vec<Vulnerability>,
    inserted_at: Instant,
}

/// In-memory vulnerability cache, safe for concurrent read/write.
pub struct VulnerabilityCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl VulnerabilityCache {
    pub fn with_ttl(ttl_secs: u64) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub fn key(ecosystem: Ecosystem, name: &str, version: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}:{}", ecosystem.as_osv_str(), name, version));
        format!("{:x}", hasher.finalize())
    }

    /// Cached findings for a package version, if present and unexpired.
    pub fn get(&self, key: &str) -> Option<Vec<Vulnerability>> {
        self.entries.get(key).and_then(|entry| {
            if entry.inserted_at.elapsed() < self.ttl {
                Some(entry.vulnerabilities.clone())
            } else {
                None
            }
        })
    }

    pub fn insert(&self, key: String, vulnerabilities: Vec<Vulnerability>) {
        self.entries.insert(
            key,
            CacheEntry {
                vulnerabilities,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop expired entries.
    pub fn cleanup(&self) {
        self.entries
            .retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for VulnerabilityCache {
    fn default() -> Self {
        Self::with_ttl(24 * 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulnerabilities::Severity;

    fn finding(id: &str) -> Vulnerability {
        Vulnerability {
            package: "lodash".to_string(),
            version: "4.17.0".to_string(),
            ecosystem: Ecosystem::Npm,
            id: id.to_string(),
            severity: Severity::High,
            cvss_score: Some(7.4),
            cve_ids: vec![],
            summary: "Prototype pollution".to_string(),
            details: String::new(),
            advisory_url: "https://example.com".to_string(),
            fixed_range: Some(">=4.17.12".to_string()),
            published: None,
            modified: None,
            aliases: vec![],
            immediate_parent: None,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let cache = VulnerabilityCache::default();
        let key = VulnerabilityCache::key(Ecosystem::Npm, "lodash", "4.17.0");

        cache.insert(key.clone(), vec![finding("GHSA-jf85-cpcp-j695")]);

        let retrieved = cache.get(&key).unwrap();
        assert_eq!(retrieved.len(), 1);
        assert_eq!(retrieved[0].id, "GHSA-jf85-cpcp-j695");
    }

    #[test]
    fn test_key_is_stable_and_distinct() {
        let a = VulnerabilityCache::key(Ecosystem::Npm, "lodash", "4.17.0");
        let b = VulnerabilityCache::key(Ecosystem::Npm, "lodash", "4.17.0");
        let c = VulnerabilityCache::key(Ecosystem::PyPi, "lodash", "4.17.0");
        assert_eq!(a, b);
        assert_ne!(a, c);
        // sha256 hex digest
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_expired_entries_miss() {
        let cache = VulnerabilityCache::with_ttl(0);
        let key = VulnerabilityCache::key(Ecosystem::Npm, "lodash", "4.17.0");
        cache.insert(key.clone(), vec![finding("GHSA-x")]);
        assert!(cache.get(&key).is_none());

        cache.cleanup();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = VulnerabilityCache::default();
        cache.insert(
            VulnerabilityCache::key(Ecosystem::Npm, "lodash", "4.17.0"),
            vec![],
        );
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}

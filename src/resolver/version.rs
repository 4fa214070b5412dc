//! Version-range resolution: cache, registry selection, fallback cleaning.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::circuit::CircuitBreaker;
use super::{ResolvedVersion, VersionSource};
use crate::parsers::clean_version;
use crate::registries::PackageRegistry;

/// Sentinel for ranges the fallback cannot turn into a version.
pub const UNRESOLVED_VERSION: &str = "0.0.0";

struct CachedResolution {
    resolved_version: String,
    cached_at: Instant,
}

/// Resolves a declared range to a concrete version.
///
/// Order: unexpired cache entry keyed by `name@range`; else the highest
/// registry version satisfying the range; else fallback range cleaning.
/// Registry failures are recovered by the fallback and recorded on the
/// shared circuit breaker, never propagated.
pub struct VersionResolver {
    registry: Arc<dyn PackageRegistry>,
    breaker: Arc<CircuitBreaker>,
    cache: DashMap<String, CachedResolution>,
    ttl: Duration,
    semaphore: Arc<Semaphore>,
}

impl VersionResolver {
    pub fn new(
        registry: Arc<dyn PackageRegistry>,
        breaker: Arc<CircuitBreaker>,
        ttl: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            registry,
            breaker,
            cache: DashMap::new(),
            ttl,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub async fn resolve(&self, name: &str, range: &str, use_registry: bool) -> ResolvedVersion {
        let cache_key = format!("{name}@{range}");
        if let Some(entry) = self.cache.get(&cache_key)
            && entry.cached_at.elapsed() < self.ttl
        {
            return ResolvedVersion {
                original_range: range.to_string(),
                resolved_version: entry.resolved_version.clone(),
                source: VersionSource::Cache,
            };
        }

        if use_registry
            && self.breaker.allow_request().await
            && let Some(version) = self.resolve_from_registry(name, range).await
        {
            self.cache.insert(
                cache_key,
                CachedResolution {
                    resolved_version: version.clone(),
                    cached_at: Instant::now(),
                },
            );
            return ResolvedVersion {
                original_range: range.to_string(),
                resolved_version: version,
                source: VersionSource::Registry,
            };
        }

        let resolved_version = fallback_version(range);
        self.cache.insert(
            cache_key,
            CachedResolution {
                resolved_version: resolved_version.clone(),
                cached_at: Instant::now(),
            },
        );
        ResolvedVersion {
            original_range: range.to_string(),
            resolved_version,
            source: VersionSource::Fallback,
        }
    }

    async fn resolve_from_registry(&self, name: &str, range: &str) -> Option<String> {
        match self.registry.list_versions(name).await {
            Ok(versions) => {
                self.breaker.record_success().await;
                select_highest_satisfying(&versions, range)
            }
            Err(e) => {
                warn!(package = name, error = %e, "registry version lookup failed, falling back");
                self.breaker.record_failure().await;
                None
            }
        }
    }

    /// Resolve many ranges with bounded registry concurrency.
    pub async fn resolve_multiple(
        &self,
        requests: &[(String, String)],
        use_registry: bool,
    ) -> Vec<ResolvedVersion> {
        let futures = requests.iter().map(|(name, range)| {
            let semaphore = Arc::clone(&self.semaphore);
            async move {
                // A closed semaphore cannot happen; treat it as a skip
                let _permit = semaphore.acquire().await;
                self.resolve(name, range, use_registry).await
            }
        });
        join_all(futures).await
    }

    /// Drop expired cache entries.
    pub fn cleanup(&self) {
        let ttl = self.ttl;
        self.cache.retain(|_, entry| entry.cached_at.elapsed() < ttl);
    }

    #[cfg(test)]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

/// Highest version in the (newest-first) list satisfying `range`.
pub fn select_highest_satisfying(versions: &[String], range: &str) -> Option<String> {
    let range_has_prerelease = range.contains('-');
    let mut best: Option<(semver::Version, &String)> = None;
    for raw in versions {
        let Some(version) = parse_loose(raw) else {
            continue;
        };
        if !version.pre.is_empty() && !range_has_prerelease {
            continue;
        }
        if !satisfies(&version, range) {
            continue;
        }
        match &best {
            Some((current, _)) if *current >= version => {}
            _ => best = Some((version, raw)),
        }
    }
    best.map(|(_, raw)| raw.clone())
}

/// Whether `version` satisfies one declared range.
///
/// Caret pins the major, tilde pins major.minor, comparison operators are
/// standard, and a bare string means exact. Compound ranges joined by
/// commas or spaces must hold in every part.
pub fn satisfies(version: &semver::Version, range: &str) -> bool {
    let range = range.trim();
    if range.is_empty() || range == "*" || range == "latest" {
        return true;
    }

    if let Some(rest) = range.strip_prefix('^') {
        let Some(base) = parse_loose(rest) else {
            return false;
        };
        return version.major == base.major && *version >= base;
    }
    // PEP 440 compatible release: `~=2.3` pins the major, `~=2.3.1` pins
    // major.minor
    if let Some(rest) = range.strip_prefix("~=") {
        let Some(base) = parse_loose(rest) else {
            return false;
        };
        let pins_minor = rest.trim().matches('.').count() >= 2;
        return version.major == base.major
            && (!pins_minor || version.minor == base.minor)
            && *version >= base;
    }
    if let Some(rest) = range.strip_prefix('~') {
        let Some(base) = parse_loose(rest) else {
            return false;
        };
        return version.major == base.major && version.minor == base.minor && *version >= base;
    }

    range
        .split([',', ' '])
        .filter(|part| !part.trim().is_empty())
        .all(|part| satisfies_comparator(version, part.trim()))
}

fn satisfies_comparator(version: &semver::Version, part: &str) -> bool {
    // Prefix operators inside a compound range keep their own semantics
    if part.starts_with("~=") || part.starts_with('^') || part.starts_with('~') {
        return satisfies(version, part);
    }

    let (op, rest): (&str, &str) = if let Some(rest) = part.strip_prefix(">=") {
        (">=", rest)
    } else if let Some(rest) = part.strip_prefix("<=") {
        ("<=", rest)
    } else if let Some(rest) = part.strip_prefix("!=") {
        ("!=", rest)
    } else if let Some(rest) = part.strip_prefix("===") {
        ("=", rest)
    } else if let Some(rest) = part.strip_prefix("==") {
        ("=", rest)
    } else if let Some(rest) = part.strip_prefix('>') {
        (">", rest)
    } else if let Some(rest) = part.strip_prefix('<') {
        ("<", rest)
    } else if let Some(rest) = part.strip_prefix('=') {
        ("=", rest)
    } else {
        ("=", part)
    };

    let Some(base) = parse_loose(rest) else {
        return false;
    };
    match op {
        ">=" => *version >= base,
        "<=" => *version <= base,
        ">" => *version > base,
        "<" => *version < base,
        "!=" => *version != base,
        _ => *version == base,
    }
}

/// Lenient semver parsing: tolerates a leading `v` and pads missing
/// minor/patch components (`"2"` -> `2.0.0`).
pub fn parse_loose(raw: &str) -> Option<semver::Version> {
    let trimmed = raw.trim().trim_start_matches('v');
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(version) = semver::Version::parse(trimmed) {
        return Some(version);
    }

    // Split off prerelease/build before padding
    let (core, suffix) = match trimmed.find(['-', '+']) {
        Some(pos) => (&trimmed[..pos], &trimmed[pos..]),
        None => (trimmed, ""),
    };
    let components: Vec<&str> = core.split('.').collect();
    if components.is_empty() || components.len() > 3 {
        return None;
    }
    let mut padded = components.clone();
    while padded.len() < 3 {
        padded.push("0");
    }
    semver::Version::parse(&format!("{}{}", padded.join("."), suffix)).ok()
}

/// Range-cleaning fallback: strip operators, keep the first alternative,
/// validate as a version. Unparsable ranges get the sentinel.
pub fn fallback_version(range: &str) -> String {
    let cleaned = clean_version(range);
    if parse_loose(&cleaned).is_some() {
        cleaned
    } else {
        debug!(range, "range not resolvable to a version, using sentinel");
        UNRESOLVED_VERSION.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::error::ScanError;
    use crate::registries::PackageManifest;

    struct FakeRegistry {
        versions: Vec<String>,
        fail: bool,
    }

    #[async_trait]
    impl PackageRegistry for FakeRegistry {
        async fn list_versions(&self, name: &str) -> Result<Vec<String>, ScanError> {
            if self.fail {
                return Err(ScanError::RegistryUnavailable {
                    package: name.to_string(),
                    message: "unreachable".to_string(),
                });
            }
            Ok(self.versions.clone())
        }

        async fn dependencies_of(
            &self,
            _name: &str,
            _version: &str,
        ) -> Result<PackageManifest, ScanError> {
            Ok(PackageManifest {
                dependencies: HashMap::new(),
                dev_dependencies: HashMap::new(),
                peer_dependencies: HashMap::new(),
            })
        }
    }

    fn resolver(versions: &[&str], fail: bool) -> VersionResolver {
        VersionResolver::new(
            Arc::new(FakeRegistry {
                versions: versions.iter().map(|v| v.to_string()).collect(),
                fail,
            }),
            Arc::new(CircuitBreaker::new(3, Duration::from_secs(10))),
            Duration::from_secs(3600),
            10,
        )
    }

    fn v(s: &str) -> semver::Version {
        parse_loose(s).unwrap()
    }

    #[test]
    fn test_caret_semantics() {
        assert!(satisfies(&v("4.17.21"), "^4.17.0"));
        assert!(satisfies(&v("4.99.0"), "^4.17.0"));
        assert!(!satisfies(&v("5.0.0"), "^4.17.0"));
        assert!(!satisfies(&v("4.16.0"), "^4.17.0"));
    }

    #[test]
    fn test_tilde_semantics() {
        assert!(satisfies(&v("2.3.9"), "~2.3.2"));
        assert!(!satisfies(&v("2.4.0"), "~2.3.2"));
        assert!(!satisfies(&v("2.3.1"), "~2.3.2"));
    }

    #[test]
    fn test_comparator_semantics() {
        assert!(satisfies(&v("2.28.0"), ">=2.28.0"));
        assert!(satisfies(&v("3.0.0"), ">2.28.0"));
        assert!(!satisfies(&v("2.27.0"), ">=2.28.0"));
        assert!(satisfies(&v("1.5.0"), ">=1.0.0,<2.0.0"));
        assert!(!satisfies(&v("2.0.0"), ">=1.0.0,<2.0.0"));
        assert!(satisfies(&v("1.5.0"), ">=1.0.0 <2.0.0"));
        assert!(satisfies(&v("1.2.3"), "1.2.3"));
        assert!(satisfies(&v("1.2.3"), "==1.2.3"));
        assert!(!satisfies(&v("1.2.4"), "1.2.3"));
    }

    #[test]
    fn test_pep440_specifiers() {
        assert!(satisfies(&v("2.9.0"), "~=2.3"));
        assert!(!satisfies(&v("3.0.0"), "~=2.3"));
        assert!(satisfies(&v("2.3.9"), "~=2.3.1"));
        assert!(!satisfies(&v("2.4.0"), "~=2.3.1"));
        assert!(satisfies(&v("1.2.3"), "===1.2.3"));
        assert!(!satisfies(&v("1.2.4"), "===1.2.3"));
        assert!(satisfies(&v("2.6.0"), ">=2.0,!=2.5"));
        assert!(!satisfies(&v("2.5.0"), ">=2.0,!=2.5"));
    }

    #[test]
    fn test_parse_loose_padding() {
        assert_eq!(parse_loose("2"), Some(semver::Version::new(2, 0, 0)));
        assert_eq!(parse_loose("2.1"), Some(semver::Version::new(2, 1, 0)));
        assert_eq!(parse_loose("v1.2.3"), Some(semver::Version::new(1, 2, 3)));
        assert!(parse_loose("not-a-version").is_none());
    }

    #[test]
    fn test_select_highest_satisfying() {
        let versions: Vec<String> = ["5.0.0", "4.17.21", "4.17.20", "4.16.0", "4.18.0-beta.1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            select_highest_satisfying(&versions, "^4.17.0"),
            Some("4.17.21".to_string())
        );
        assert_eq!(
            select_highest_satisfying(&versions, ">=4.0.0"),
            Some("5.0.0".to_string())
        );
        assert_eq!(select_highest_satisfying(&versions, "^6.0.0"), None);
    }

    #[test]
    fn test_prereleases_excluded_by_default() {
        let versions = vec!["2.0.0-rc.1".to_string(), "1.9.0".to_string()];
        assert_eq!(
            select_highest_satisfying(&versions, ">=1.0.0"),
            Some("1.9.0".to_string())
        );
    }

    #[test]
    fn test_fallback_version() {
        assert_eq!(fallback_version("^1.2.3"), "1.2.3");
        assert_eq!(fallback_version(">=2.28.0"), "2.28.0");
        assert_eq!(fallback_version("1.0.0 - 2.0.0"), "1.0.0");
        assert_eq!(fallback_version("*"), UNRESOLVED_VERSION);
        assert_eq!(fallback_version("workspace:*"), UNRESOLVED_VERSION);
    }

    #[tokio::test]
    async fn test_resolve_from_registry() {
        let resolver = resolver(&["4.17.21", "4.17.20", "4.16.0"], false);
        let resolved = resolver.resolve("lodash", "^4.17.0", true).await;
        assert_eq!(resolved.resolved_version, "4.17.21");
        assert_eq!(resolved.source, VersionSource::Registry);
        assert_eq!(resolved.original_range, "^4.17.0");
    }

    #[tokio::test]
    async fn test_resolve_caches() {
        let resolver = resolver(&["4.17.21"], false);
        let first = resolver.resolve("lodash", "^4.17.0", true).await;
        assert_eq!(first.source, VersionSource::Registry);

        let second = resolver.resolve("lodash", "^4.17.0", true).await;
        assert_eq!(second.source, VersionSource::Cache);
        assert_eq!(second.resolved_version, "4.17.21");
        assert_eq!(resolver.cache_len(), 1);
    }

    #[tokio::test]
    async fn test_registry_failure_falls_back() {
        let resolver = resolver(&[], true);
        let resolved = resolver.resolve("lodash", "^4.17.0", true).await;
        assert_eq!(resolved.source, VersionSource::Fallback);
        assert_eq!(resolved.resolved_version, "4.17.0");
    }

    #[tokio::test]
    async fn test_no_registry_use() {
        let resolver = resolver(&["9.9.9"], false);
        let resolved = resolver.resolve("lodash", "~1.2.0", false).await;
        assert_eq!(resolved.source, VersionSource::Fallback);
        assert_eq!(resolved.resolved_version, "1.2.0");
    }

    #[tokio::test]
    async fn test_resolve_multiple() {
        let resolver = resolver(&["2.0.0", "1.5.0"], false);
        let requests = vec![
            ("a".to_string(), ">=1.0.0".to_string()),
            ("b".to_string(), "^1.0.0".to_string()),
        ];
        let resolved = resolver.resolve_multiple(&requests, true).await;
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].resolved_version, "2.0.0");
        assert_eq!(resolved[1].resolved_version, "1.5.0");
    }
}

//! Transitive dependency resolution for one ecosystem.
//!
//! Starting from a manifest's direct range maps, each depth level is
//! processed in bounded batches: resolve the declared range to a concrete
//! version, emit a [`Dependency`] with its provenance path, then fetch the
//! package's own declared dependencies and queue them for the next level.
//! Cycles and version conflicts are counted in stats, never raised. The
//! whole run is wrapped in an overall deadline; on expiry, whatever
//! resolved so far is returned together with an error note.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, warn};

use super::circuit::CircuitBreaker;
use super::version::{VersionResolver, parse_loose};
use super::{ResolutionOutcome, ResolutionStats, VersionSource};
use crate::config::ResolverConfig;
use crate::graph::{Dependency, Ecosystem, create_path, would_cycle};
use crate::registries::PackageRegistry;

/// High-fan-out tooling packages that are never expanded transitively.
/// Their trees are enormous and irrelevant for matching.
const DENY_LIST: &[&str] = &[
    "webpack", "jest", "eslint", "mocha", "karma", "gulp", "grunt", "typescript", "prettier",
    "rollup", "vite", "babel", "tsup", "nodemon", "pytest", "tox", "sphinx", "setuptools",
    "wheel", "pip", "black", "mypy", "flake8",
];

const DENY_PREFIXES: &[&str] = &["@babel/", "@types/", "eslint-", "jest-", "webpack-", "babel-"];

fn is_denied(name: &str) -> bool {
    DENY_LIST.contains(&name) || DENY_PREFIXES.iter().any(|p| name.starts_with(p))
}

struct WorkItem {
    name: String,
    range: String,
    /// Provenance path of the parent; the item's own name is appended on emit
    parent_path: Vec<String>,
    is_dev: bool,
}

/// Per-ecosystem transitive resolver. One instance per [`crate::Engine`];
/// the circuit breaker and version cache are shared with the version
/// resolver for the same ecosystem.
pub struct TransitiveResolver {
    ecosystem: Ecosystem,
    registry: Arc<dyn PackageRegistry>,
    versions: Arc<VersionResolver>,
    breaker: Arc<CircuitBreaker>,
    config: ResolverConfig,
}

impl TransitiveResolver {
    pub fn new(
        ecosystem: Ecosystem,
        registry: Arc<dyn PackageRegistry>,
        versions: Arc<VersionResolver>,
        breaker: Arc<CircuitBreaker>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            ecosystem,
            registry,
            versions,
            breaker,
            config,
        }
    }

    /// Resolve a manifest's declared ranges and their transitive closure.
    pub async fn resolve(
        &self,
        direct: &HashMap<String, String>,
        dev: &HashMap<String, String>,
        peer: &HashMap<String, String>,
        include_dev: bool,
        use_registry: bool,
    ) -> ResolutionOutcome {
        let deadline = Instant::now() + self.config.overall_timeout();
        let mut outcome = ResolutionOutcome::default();
        let mut index: HashMap<String, usize> = HashMap::new();

        let mut level: Vec<WorkItem> = Vec::new();
        for (name, range) in direct {
            level.push(WorkItem {
                name: name.clone(),
                range: range.clone(),
                parent_path: Vec::new(),
                is_dev: false,
            });
        }
        for (name, range) in peer {
            level.push(WorkItem {
                name: name.clone(),
                range: range.clone(),
                parent_path: Vec::new(),
                is_dev: false,
            });
        }
        if include_dev {
            for (name, range) in dev {
                level.push(WorkItem {
                    name: name.clone(),
                    range: range.clone(),
                    parent_path: Vec::new(),
                    is_dev: true,
                });
            }
        }

        let mut depth = 1usize;
        while !level.is_empty() {
            debug!(
                ecosystem = %self.ecosystem,
                depth,
                pending = level.len(),
                "resolving dependency level"
            );
            let mut next_level: Vec<WorkItem> = Vec::new();

            for batch in level.chunks(self.config.max_concurrent.max(1)) {
                if Instant::now() >= deadline {
                    warn!(
                        ecosystem = %self.ecosystem,
                        resolved = outcome.dependencies.len(),
                        "resolution deadline exceeded, returning partial results"
                    );
                    outcome.errors.push(format!(
                        "resolution deadline of {}s exceeded at depth {depth}; results are partial",
                        self.config.overall_timeout_secs
                    ));
                    outcome.stats.total_packages = outcome.dependencies.len();
                    return outcome;
                }

                let descend = use_registry && depth < self.config.max_depth;
                let results = join_all(
                    batch
                        .iter()
                        .map(|item| self.process_item(item, use_registry, descend)),
                )
                .await;

                for (item, resolved, children) in results {
                    self.merge(
                        item,
                        resolved,
                        children,
                        &mut outcome,
                        &mut index,
                        &mut next_level,
                        use_registry,
                    );
                }

                if self.config.batch_delay_ms > 0 {
                    tokio::time::sleep(self.config.batch_delay()).await;
                }
            }

            level = next_level;
            depth += 1;
        }

        outcome.stats.total_packages = outcome.dependencies.len();
        outcome
    }

    async fn process_item(
        &self,
        item: &WorkItem,
        use_registry: bool,
        descend: bool,
    ) -> (WorkItem, super::ResolvedVersion, Option<HashMap<String, String>>) {
        let resolved = self
            .versions
            .resolve(&item.name, &item.range, use_registry)
            .await;

        let mut children = None;
        if descend && !is_denied(item.name.as_str()) && self.breaker.allow_request().await {
            match self
                .registry
                .dependencies_of(&item.name, &resolved.resolved_version)
                .await
            {
                Ok(manifest) => {
                    self.breaker.record_success().await;
                    // Only runtime dependencies of transitives are followed
                    children = Some(manifest.dependencies);
                }
                Err(e) => {
                    warn!(
                        package = %item.name,
                        version = %resolved.resolved_version,
                        error = %e,
                        "dependency metadata fetch failed, subtree not expanded"
                    );
                    self.breaker.record_failure().await;
                }
            }
        }

        let item = WorkItem {
            name: item.name.clone(),
            range: item.range.clone(),
            parent_path: item.parent_path.clone(),
            is_dev: item.is_dev,
        };
        (item, resolved, children)
    }

    #[allow(clippy::too_many_arguments)]
    fn merge(
        &self,
        item: WorkItem,
        resolved: super::ResolvedVersion,
        children: Option<HashMap<String, String>>,
        outcome: &mut ResolutionOutcome,
        index: &mut HashMap<String, usize>,
        next_level: &mut Vec<WorkItem>,
        use_registry: bool,
    ) {
        if would_cycle(&item.parent_path, &item.name) {
            debug!(package = %item.name, "cycle detected, not recursing");
            outcome.stats.circular_dependencies += 1;
            return;
        }

        match resolved.source {
            VersionSource::Cache => outcome.stats.cache_hits += 1,
            VersionSource::Registry => outcome.stats.registry_lookups += 1,
            VersionSource::Fallback => {
                if use_registry {
                    outcome.stats.failed_resolutions += 1;
                }
            }
        }

        let path = create_path(&item.parent_path, &item.name);

        if let Some(&existing) = index.get(&item.name) {
            // Already resolved elsewhere in this run; keep the higher version
            let current = &outcome.dependencies[existing];
            if current.version != resolved.resolved_version {
                outcome.stats.version_conflicts += 1;
                let keep_new = match (
                    parse_loose(&current.version),
                    parse_loose(&resolved.resolved_version),
                ) {
                    (Some(old), Some(new)) => new > old,
                    (None, Some(_)) => true,
                    _ => false,
                };
                if keep_new {
                    outcome.dependencies[existing].version = resolved.resolved_version;
                }
            }
            return;
        }

        let dependency = Dependency::at_path(
            &item.name,
            &resolved.resolved_version,
            self.ecosystem,
            path.clone(),
        )
        .dev(item.is_dev);
        index.insert(item.name.clone(), outcome.dependencies.len());
        outcome.dependencies.push(dependency);

        if let Some(children) = children {
            for (child_name, child_range) in children {
                next_level.push(WorkItem {
                    name: child_name,
                    range: child_range,
                    parent_path: path.clone(),
                    is_dev: item.is_dev,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::ScanError;
    use crate::registries::PackageManifest;

    /// In-memory registry: version lists plus per-version dependency maps.
    struct FakeRegistry {
        versions: HashMap<String, Vec<String>>,
        deps: HashMap<String, HashMap<String, String>>,
    }

    impl FakeRegistry {
        fn new() -> Self {
            Self {
                versions: HashMap::new(),
                deps: HashMap::new(),
            }
        }

        fn package(mut self, name: &str, versions: &[&str], deps: &[(&str, &str)]) -> Self {
            self.versions
                .insert(name.to_string(), versions.iter().map(|v| v.to_string()).collect());
            self.deps.insert(
                name.to_string(),
                deps.iter()
                    .map(|(n, r)| (n.to_string(), r.to_string()))
                    .collect(),
            );
            self
        }
    }

    #[async_trait]
    impl PackageRegistry for FakeRegistry {
        async fn list_versions(&self, name: &str) -> Result<Vec<String>, ScanError> {
            self.versions
                .get(name)
                .cloned()
                .ok_or_else(|| ScanError::RegistryUnavailable {
                    package: name.to_string(),
                    message: "not found".to_string(),
                })
        }

        async fn dependencies_of(
            &self,
            name: &str,
            _version: &str,
        ) -> Result<PackageManifest, ScanError> {
            Ok(PackageManifest {
                dependencies: self.deps.get(name).cloned().unwrap_or_default(),
                dev_dependencies: HashMap::new(),
                peer_dependencies: HashMap::new(),
            })
        }
    }

    fn resolver_for(registry: FakeRegistry, config: ResolverConfig) -> TransitiveResolver {
        let registry: Arc<dyn PackageRegistry> = Arc::new(registry);
        let breaker = Arc::new(CircuitBreaker::new(
            config.failure_threshold,
            config.cooldown(),
        ));
        let versions = Arc::new(VersionResolver::new(
            Arc::clone(&registry),
            Arc::clone(&breaker),
            Duration::from_secs(3600),
            config.version_concurrency,
        ));
        TransitiveResolver::new(Ecosystem::Npm, registry, versions, breaker, config)
    }

    fn fast_config() -> ResolverConfig {
        ResolverConfig {
            batch_delay_ms: 0,
            ..ResolverConfig::default()
        }
    }

    fn ranges(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(n, r)| (n.to_string(), r.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_transitive_expansion_with_paths() {
        let registry = FakeRegistry::new()
            .package("express", &["4.18.2"], &[("accepts", "^1.3.8")])
            .package("accepts", &["1.3.8"], &[("mime-types", "^2.1.0")])
            .package("mime-types", &["2.1.35"], &[]);
        let resolver = resolver_for(registry, fast_config());

        let outcome = resolver
            .resolve(
                &ranges(&[("express", "^4.18.0")]),
                &HashMap::new(),
                &HashMap::new(),
                false,
                true,
            )
            .await;

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.dependencies.len(), 3);
        assert_eq!(outcome.stats.total_packages, 3);

        let express = outcome.dependencies.iter().find(|d| d.name == "express").unwrap();
        assert!(express.is_direct);
        assert_eq!(express.version, "4.18.2");

        let mime = outcome
            .dependencies
            .iter()
            .find(|d| d.name == "mime-types")
            .unwrap();
        assert!(!mime.is_direct);
        assert_eq!(mime.path, vec!["express", "accepts", "mime-types"]);
    }

    #[tokio::test]
    async fn test_cycle_is_counted_not_fatal() {
        let registry = FakeRegistry::new()
            .package("a", &["1.0.0"], &[("b", "1.0.0")])
            .package("b", &["1.0.0"], &[("c", "1.0.0")])
            .package("c", &["1.0.0"], &[("a", "1.0.0")]);
        let resolver = resolver_for(registry, fast_config());

        let outcome = resolver
            .resolve(
                &ranges(&[("a", "1.0.0")]),
                &HashMap::new(),
                &HashMap::new(),
                false,
                true,
            )
            .await;

        assert!(outcome.stats.circular_dependencies >= 1);
        assert_eq!(outcome.dependencies.len(), 3);
    }

    #[tokio::test]
    async fn test_version_conflict_keeps_higher() {
        let registry = FakeRegistry::new()
            .package("x", &["1.0.0"], &[("shared", "1.1.0")])
            .package("y", &["1.0.0"], &[("shared", "1.5.0")])
            .package("shared", &["1.5.0", "1.1.0"], &[]);
        let resolver = resolver_for(registry, fast_config());

        let outcome = resolver
            .resolve(
                &ranges(&[("x", "1.0.0"), ("y", "1.0.0")]),
                &HashMap::new(),
                &HashMap::new(),
                false,
                true,
            )
            .await;

        assert_eq!(outcome.stats.version_conflicts, 1);
        let shared = outcome
            .dependencies
            .iter()
            .find(|d| d.name == "shared")
            .unwrap();
        assert_eq!(shared.version, "1.5.0");
    }

    #[tokio::test]
    async fn test_deny_listed_not_expanded() {
        let registry = FakeRegistry::new()
            .package("webpack", &["5.90.0"], &[("acorn", "^8.0.0")])
            .package("acorn", &["8.11.0"], &[]);
        let resolver = resolver_for(registry, fast_config());

        let outcome = resolver
            .resolve(
                &ranges(&[("webpack", "^5.0.0")]),
                &HashMap::new(),
                &HashMap::new(),
                false,
                true,
            )
            .await;

        // webpack itself is emitted but its subtree is not walked
        assert_eq!(outcome.dependencies.len(), 1);
        assert_eq!(outcome.dependencies[0].name, "webpack");
    }

    #[tokio::test]
    async fn test_depth_limit() {
        // chain a -> b -> c with max_depth 2: c is never reached
        let registry = FakeRegistry::new()
            .package("a", &["1.0.0"], &[("b", "1.0.0")])
            .package("b", &["1.0.0"], &[("c", "1.0.0")])
            .package("c", &["1.0.0"], &[]);
        let config = ResolverConfig {
            max_depth: 2,
            ..fast_config()
        };
        let resolver = resolver_for(registry, config);

        let outcome = resolver
            .resolve(
                &ranges(&[("a", "1.0.0")]),
                &HashMap::new(),
                &HashMap::new(),
                false,
                true,
            )
            .await;

        let names: Vec<&str> = outcome.dependencies.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"a"));
        assert!(names.contains(&"b"));
        assert!(!names.contains(&"c"));
    }

    #[tokio::test]
    async fn test_registry_failures_fall_back() {
        // Nothing is registered: every lookup fails, fallback cleaning runs
        let resolver = resolver_for(FakeRegistry::new(), fast_config());

        let outcome = resolver
            .resolve(
                &ranges(&[("ghost", "^2.1.0")]),
                &HashMap::new(),
                &HashMap::new(),
                false,
                true,
            )
            .await;

        assert_eq!(outcome.dependencies.len(), 1);
        assert_eq!(outcome.dependencies[0].version, "2.1.0");
        assert!(outcome.stats.failed_resolutions >= 1);
    }

    #[tokio::test]
    async fn test_dev_dependencies_flag() {
        let registry = FakeRegistry::new()
            .package("lodash", &["4.17.21"], &[])
            .package("jest", &["29.0.0"], &[]);
        let resolver = resolver_for(registry, fast_config());

        let direct = ranges(&[("lodash", "^4.17.0")]);
        let dev = ranges(&[("jest", "^29.0.0")]);

        let without = resolver
            .resolve(&direct, &dev, &HashMap::new(), false, true)
            .await;
        assert_eq!(without.dependencies.len(), 1);

        let registry = FakeRegistry::new()
            .package("lodash", &["4.17.21"], &[])
            .package("jest", &["29.0.0"], &[]);
        let resolver = resolver_for(registry, fast_config());
        let with = resolver.resolve(&direct, &dev, &HashMap::new(), true, true).await;
        assert_eq!(with.dependencies.len(), 2);
        let jest = with.dependencies.iter().find(|d| d.name == "jest").unwrap();
        assert!(jest.is_dev);
    }

    #[tokio::test]
    async fn test_deadline_returns_partial_with_error() {
        let registry = FakeRegistry::new()
            .package("a", &["1.0.0"], &[("b", "1.0.0")])
            .package("b", &["1.0.0"], &[]);
        let config = ResolverConfig {
            overall_timeout_secs: 0,
            ..fast_config()
        };
        let resolver = resolver_for(registry, config);

        let outcome = resolver
            .resolve(
                &ranges(&[("a", "1.0.0")]),
                &HashMap::new(),
                &HashMap::new(),
                false,
                true,
            )
            .await;

        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("deadline"));
    }

    #[test]
    fn test_deny_list_prefixes() {
        assert!(is_denied("webpack"));
        assert!(is_denied("@babel/core"));
        assert!(is_denied("@types/node"));
        assert!(is_denied("eslint-plugin-import"));
        assert!(!is_denied("express"));
        assert!(!is_denied("flask"));
    }
}

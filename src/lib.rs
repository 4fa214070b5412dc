//! depscan - dependency resolution and vulnerability matching for npm and PyPI
//!
//! The crate turns manifest/lockfile text into a provenance-tagged dependency
//! set (direct and transitive), then matches every resolved package against
//! the OSV.dev vulnerability database, producing severity-scored, deduplicated
//! findings. All wiring lives on [`Engine`]; there are no module-level
//! singletons.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

pub mod config;
pub mod consistency;
pub mod error;
pub mod formats;
pub mod graph;
pub mod parsers;
pub mod registries;
pub mod resolver;
pub mod vulnerabilities;

pub use config::{EngineConfig, ScanOptions};
pub use error::ScanError;
pub use graph::{Dependency, Ecosystem};
pub use vulnerabilities::{Severity, Vulnerability};

use config::ResolverConfig;
use formats::FormatId;
use registries::http_client::create_shared_client;
use registries::npm::NpmRegistry;
use registries::pypi::PyPiRegistry;
use registries::PackageRegistry;
use resolver::{CircuitBreaker, TransitiveResolver, VersionResolver};
use vulnerabilities::osv::OsvClient;

/// One scan engine: shared HTTP client, per-ecosystem resolvers with their
/// caches and circuit breakers, and the vulnerability client.
///
/// Construct once per process and share behind an `Arc` if needed; every
/// method takes `&self` and is safe under concurrent callers.
pub struct Engine {
    config: EngineConfig,
    npm_resolver: TransitiveResolver,
    pypi_resolver: TransitiveResolver,
    osv: OsvClient,
}

impl Engine {
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        let client = create_shared_client()?;

        let npm_resolver = build_resolver(
            Ecosystem::Npm,
            Arc::new(NpmRegistry::with_base_url(
                client.clone(),
                config.npm_registry_url.clone(),
            )),
            &config,
        );
        let pypi_resolver = build_resolver(
            Ecosystem::PyPi,
            Arc::new(PyPiRegistry::with_base_url(
                client.clone(),
                config.pypi_registry_url.clone(),
            )),
            &config,
        );
        let osv = OsvClient::new(
            client,
            config.osv_base_url.clone(),
            config.vulnerability.clone(),
        );

        Ok(Self {
            config,
            npm_resolver,
            pypi_resolver,
            osv,
        })
    }

    /// Resolve the dependency set of a project given its dependency files,
    /// keyed by filename.
    ///
    /// Each ecosystem picks its best available format independently; a
    /// failure in one ecosystem is non-fatal as long as the other produced
    /// results. The output is deduplicated by `(ecosystem, name, version)`.
    pub async fn resolve_dependencies(
        &self,
        files: &HashMap<String, String>,
        options: &ScanOptions,
    ) -> Result<Vec<Dependency>, ScanError> {
        let mut selected: Vec<(Ecosystem, String, FormatId)> = Vec::new();
        let mut missing: Vec<ScanError> = Vec::new();
        for ecosystem in [Ecosystem::Npm, Ecosystem::PyPi] {
            match formats::select_best(ecosystem, files) {
                Ok((filename, format)) => selected.push((ecosystem, filename, format)),
                Err(err) => missing.push(err),
            }
        }
        if selected.is_empty() {
            return Err(missing.into_iter().next().unwrap_or(ScanError::EmptyInput));
        }

        let mut all: Vec<Dependency> = Vec::new();
        let mut last_error: Option<ScanError> = None;
        let mut succeeded = 0usize;

        for (ecosystem, filename, format) in selected {
            let content = match files.get(&filename) {
                Some(content) => content,
                None => continue,
            };
            match self
                .resolve_ecosystem(ecosystem, &filename, format, content, options)
                .await
            {
                Ok(deps) => {
                    succeeded += 1;
                    all.extend(deps);
                }
                Err(err) => {
                    warn!(%ecosystem, file = %filename, error = %err, "ecosystem resolution failed");
                    last_error = Some(err);
                }
            }
        }

        if succeeded == 0
            && let Some(err) = last_error
        {
            return Err(err);
        }

        Ok(graph::deduplicate(all))
    }

    async fn resolve_ecosystem(
        &self,
        ecosystem: Ecosystem,
        filename: &str,
        format: FormatId,
        content: &str,
        options: &ScanOptions,
    ) -> Result<Vec<Dependency>, ScanError> {
        let include_dev = options.include_dev_dependencies;

        let mut deps = if self.config.use_registry && !format.is_lockfile() {
            // Manifests seed the resolver with their declared ranges so
            // `flask>=2.0` can resolve to the highest satisfying release,
            // not the cleaned lower bound
            let ranges = parsers::direct_ranges(filename, format, content)?;
            let resolver = match ecosystem {
                Ecosystem::Npm => &self.npm_resolver,
                Ecosystem::PyPi => &self.pypi_resolver,
            };
            let outcome = resolver
                .resolve(
                    &ranges.dependencies.into_iter().collect(),
                    &ranges.dev_dependencies.into_iter().collect(),
                    &ranges.peer_dependencies.into_iter().collect(),
                    include_dev,
                    true,
                )
                .await;
            for note in &outcome.errors {
                warn!(%ecosystem, file = %filename, "{note}");
            }
            outcome.dependencies
        } else {
            parsers::parser_for_file(filename, format).parse(content)?
        };

        if !include_dev {
            deps.retain(|dep| !dep.is_dev);
        }
        Ok(deps)
    }

    /// Match a resolved dependency set against the vulnerability database,
    /// then apply the caller's ignore rules.
    pub async fn scan_for_vulnerabilities(
        &self,
        deps: &[Dependency],
        options: &ScanOptions,
    ) -> Result<Vec<Vulnerability>, ScanError> {
        let findings = self.osv.scan(deps).await?;
        Ok(findings
            .into_iter()
            .filter(|finding| !options.is_ignored(&finding.package, &finding.id, finding.severity))
            .collect())
    }
}

fn build_resolver(
    ecosystem: Ecosystem,
    registry: Arc<dyn PackageRegistry>,
    config: &EngineConfig,
) -> TransitiveResolver {
    let resolver: &ResolverConfig = &config.resolver;
    let breaker = Arc::new(CircuitBreaker::new(
        resolver.failure_threshold,
        resolver.cooldown(),
    ));
    let versions = Arc::new(VersionResolver::new(
        registry.clone(),
        breaker.clone(),
        Duration::from_secs(config.version_cache_ttl_secs),
        resolver.version_concurrency,
    ));
    TransitiveResolver::new(ecosystem, registry, versions, breaker, resolver.clone())
}

/// Resolve dependencies with default engine wiring.
pub async fn resolve_dependencies(
    files: &HashMap<String, String>,
    options: &ScanOptions,
) -> anyhow::Result<Vec<Dependency>> {
    let engine = Engine::new(EngineConfig::default())?;
    Ok(engine.resolve_dependencies(files, options).await?)
}

/// Scan a dependency set with default engine wiring.
pub async fn scan_for_vulnerabilities(
    deps: &[Dependency],
    options: &ScanOptions,
) -> anyhow::Result<Vec<Vulnerability>> {
    let engine = Engine::new(EngineConfig::default())?;
    Ok(engine.scan_for_vulnerabilities(deps, options).await?)
}

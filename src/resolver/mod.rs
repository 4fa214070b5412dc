//! Version-range and transitive dependency resolution.

use serde::Serialize;

pub mod circuit;
pub mod transitive;
pub mod version;

pub use circuit::CircuitBreaker;
pub use transitive::TransitiveResolver;
pub use version::VersionResolver;

/// Where a resolved version came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionSource {
    /// Unexpired cache entry keyed by `name@range`
    Cache,
    /// Highest registry version satisfying the range
    Registry,
    /// Range-cleaning fallback, no registry involvement
    Fallback,
}

/// Output of one version-range resolution.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedVersion {
    /// The declared range as written in the manifest
    pub original_range: String,
    /// The concrete version selected
    pub resolved_version: String,
    pub source: VersionSource,
}

/// Counters accumulated over one transitive resolution run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionStats {
    pub total_packages: usize,
    pub cache_hits: usize,
    pub registry_lookups: usize,
    pub version_conflicts: usize,
    pub circular_dependencies: usize,
    pub failed_resolutions: usize,
}

/// Result of one transitive resolution run. Recovered failures land in
/// `errors` as diagnostics; they never abort the run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolutionOutcome {
    pub dependencies: Vec<crate::graph::Dependency>,
    pub stats: ResolutionStats,
    pub errors: Vec<String>,
}

//! Engine configuration and caller-facing scan options.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::vulnerabilities::Severity;

/// Default TTL for the version-resolution cache (1 hour)
const DEFAULT_VERSION_CACHE_TTL_SECS: u64 = 3600;

/// Default TTL for the vulnerability-query cache (24 hours)
const DEFAULT_VULN_CACHE_TTL_SECS: u64 = 24 * 3600;

/// Top-level engine configuration.
///
/// Constructed once per process and injected into the [`crate::Engine`];
/// there are no module-level singletons.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// npm registry base URL
    pub npm_registry_url: String,
    /// PyPI JSON API base URL
    pub pypi_registry_url: String,
    /// OSV API base URL (without the /v1 suffix)
    pub osv_base_url: String,
    /// Whether resolvers may call package registries at all; when false,
    /// every range is resolved by fallback cleaning
    pub use_registry: bool,
    /// Transitive resolver tuning
    pub resolver: ResolverConfig,
    /// Vulnerability client tuning
    pub vulnerability: VulnerabilityConfig,
    /// Version-resolution cache TTL in seconds
    pub version_cache_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            npm_registry_url: "https://registry.npmjs.org".to_string(),
            pypi_registry_url: "https://pypi.org/pypi".to_string(),
            osv_base_url: "https://api.osv.dev".to_string(),
            use_registry: true,
            resolver: ResolverConfig::default(),
            vulnerability: VulnerabilityConfig::default(),
            version_cache_ttl_secs: DEFAULT_VERSION_CACHE_TTL_SECS,
        }
    }
}

/// Tuning knobs for the transitive dependency resolver.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Maximum provenance depth to descend to
    pub max_depth: usize,
    /// Packages resolved concurrently within one batch
    pub max_concurrent: usize,
    /// Delay between batches, in milliseconds (registry rate limiting)
    pub batch_delay_ms: u64,
    /// Overall deadline for one resolution run, in seconds
    pub overall_timeout_secs: u64,
    /// Consecutive registry failures before the circuit opens
    pub failure_threshold: u32,
    /// Cooldown before a half-open probe is allowed, in seconds
    pub cooldown_secs: u64,
    /// Concurrency bound for batched version resolution
    pub version_concurrency: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: 8,
            max_concurrent: 3,
            batch_delay_ms: 200,
            overall_timeout_secs: 60,
            failure_threshold: 3,
            cooldown_secs: 10,
            version_concurrency: 10,
        }
    }
}

impl ResolverConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.overall_timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Tuning knobs for the vulnerability database client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VulnerabilityConfig {
    /// Queries per batch POST
    pub batch_size: usize,
    /// Retry attempts after throttling or server errors
    pub max_retries: u32,
    /// Base backoff delay in milliseconds (doubled per attempt, with jitter)
    pub backoff_base_ms: u64,
    /// Advisory payload cache TTL in seconds
    pub cache_ttl_secs: u64,
}

impl Default for VulnerabilityConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            backoff_base_ms: 500,
            cache_ttl_secs: DEFAULT_VULN_CACHE_TTL_SECS,
        }
    }
}

/// Caller-owned scan options, read-only to the engine.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Include development dependencies in resolution output
    pub include_dev_dependencies: bool,
    /// Staleness threshold in months, consumed by the reporting layer
    pub stale_months: Option<u32>,
    /// Severities to drop from scan results
    pub ignore_severities: Vec<Severity>,
    /// Findings to suppress by package or advisory id
    pub ignore_rules: Vec<IgnoreRule>,
}

impl ScanOptions {
    /// Whether a finding for `package` / advisory `id` at `severity` should
    /// be suppressed under these options. Expired rules are inert.
    pub fn is_ignored(&self, package: &str, vulnerability_id: &str, severity: Severity) -> bool {
        if self.ignore_severities.contains(&severity) {
            return true;
        }
        let now = Utc::now();
        self.ignore_rules.iter().any(|rule| {
            if rule.expires.is_some_and(|exp| exp < now) {
                return false;
            }
            match rule.rule_type {
                RuleType::Vulnerability => rule.identifier == vulnerability_id,
                RuleType::Package => rule.identifier == package,
            }
        })
    }
}

/// What an [`IgnoreRule`] matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Vulnerability,
    Package,
}

/// A single suppression rule.
#[derive(Debug, Clone, Deserialize)]
pub struct IgnoreRule {
    pub rule_type: RuleType,
    /// Package name or advisory id, depending on `rule_type`
    pub identifier: String,
    /// Human-readable justification, carried through to reports
    pub reason: String,
    /// Optional expiry after which the rule no longer applies
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.use_registry);
        assert_eq!(config.resolver.max_depth, 8);
        assert_eq!(config.resolver.max_concurrent, 3);
        assert_eq!(config.resolver.failure_threshold, 3);
        assert_eq!(config.resolver.cooldown_secs, 10);
        assert_eq!(config.vulnerability.batch_size, 100);
        assert_eq!(config.vulnerability.max_retries, 3);
        assert_eq!(config.version_cache_ttl_secs, 3600);
        assert_eq!(config.vulnerability.cache_ttl_secs, 24 * 3600);
    }

    #[test]
    fn test_partial_config_from_json() {
        let json = serde_json::json!({
            "use_registry": false,
            "resolver": { "max_depth": 4 }
        });
        let config: EngineConfig = serde_json::from_value(json).unwrap();
        assert!(!config.use_registry);
        assert_eq!(config.resolver.max_depth, 4);
        // Untouched fields keep defaults
        assert_eq!(config.resolver.max_concurrent, 3);
        assert_eq!(config.npm_registry_url, "https://registry.npmjs.org");
    }

    #[test]
    fn test_ignore_by_severity() {
        let options = ScanOptions {
            ignore_severities: vec![Severity::Low],
            ..Default::default()
        };
        assert!(options.is_ignored("lodash", "GHSA-x", Severity::Low));
        assert!(!options.is_ignored("lodash", "GHSA-x", Severity::High));
    }

    #[test]
    fn test_ignore_rules_by_type() {
        let options = ScanOptions {
            ignore_rules: vec![
                IgnoreRule {
                    rule_type: RuleType::Package,
                    identifier: "lodash".to_string(),
                    reason: "vendored copy is patched".to_string(),
                    expires: None,
                },
                IgnoreRule {
                    rule_type: RuleType::Vulnerability,
                    identifier: "GHSA-abcd".to_string(),
                    reason: "not reachable".to_string(),
                    expires: None,
                },
            ],
            ..Default::default()
        };

        assert!(options.is_ignored("lodash", "GHSA-other", Severity::High));
        assert!(options.is_ignored("express", "GHSA-abcd", Severity::High));
        assert!(!options.is_ignored("express", "GHSA-other", Severity::High));
    }

    #[test]
    fn test_expired_rule_is_inert() {
        let options = ScanOptions {
            ignore_rules: vec![IgnoreRule {
                rule_type: RuleType::Package,
                identifier: "lodash".to_string(),
                reason: "temporary waiver".to_string(),
                expires: Some(Utc::now() - ChronoDuration::days(1)),
            }],
            ..Default::default()
        };
        assert!(!options.is_ignored("lodash", "GHSA-x", Severity::High));
    }
}

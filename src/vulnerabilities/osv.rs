//! OSV.dev batch query client.
//!
//! One scan: deduplicate the input dependencies, drop the ones with
//! cached results, batch the rest against `POST /v1/querybatch`, fetch
//! full advisories for minimal records, and convert everything into
//! [`Vulnerability`] findings. Batch results are positionally aligned
//! with the query list, so per-query package metadata is reattached by
//! index.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::{Duration, sleep};
use tracing::{debug, warn};

use super::cache::VulnerabilityCache;
use super::cvss::derive_severity;
use super::Vulnerability;
use crate::config::VulnerabilityConfig;
use crate::error::ScanError;
use crate::graph::{Dependency, deduplicate};
use crate::resolver::version::UNRESOLVED_VERSION;

#[derive(Debug, Serialize)]
struct BatchRequest {
    queries: Vec<QueryRequest>,
}

#[derive(Debug, Serialize)]
struct QueryRequest {
    package: QueryPackage,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

#[derive(Debug, Serialize)]
struct QueryPackage {
    name: String,
    ecosystem: String,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    results: Vec<Value>,
}

/// Advisory fields consumed from OSV JSON. Everything else stays in the
/// two untyped payloads for severity derivation.
#[derive(Debug, Clone, Deserialize, Default)]
struct RawAdvisory {
    #[serde(default)]
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    published: Option<DateTime<Utc>>,
    #[serde(default)]
    modified: Option<DateTime<Utc>>,
    #[serde(default)]
    severity: Vec<RawSeverity>,
    #[serde(default)]
    affected: Vec<RawAffected>,
    #[serde(default)]
    references: Vec<RawReference>,
    #[serde(default)]
    database_specific: Option<Value>,
    #[serde(default)]
    ecosystem_specific: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawSeverity {
    #[serde(rename = "type", default)]
    severity_type: String,
    #[serde(default)]
    score: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawAffected {
    #[serde(default)]
    package: Option<RawAffectedPackage>,
    #[serde(default)]
    ranges: Vec<RawRange>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawAffectedPackage {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawRange {
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawEvent {
    #[serde(default)]
    introduced: Option<String>,
    #[serde(default)]
    fixed: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawReference {
    #[serde(rename = "type", default)]
    reference_type: String,
    #[serde(default)]
    url: String,
}

/// Concurrent advisory detail fetches per client.
const DETAIL_FETCH_CONCURRENCY: usize = 8;

/// OSV.dev API client.
pub struct OsvClient {
    client: Arc<Client>,
    base_url: String,
    config: VulnerabilityConfig,
    cache: Arc<VulnerabilityCache>,
    detail_semaphore: Arc<Semaphore>,
}

impl OsvClient {
    pub fn new(client: Arc<Client>, base_url: impl Into<String>, config: VulnerabilityConfig) -> Self {
        let cache = Arc::new(VulnerabilityCache::with_ttl(config.cache_ttl_secs));
        Self {
            client,
            base_url: base_url.into(),
            config,
            cache,
            detail_semaphore: Arc::new(Semaphore::new(DETAIL_FETCH_CONCURRENCY)),
        }
    }

    pub fn cache(&self) -> &Arc<VulnerabilityCache> {
        &self.cache
    }

    /// Match one dependency list against the vulnerability database.
    ///
    /// An empty input yields an empty output, never an error. A batch that
    /// exhausts its retries is dropped with a warning; the error surfaces
    /// only when every batch failed.
    pub async fn scan(&self, deps: &[Dependency]) -> Result<Vec<Vulnerability>, ScanError> {
        let unique = deduplicate(deps.to_vec());
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        let mut findings: Vec<Vulnerability> = Vec::new();
        let mut to_query: Vec<Dependency> = Vec::new();
        for dep in unique {
            let key = VulnerabilityCache::key(dep.ecosystem, &dep.name, &dep.version);
            match self.cache.get(&key) {
                Some(cached) => findings.extend(cached),
                None => to_query.push(dep),
            }
        }

        let total_batches = to_query.len().div_ceil(self.config.batch_size.max(1));
        let mut failed_batches = 0usize;
        let mut last_error: Option<ScanError> = None;

        for batch in to_query.chunks(self.config.batch_size.max(1)) {
            match self.query_batch(batch).await {
                Ok(batch_findings) => {
                    // Populate the cache per queried package, empty results
                    // included so clean packages are not re-queried
                    for dep in batch {
                        let key =
                            VulnerabilityCache::key(dep.ecosystem, &dep.name, &dep.version);
                        let for_dep: Vec<Vulnerability> = batch_findings
                            .iter()
                            .filter(|v| {
                                v.package == dep.name
                                    && v.version == dep.version
                                    && v.ecosystem == dep.ecosystem
                            })
                            .cloned()
                            .collect();
                        self.cache.insert(key, for_dep);
                    }
                    findings.extend(batch_findings);
                }
                Err(e) => {
                    warn!(error = %e, "vulnerability batch failed, continuing with remaining batches");
                    failed_batches += 1;
                    last_error = Some(e);
                }
            }
        }

        if failed_batches == total_batches
            && let Some(error) = last_error
        {
            return Err(error);
        }

        Ok(dedupe_findings(findings))
    }

    async fn query_batch(&self, deps: &[Dependency]) -> Result<Vec<Vulnerability>, ScanError> {
        let request = BatchRequest {
            queries: deps
                .iter()
                .map(|dep| QueryRequest {
                    package: QueryPackage {
                        name: dep.name.clone(),
                        ecosystem: dep.ecosystem.as_osv_str().to_string(),
                    },
                    // The sentinel means "no usable pin"; omitting the
                    // version queries all affected ranges
                    version: match dep.version.as_str() {
                        UNRESOLVED_VERSION | "unknown" => None,
                        v => Some(v.to_string()),
                    },
                })
                .collect(),
        };

        let response: BatchResponse = self.post_with_retries(&request).await?;

        // Results are positionally aligned with the query list
        let mut raw: Vec<(usize, RawAdvisory, bool)> = Vec::new();
        for (index, result) in response.results.iter().enumerate() {
            if index >= deps.len() {
                break;
            }
            for advisory_value in advisory_values(result) {
                let minimal = is_minimal_record(&advisory_value);
                let advisory: RawAdvisory = match serde_json::from_value(advisory_value) {
                    Ok(a) => a,
                    Err(e) => {
                        debug!(error = %e, "skipping malformed advisory record");
                        continue;
                    }
                };
                if advisory.id.is_empty() {
                    continue;
                }
                raw.push((index, advisory, minimal));
            }
        }

        // Minimal records carry only id/modified; fetch the full advisory
        // under a bounded number of in-flight detail requests
        let detailed = join_all(raw.into_iter().map(|(index, advisory, minimal)| {
            let semaphore = Arc::clone(&self.detail_semaphore);
            async move {
                if minimal {
                    // A closed semaphore cannot happen; treat it as a skip
                    let _permit = semaphore.acquire().await;
                    match self.fetch_advisory(&advisory.id).await {
                        Some(full) => (index, full),
                        None => (index, advisory),
                    }
                } else {
                    (index, advisory)
                }
            }
        }))
        .await;

        let findings = detailed
            .into_iter()
            .map(|(index, advisory)| convert_advisory(&advisory, &deps[index]))
            .collect();
        Ok(findings)
    }

    async fn post_with_retries(&self, request: &BatchRequest) -> Result<BatchResponse, ScanError> {
        let url = format!("{}/v1/querybatch", self.base_url);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let outcome = self.client.post(&url).json(request).send().await;
            match outcome {
                Ok(response) if response.status().is_success() => {
                    return response.json().await.map_err(|e| ScanError::QueryFailed {
                        attempts: attempt,
                        message: format!("invalid batch response: {e}"),
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if !retryable || attempt > self.config.max_retries {
                        return Err(ScanError::QueryFailed {
                            attempts: attempt,
                            message: format!("vulnerability API returned {status}"),
                        });
                    }
                    debug!(%status, attempt, "vulnerability API throttled, backing off");
                }
                Err(e) => {
                    if attempt > self.config.max_retries {
                        return Err(ScanError::QueryFailed {
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }
                    debug!(error = %e, attempt, "vulnerability API unreachable, backing off");
                }
            }
            sleep(self.backoff(attempt)).await;
        }
    }

    /// Exponential backoff with jitter: `base * 2^(attempt-1) + [0,100)ms`.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base_ms.saturating_mul(1 << (attempt - 1).min(10));
        let jitter = rand::rng().random_range(0..100);
        Duration::from_millis(base + jitter)
    }

    /// Fetch one full advisory, with the same retry and backoff policy as
    /// the batch endpoint. A record that stays unreachable degrades to the
    /// minimal stub instead of failing the scan.
    async fn fetch_advisory(&self, id: &str) -> Option<RawAdvisory> {
        let url = format!("{}/v1/vulns/{}", self.base_url, id);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    return match response.json().await {
                        Ok(advisory) => Some(advisory),
                        Err(e) => {
                            warn!(advisory = id, error = %e, "advisory detail unparsable");
                            None
                        }
                    };
                }
                Ok(response) => {
                    let status = response.status();
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if !retryable || attempt > self.config.max_retries {
                        warn!(advisory = id, %status, "advisory detail fetch failed");
                        return None;
                    }
                    debug!(advisory = id, %status, attempt, "advisory detail throttled, backing off");
                }
                Err(e) => {
                    if attempt > self.config.max_retries {
                        warn!(advisory = id, error = %e, "advisory detail fetch failed");
                        return None;
                    }
                    debug!(advisory = id, error = %e, attempt, "advisory detail unreachable, backing off");
                }
            }
            sleep(self.backoff(attempt)).await;
        }
    }
}

/// The per-query result is either `{"vulns": [...]}`, a bare array, or a
/// single advisory object.
fn advisory_values(result: &Value) -> Vec<Value> {
    match result {
        Value::Object(map) => match map.get("vulns") {
            Some(Value::Array(vulns)) => vulns.clone(),
            Some(_) | None if map.contains_key("id") => vec![result.clone()],
            _ => Vec::new(),
        },
        Value::Array(vulns) => vulns.clone(),
        _ => Vec::new(),
    }
}

/// Batch responses may return stub records holding only `id`/`modified`.
fn is_minimal_record(value: &Value) -> bool {
    value.as_object().is_some_and(|map| map.len() <= 4)
}

fn convert_advisory(advisory: &RawAdvisory, dep: &Dependency) -> Vulnerability {
    let severity_entries: Vec<(String, String)> = advisory
        .severity
        .iter()
        .map(|s| (s.severity_type.clone(), s.score.clone()))
        .collect();
    let (cvss_score, severity) = derive_severity(
        &severity_entries,
        advisory.database_specific.as_ref(),
        advisory.ecosystem_specific.as_ref(),
    );

    let advisory_url = advisory
        .references
        .iter()
        .find(|r| r.reference_type == "ADVISORY" && !r.url.is_empty())
        .or_else(|| advisory.references.iter().find(|r| !r.url.is_empty()))
        .map(|r| r.url.clone())
        .unwrap_or_else(|| format!("https://osv.dev/vulnerability/{}", advisory.id));

    let cve_ids: Vec<String> = advisory
        .aliases
        .iter()
        .filter(|alias| alias.starts_with("CVE-"))
        .cloned()
        .collect();

    Vulnerability {
        package: dep.name.clone(),
        version: dep.version.clone(),
        ecosystem: dep.ecosystem,
        id: advisory.id.clone(),
        severity,
        cvss_score,
        cve_ids,
        summary: advisory
            .summary
            .clone()
            .unwrap_or_else(|| format!("Vulnerability {}", advisory.id)),
        details: advisory.details.clone().unwrap_or_default(),
        advisory_url,
        fixed_range: fixed_range_for(advisory, &dep.name),
        published: advisory.published,
        modified: advisory.modified,
        aliases: advisory.aliases.clone(),
        immediate_parent: dep.immediate_parent().map(|p| p.to_string()),
    }
}

/// First `fixed` event for the matching affected package, as a range.
fn fixed_range_for(advisory: &RawAdvisory, package: &str) -> Option<String> {
    advisory
        .affected
        .iter()
        .filter(|affected| {
            affected
                .package
                .as_ref()
                .is_none_or(|p| p.name.eq_ignore_ascii_case(package))
        })
        .flat_map(|affected| &affected.ranges)
        .flat_map(|range| &range.events)
        .find_map(|event| event.fixed.as_ref())
        .map(|fixed| format!(">={fixed}"))
}

/// Drop repeated findings for the same advisory on the same package.
fn dedupe_findings(findings: Vec<Vulnerability>) -> Vec<Vulnerability> {
    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    findings
        .into_iter()
        .filter(|v| {
            seen.insert((
                v.id.clone(),
                v.package.clone(),
                v.ecosystem.as_osv_str().to_string(),
            ))
        })
        .collect()
}

//! Vulnerability matching: severity model, CVSS scoring, OSV client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod cache;
pub mod cvss;
pub mod osv;

pub use cache::VulnerabilityCache;
pub use osv::OsvClient;

use crate::graph::Ecosystem;

/// Severity levels, ordered by rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    /// No severity signal of any kind was present on the advisory
    Unknown,
}

impl Severity {
    /// Numeric rank for comparison (higher = more severe)
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 4,
            Severity::High => 3,
            Severity::Medium => 2,
            Severity::Low => 1,
            Severity::Unknown => 0,
        }
    }

    /// Threshold mapping from a numeric CVSS base score.
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 9.0 => Severity::Critical,
            s if s >= 7.0 => Severity::High,
            s if s >= 4.0 => Severity::Medium,
            s if s > 0.0 => Severity::Low,
            _ => Severity::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One vulnerability finding attached to a resolved dependency.
#[derive(Debug, Clone, Serialize)]
pub struct Vulnerability {
    /// Affected package name
    pub package: String,
    /// Affected version as resolved
    pub version: String,
    pub ecosystem: Ecosystem,
    /// Advisory id (GHSA-..., PYSEC-..., CVE-...)
    pub id: String,
    pub severity: Severity,
    /// CVSS base score when derivable
    pub cvss_score: Option<f64>,
    /// CVE aliases, if any
    pub cve_ids: Vec<String>,
    pub summary: String,
    pub details: String,
    pub advisory_url: String,
    /// `">=x.y.z"` for the first fixed release, when the advisory names one
    pub fixed_range: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub aliases: Vec<String>,
    /// Name of the dependency that pulled the affected package in, when
    /// the finding came from a transitive dependency
    pub immediate_parent: Option<String>,
}

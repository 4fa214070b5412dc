//! Cross-source consistency analysis for dependency lists.
//!
//! Compares two dependency lists (typically manifest-derived vs
//! lockfile-derived) by package name and reports matches, version
//! mismatches, and packages missing on either side.

use std::collections::HashMap;

use serde::Serialize;

use crate::graph::Dependency;

/// One name present in both lists with differing versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionMismatch {
    pub name: String,
    pub version_a: String,
    pub version_b: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub total_a: usize,
    pub total_b: usize,
    /// Names present in both lists with equal versions
    pub matching: usize,
    pub version_mismatches: Vec<VersionMismatch>,
    /// Names only in list B
    pub missing_in_a: Vec<String>,
    /// Names only in list A
    pub missing_in_b: Vec<String>,
    /// `matching / max(total_a, total_b)`, 1.0 for two empty lists
    pub consistency_score: f64,
    pub recommendations: Vec<String>,
}

/// Compare two dependency lists by package name.
pub fn compare(a: &[Dependency], b: &[Dependency]) -> ConsistencyReport {
    let index_a: HashMap<&str, &Dependency> =
        a.iter().map(|d| (d.name.as_str(), d)).collect();
    let index_b: HashMap<&str, &Dependency> =
        b.iter().map(|d| (d.name.as_str(), d)).collect();

    let mut matching = 0usize;
    let mut version_mismatches = Vec::new();
    let mut missing_in_b = Vec::new();

    for dep in a {
        match index_b.get(dep.name.as_str()) {
            Some(other) if other.version == dep.version => matching += 1,
            Some(other) => version_mismatches.push(VersionMismatch {
                name: dep.name.clone(),
                version_a: dep.version.clone(),
                version_b: other.version.clone(),
            }),
            None => missing_in_b.push(dep.name.clone()),
        }
    }

    let mut missing_in_a: Vec<String> = b
        .iter()
        .filter(|d| !index_a.contains_key(d.name.as_str()))
        .map(|d| d.name.clone())
        .collect();

    missing_in_a.sort();
    missing_in_b.sort();
    version_mismatches.sort_by(|x, y| x.name.cmp(&y.name));

    let denominator = index_a.len().max(index_b.len());
    let consistency_score = if denominator == 0 {
        1.0
    } else {
        matching as f64 / denominator as f64
    };

    let mut recommendations = Vec::new();
    if consistency_score < 0.5 {
        recommendations.push(
            "Low consistency between sources; verify both were generated from the same project state"
                .to_string(),
        );
    }
    if !missing_in_a.is_empty() || !missing_in_b.is_empty() {
        recommendations.push(
            "Packages are missing from one source; the lockfile is likely stale, regenerate it"
                .to_string(),
        );
    }
    if !version_mismatches.is_empty() {
        recommendations.push(
            "Version mismatches found; re-resolve dependencies to realign manifest and lockfile"
                .to_string(),
        );
    }

    ConsistencyReport {
        total_a: index_a.len(),
        total_b: index_b.len(),
        matching,
        version_mismatches,
        missing_in_a,
        missing_in_b,
        consistency_score,
        recommendations,
    }
}

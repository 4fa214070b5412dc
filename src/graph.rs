//! Core dependency model and shared tree-construction utilities.
//!
//! Every parser and resolver in the crate produces [`Dependency`] records.
//! Provenance is carried as a `path`: the ordered chain of package names
//! from the project root (excluded) down to the package itself, so
//! `path == ["express", "accepts", "mime-types"]` means the project depends
//! on `express`, which depends on `accepts`, which pulled in `mime-types`.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// A package-manager namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ecosystem {
    /// JavaScript/Node packages (npm registry)
    Npm,
    /// Python packages (PyPI)
    PyPi,
}

impl Ecosystem {
    /// Convert to the OSV.dev ecosystem string.
    pub fn as_osv_str(&self) -> &'static str {
        match self {
            Ecosystem::Npm => "npm",
            Ecosystem::PyPi => "PyPI",
        }
    }
}

impl std::fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_osv_str())
    }
}

/// A resolved package occurrence with provenance.
///
/// Invariants: `path.len() >= 1`, and `is_direct == (path.len() == 1)`.
/// Records are immutable once emitted except for `is_direct`/`path`
/// refinement during flat-lockfile post-processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Package name
    pub name: String,
    /// Concrete version (or a cleaned range when nothing better is known)
    pub version: String,
    /// Ecosystem the package belongs to
    pub ecosystem: Ecosystem,
    /// Chain of package names from the project root to this package,
    /// root excluded; the last element is this package's own name
    pub path: Vec<String>,
    /// Whether the project declares this package itself
    pub is_direct: bool,
    /// Whether this is a development-only dependency
    pub is_dev: bool,
}

impl Dependency {
    /// Create a direct dependency (path is just the package itself).
    pub fn direct(name: &str, version: &str, ecosystem: Ecosystem) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            ecosystem,
            path: vec![name.to_string()],
            is_direct: true,
            is_dev: false,
        }
    }

    /// Create a dependency at an explicit provenance path.
    pub fn at_path(name: &str, version: &str, ecosystem: Ecosystem, path: Vec<String>) -> Self {
        let is_direct = path.len() == 1;
        Self {
            name: name.to_string(),
            version: version.to_string(),
            ecosystem,
            path,
            is_direct,
            is_dev: false,
        }
    }

    /// Mark as a dev dependency (builder style).
    pub fn dev(mut self, is_dev: bool) -> Self {
        self.is_dev = is_dev;
        self
    }

    /// Identity key used for deduplication.
    pub fn identity(&self) -> (Ecosystem, &str, &str) {
        (self.ecosystem, self.name.as_str(), self.version.as_str())
    }

    /// The package that pulled this one in, or `None` for direct deps.
    pub fn immediate_parent(&self) -> Option<&str> {
        parent_of(&self.path)
    }
}

/// Append a package name to a provenance path, by copy.
///
/// Paths are copied on append rather than shared so concurrent resolution
/// branches never observe each other's extensions.
pub fn create_path(parent_path: &[String], name: &str) -> Vec<String> {
    let mut path = parent_path.to_vec();
    path.push(name.to_string());
    path
}

/// A path of length 1 means the project itself declares the package.
pub fn is_direct(path: &[String]) -> bool {
    path.len() == 1
}

/// Depth of a dependency: direct deps are depth 1.
pub fn depth_of(path: &[String]) -> usize {
    path.len()
}

/// The package immediately above this one in the chain, if any.
pub fn parent_of(path: &[String]) -> Option<&str> {
    if path.len() >= 2 {
        Some(path[path.len() - 2].as_str())
    } else {
        None
    }
}

/// Whether descending into `candidate` would revisit a name already on the
/// current path, i.e. close a dependency cycle.
pub fn would_cycle(path: &[String], candidate: &str) -> bool {
    path.iter().any(|p| p == candidate)
}

/// Deduplicate by `(ecosystem, name, version)`, keeping the occurrence with
/// the shortest path (the most direct appearance) for each identity.
pub fn deduplicate(deps: Vec<Dependency>) -> Vec<Dependency> {
    let mut best: HashMap<(Ecosystem, String, String), Dependency> = HashMap::new();
    let mut order: Vec<(Ecosystem, String, String)> = Vec::new();

    for dep in deps {
        let key = (dep.ecosystem, dep.name.clone(), dep.version.clone());
        match best.get(&key) {
            Some(existing) if existing.path.len() <= dep.path.len() => {}
            Some(_) => {
                best.insert(key, dep);
            }
            None => {
                best.insert(key.clone(), dep);
                order.push(key);
            }
        }
    }

    order.into_iter().filter_map(|key| best.remove(&key)).collect()
}

/// Build a parent index for flat lockfiles: for each declared edge
/// `(package, its dependency names)`, record the first package seen that
/// declares each name. Used to refine `path`/`is_direct` on formats that
/// store a flat package list (package-lock v2/v3, yarn.lock).
pub fn parent_index(edges: &[(String, Vec<String>)]) -> HashMap<String, String> {
    let mut parents: HashMap<String, String> = HashMap::new();
    for (pkg, deps) in edges {
        for dep in deps {
            parents.entry(dep.clone()).or_insert_with(|| pkg.clone());
        }
    }
    parents
}

/// Assign provenance paths for a flat package list.
///
/// `direct` holds the names the root manifest declares. Everything else is
/// chased up the parent index; a name with no discoverable parent is
/// classified direct so the `is_direct == (path.len() == 1)` invariant
/// holds. Parent chains stop when they would revisit a name.
pub fn flat_path_for(
    name: &str,
    direct: &HashSet<String>,
    parents: &HashMap<String, String>,
) -> Vec<String> {
    if direct.contains(name) {
        return vec![name.to_string()];
    }

    let mut chain = vec![name.to_string()];
    let mut current = name;
    while let Some(parent) = parents.get(current) {
        if chain.iter().any(|c| c == parent) {
            break;
        }
        chain.push(parent.clone());
        if direct.contains(parent) {
            break;
        }
        current = parent;
    }
    chain.reverse();

    // No parent found at all: treat as direct rather than inventing one.
    chain
}

//! Error taxonomy for the scan engine.
//!
//! Parser and registry failures are recovered close to where they happen
//! (fallback resolution, per-ecosystem partial success); only a complete
//! inability to resolve anything, or a vulnerability query that exhausts
//! its retries, surfaces to the caller.

use crate::formats::FormatId;
use crate::graph::Ecosystem;

/// Errors produced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// A manifest or lockfile was structurally invalid.
    #[error("failed to parse {format}: {cause}")]
    Parse { format: FormatId, cause: String },

    /// Input was empty or not parsable at all.
    #[error("input was empty or unparsable")]
    EmptyInput,

    /// The filename matched no known dependency file format.
    #[error("unsupported dependency file: {filename}")]
    UnsupportedFormat { filename: String },

    /// No recognizable dependency file was found for an ecosystem.
    #[error("no supported dependency files for {ecosystem}")]
    NoSupportedFiles { ecosystem: Ecosystem },

    /// A package registry was unreachable or returned a server error.
    /// Always recovered via fallback version cleaning; never fatal.
    #[error("registry unavailable for {package}: {message}")]
    RegistryUnavailable { package: String, message: String },

    /// The vulnerability API failed after exhausting retries.
    #[error("vulnerability query failed after {attempts} attempts: {message}")]
    QueryFailed { attempts: u32, message: String },

    /// Underlying HTTP failure.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ScanError {
    /// Whether this error may be recovered locally (skip, fallback, or
    /// per-ecosystem partial success) rather than aborting the scan.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ScanError::Parse { .. }
                | ScanError::RegistryUnavailable { .. }
                | ScanError::NoSupportedFiles { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let err = ScanError::RegistryUnavailable {
            package: "lodash".to_string(),
            message: "503".to_string(),
        };
        assert!(err.is_recoverable());

        let err = ScanError::QueryFailed {
            attempts: 3,
            message: "429".to_string(),
        };
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = ScanError::NoSupportedFiles {
            ecosystem: Ecosystem::Npm,
        };
        assert!(err.to_string().contains("npm"));
    }
}

//! Manifest data model and structural rules for Gantry.
//!
//! This crate defines the typed manifest description produced by evaluating a
//! package manifest program: `ParsedManifest` and the assembled `Manifest`,
//! the `ToolsVersion` gate that decides which rules apply, the legacy
//! system-module normalization pass, and the multi-pass structural validator.

pub mod manifest;
pub mod normalize;
pub mod tools_version;
pub mod types;
pub mod validate;

pub use manifest::{
    parse_evaluator_output, DependencySource, EvaluationContext, LibraryLinkage, Manifest,
    ManifestSource, PackageDependency, PackageKind, ParsedManifest, PlatformRequirement,
    ProductDescription, ProductKind, SystemPackageProvider, TargetDependency, TargetDescription,
    TargetKind, VersionRequirement,
};
pub use normalize::{normalize_legacy_system_module, MODULE_MAP_FILENAME};
pub use tools_version::ToolsVersion;
pub use types::PackageIdentity;
pub use validate::{has_errors, validate_manifest, Diagnostic, Severity};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode evaluator output: {0}")]
    ParseJson(#[from] serde_json::Error),
    #[error("evaluator produced no manifest description")]
    EmptyEvaluatorOutput,
    #[error("invalid tools version '{0}', expected 'major[.minor[.patch]]'")]
    InvalidToolsVersion(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_error_display_empty_output() {
        let e = ManifestError::EmptyEvaluatorOutput;
        assert!(e.to_string().contains("no manifest description"));
    }

    #[test]
    fn manifest_error_display_invalid_tools_version() {
        let e = ManifestError::InvalidToolsVersion("5.x".to_owned());
        assert!(e.to_string().contains("5.x"));
    }
}

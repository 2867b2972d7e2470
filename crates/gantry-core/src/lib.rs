//! Load orchestration for Gantry.
//!
//! This crate ties together cache-key derivation, the sandboxed evaluation
//! pipeline, legacy normalization, and structural validation into the
//! `ManifestEngine` — the central API for loading package manifests. Loads
//! run on a bounded worker pool; callers block on a handle or fan out many
//! loads at once.

pub mod engine;
pub mod scheduler;

pub use engine::{EngineConfig, ManifestEngine};
pub use scheduler::{LoadHandle, LoadObserver, LoadScheduler};

use gantry_schema::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    /// The pipeline itself broke: spawn failure, temp-file failure,
    /// undecodable evaluator output.
    #[error("manifest evaluation infrastructure failed: {0}")]
    Infrastructure(String),
    /// The manifest program compiled or ran unsuccessfully.
    #[error("manifest evaluation failed:\n{output}")]
    Evaluation {
        output: String,
        diagnostic_file: Option<std::path::PathBuf>,
    },
    #[error("manifest error: {0}")]
    Manifest(#[from] gantry_schema::ManifestError),
    #[error("invalid manifest:\n{}", format_diagnostics(.0))]
    Validation(Vec<Diagnostic>),
    #[error("store error: {0}")]
    Store(#[from] gantry_store::StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The worker executing the load disappeared before delivering a result.
    #[error("load worker terminated before delivering a result")]
    Delivery,
}

fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_diagnostic() {
        let error = LoadError::Validation(vec![
            Diagnostic::error("duplicate target named 'A'"),
            Diagnostic::warning("something minor"),
        ]);
        let message = error.to_string();
        assert!(message.contains("error: duplicate target named 'A'"));
        assert!(message.contains("warning: something minor"));
    }
}

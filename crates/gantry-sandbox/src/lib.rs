//! Sandboxed manifest evaluation for Gantry.
//!
//! A manifest is an executable program, so loading one means running
//! untrusted code. This crate owns that boundary: `ToolchainConfig` locates
//! the compiler and the versioned manifest-API runtime, `policy` wraps the
//! run step in a bubblewrap confinement profile, and `SandboxedEvaluator`
//! drives the two-step compile-then-run pipeline, collecting compiler output,
//! the produced manifest JSON, and infrastructure failures separately.
//! `MockEvaluator` stands in for the real pipeline in engine tests.

pub mod evaluator;
pub mod mock;
pub mod policy;
pub mod toolchain;

pub use evaluator::{EvalPhase, EvaluationResult, ManifestEvaluator, SandboxedEvaluator};
pub use mock::{MockBehavior, MockEvaluator};
pub use policy::{apply_policy, Strictness};
pub use toolchain::ToolchainConfig;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to launch '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("evaluator output is not valid UTF-8: {0}")]
    InvalidOutputEncoding(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

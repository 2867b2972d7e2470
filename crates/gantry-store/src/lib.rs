//! On-disk evaluation cache for Gantry.
//!
//! This crate provides the storage layer: `derive_cache_key` hashes a manifest
//! source and its evaluation context into a content-addressed `CacheKey`,
//! `CacheLayout` manages the directory structure and format-version marker,
//! and `EvaluationCache` stores serialized evaluation results with atomic
//! writes, an exclusive file lock around mutations, and oldest-first eviction
//! when a size budget is configured.

pub mod cache;
pub mod key;
pub mod layout;

pub use cache::{CacheConfig, EvaluationCache};
pub use key::{derive_cache_key, CacheKey};
pub use layout::{CacheLayout, CACHE_FORMAT_VERSION};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// On Linux with ext4 `data=ordered` (the default), renames are usually
/// durable without an explicit dir fsync, but POSIX does not guarantee this.
/// Calling `fsync()` on the parent directory makes the rename durable on
/// all filesystems and mount configurations.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

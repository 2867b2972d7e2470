use gantry_schema::{EvaluationContext, ManifestSource};
use std::fmt;

/// Content-addressed cache key: the lowercase hex blake3 digest of every
/// input that can change an evaluation's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the cache key for one manifest evaluation.
///
/// Hashed, in order: package identity, manifest bytes, canonical
/// tools-version, environment entries in descending key order (key then
/// value), and the toolchain version string. Extra evaluator flags are
/// deliberately excluded; they tune diagnostics, not the produced manifest.
pub fn derive_cache_key(source: &ManifestSource, context: &EvaluationContext) -> CacheKey {
    let mut hasher = blake3::Hasher::new();
    hasher.update(source.identity.as_str().as_bytes());
    hasher.update(&source.contents);
    hasher.update(source.tools_version.canonical().as_bytes());
    for (key, value) in context.environment.iter().rev() {
        hasher.update(key.as_bytes());
        hasher.update(value.as_bytes());
    }
    hasher.update(context.toolchain_version.as_bytes());
    CacheKey(hasher.finalize().to_hex().to_string())
}

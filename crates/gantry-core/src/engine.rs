use crate::scheduler::{LoadHandle, LoadObserver, LoadScheduler};
use crate::LoadError;
use gantry_sandbox::{EvaluationResult, ManifestEvaluator, SandboxedEvaluator, ToolchainConfig};
use gantry_schema::{
    has_errors, normalize_legacy_system_module, parse_evaluator_output, validate_manifest,
    EvaluationContext, Manifest, ManifestSource, Severity, MODULE_MAP_FILENAME,
};
use gantry_store::{derive_cache_key, CacheConfig, CacheLayout, EvaluationCache};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the on-disk evaluation cache. `None` disables caching; every
    /// load then evaluates.
    pub cache_dir: Option<PathBuf>,
    pub cache: CacheConfig,
    /// Worker pool size, which caps concurrent sandboxed evaluations.
    pub worker_count: usize,
    pub sandbox_enabled: bool,
    pub serialized_diagnostics: bool,
    pub module_cache_dir: Option<PathBuf>,
    /// Extra compiler flags appended to every evaluation. Not part of the
    /// cache key.
    pub extra_flags: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            cache: CacheConfig::default(),
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            sandbox_enabled: true,
            serialized_diagnostics: false,
            module_cache_dir: None,
            extra_flags: Vec::new(),
        }
    }
}

struct EngineInner {
    evaluator: Arc<dyn ManifestEvaluator>,
    cache: Option<EvaluationCache>,
    observer: OnceLock<Arc<dyn LoadObserver>>,
}

/// Central API for loading package manifests.
///
/// A load walks the full pipeline: cache lookup, sandboxed evaluation on a
/// miss, cache write-back on success, legacy normalization, manifest
/// assembly, and structural validation. Cache trouble never fails a load;
/// it degrades to evaluating.
pub struct ManifestEngine {
    inner: Arc<EngineInner>,
    scheduler: LoadScheduler,
}

impl ManifestEngine {
    /// Engine backed by the real compile-and-run pipeline.
    pub fn new(toolchain: ToolchainConfig, config: EngineConfig) -> Result<Self, LoadError> {
        let diagnostics_root = config
            .cache_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let mut evaluator = SandboxedEvaluator::new(toolchain, diagnostics_root)
            .with_sandbox(config.sandbox_enabled)
            .with_serialized_diagnostics(config.serialized_diagnostics)
            .with_extra_flags(config.extra_flags.clone());
        if let Some(module_cache_dir) = &config.module_cache_dir {
            evaluator = evaluator.with_module_cache_dir(module_cache_dir);
        }
        Self::with_evaluator(Arc::new(evaluator), config)
    }

    /// Engine backed by a caller-supplied evaluator. Tests substitute
    /// [`gantry_sandbox::MockEvaluator`] here.
    pub fn with_evaluator(
        evaluator: Arc<dyn ManifestEvaluator>,
        config: EngineConfig,
    ) -> Result<Self, LoadError> {
        let cache = match &config.cache_dir {
            Some(dir) => Some(EvaluationCache::new(
                CacheLayout::new(dir),
                config.cache.clone(),
            )?),
            None => None,
        };
        Ok(Self {
            inner: Arc::new(EngineInner {
                evaluator,
                cache,
                observer: OnceLock::new(),
            }),
            scheduler: LoadScheduler::new(config.worker_count)?,
        })
    }

    /// Install the load observer. Only the first call takes effect.
    pub fn set_observer(&self, observer: Arc<dyn LoadObserver>) {
        let _ = self.inner.observer.set(observer);
    }

    /// Load a manifest, blocking until the pipeline finishes.
    pub fn load(
        &self,
        source: ManifestSource,
        context: EvaluationContext,
    ) -> Result<Manifest, LoadError> {
        self.load_async(source, context).wait()
    }

    /// Queue a load on the worker pool and return a handle for the result.
    pub fn load_async(&self, source: ManifestSource, context: EvaluationContext) -> LoadHandle {
        let (tx, handle) = LoadHandle::new();
        let inner = Arc::clone(&self.inner);
        self.scheduler.submit(move || {
            let _ = tx.send(inner.run_load(&source, &context));
        });
        handle
    }

    /// Drop process-local cache state. The engine keeps none beyond the
    /// on-disk store, so this is free; it exists so callers can reset
    /// without destroying the shared cache directory.
    pub fn reset_cache(&self) {}

    /// Drop process-local state and every cached evaluation result.
    pub fn purge_cache(&self) -> Result<(), LoadError> {
        self.reset_cache();
        if let Some(cache) = &self.inner.cache {
            cache.purge()?;
        }
        Ok(())
    }
}

impl EngineInner {
    fn run_load(
        &self,
        source: &ManifestSource,
        context: &EvaluationContext,
    ) -> Result<Manifest, LoadError> {
        if let Some(observer) = self.observer.get() {
            observer.on_will_load(source, context);
        }
        info!(identity = %source.identity, "loading manifest");

        let key = derive_cache_key(source, context);
        let (result, fresh) = match self.cached_result(&key, source) {
            Some(result) => (result, false),
            None => {
                if let Some(observer) = self.observer.get() {
                    observer.on_will_evaluate(source, context);
                }
                (self.evaluator.evaluate(source, context), true)
            }
        };

        if let Some(error) = &result.error_output {
            return Err(LoadError::Infrastructure(error.clone()));
        }

        let json = match result.manifest_json.as_deref().filter(|j| !j.trim().is_empty()) {
            Some(json) => json,
            None => {
                return Err(LoadError::Evaluation {
                    output: result
                        .compiler_output
                        .clone()
                        .unwrap_or_else(|| "manifest produced no output".to_owned()),
                    diagnostic_file: result.diagnostic_file.clone(),
                });
            }
        };
        if let Some(output) = &result.compiler_output {
            warn!(identity = %source.identity, "manifest compiler output:\n{output}");
        }

        let parsed = parse_evaluator_output(json)?;

        // Only fresh evaluations whose output also decoded are worth keeping;
        // failures must re-run next time.
        if fresh {
            if let Some(cache) = &self.cache {
                let stored = serde_json::to_vec(&result)
                    .map_err(gantry_store::StoreError::from)
                    .and_then(|bytes| cache.put(&key, &bytes));
                if let Err(e) = stored {
                    warn!(
                        "failed storing manifest for '{}' in cache: {}",
                        source.identity, e
                    );
                }
            }
        }
        let has_module_map = source
            .path
            .parent()
            .map(|dir| dir.join(MODULE_MAP_FILENAME).is_file())
            .unwrap_or(false);
        let parsed = normalize_legacy_system_module(parsed, has_module_map);
        let manifest = Manifest::from_parts(source, parsed);

        let diagnostics = validate_manifest(&manifest, source.tools_version);
        for diagnostic in diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
        {
            warn!(identity = %source.identity, "{}", diagnostic.message);
        }
        if has_errors(&diagnostics) {
            return Err(LoadError::Validation(diagnostics));
        }
        Ok(manifest)
    }

    /// A usable cached result, or `None`. Cache failures degrade to a miss.
    fn cached_result(
        &self,
        key: &gantry_store::CacheKey,
        source: &ManifestSource,
    ) -> Option<EvaluationResult> {
        let cache = self.cache.as_ref()?;
        let bytes = match cache.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("failed loading cached manifest for '{}': {}", source.identity, e);
                return None;
            }
        };
        match serde_json::from_slice::<EvaluationResult>(&bytes) {
            Ok(result) if result.manifest_json.as_deref().is_some_and(|j| !j.trim().is_empty()) => {
                Some(result)
            }
            // A stored failure or empty payload is useless; evaluate again.
            Ok(_) => None,
            Err(e) => {
                warn!("failed loading cached manifest for '{}': {}", source.identity, e);
                None
            }
        }
    }
}

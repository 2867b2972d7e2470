use crate::policy::{apply_policy, Strictness};
use crate::toolchain::{host_triple, ToolchainConfig};
use crate::SandboxError;
use gantry_schema::{EvaluationContext, ManifestSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Phase of one evaluation as it moves through the pipeline. Transitions are
/// checked in debug builds via [`EvalPhase::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalPhase {
    NotStarted,
    Compiling,
    CompileFailed,
    Compiled,
    Running,
    RunFailed,
    RunSucceeded,
}

impl EvalPhase {
    pub fn valid_transition(from: EvalPhase, to: EvalPhase) -> bool {
        matches!(
            (from, to),
            (EvalPhase::NotStarted, EvalPhase::Compiling)
                | (EvalPhase::Compiling, EvalPhase::CompileFailed | EvalPhase::Compiled)
                | (EvalPhase::Compiled, EvalPhase::Running)
                | (EvalPhase::Running, EvalPhase::RunFailed | EvalPhase::RunSucceeded)
        )
    }

    fn advance(&mut self, to: EvalPhase) {
        debug_assert!(
            Self::valid_transition(*self, to),
            "invalid evaluation phase transition {self:?} -> {to:?}"
        );
        *self = to;
    }
}

/// Everything one evaluation produced.
///
/// `compiler_output` merges stdout and stderr from both pipeline steps;
/// `manifest_json` is present only when the run step produced a manifest
/// description; `error_output` is reserved for infrastructure failures
/// (spawn errors, temp-file errors, undecodable output) as opposed to the
/// manifest program failing on its own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationResult {
    #[serde(default)]
    pub diagnostic_file: Option<PathBuf>,
    #[serde(default)]
    pub compiler_output: Option<String>,
    #[serde(default)]
    pub manifest_json: Option<String>,
    #[serde(default)]
    pub error_output: Option<String>,
}

impl EvaluationResult {
    pub fn has_errors(&self) -> bool {
        self.error_output.is_some()
    }
}

/// The seam between the engine and the evaluation pipeline. The engine only
/// ever sees this trait, so tests can substitute [`crate::MockEvaluator`].
pub trait ManifestEvaluator: Send + Sync {
    fn evaluate(&self, source: &ManifestSource, context: &EvaluationContext) -> EvaluationResult;
}

/// JSON payload handed to the compiled manifest on its command line.
#[derive(Debug, Serialize)]
struct RunContext<'a> {
    package_directory: &'a Path,
}

/// The real pipeline: compile the manifest, then run the produced artifact
/// under the confinement policy and collect the manifest description it
/// writes.
pub struct SandboxedEvaluator {
    toolchain: ToolchainConfig,
    cache_dir: PathBuf,
    module_cache_dir: Option<PathBuf>,
    serialized_diagnostics: bool,
    sandbox_enabled: bool,
    extra_flags: Vec<String>,
}

impl SandboxedEvaluator {
    pub fn new(toolchain: ToolchainConfig, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            toolchain,
            cache_dir: cache_dir.into(),
            module_cache_dir: None,
            serialized_diagnostics: false,
            sandbox_enabled: true,
            extra_flags: Vec::new(),
        }
    }

    pub fn with_module_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.module_cache_dir = Some(dir.into());
        self
    }

    pub fn with_serialized_diagnostics(mut self, enabled: bool) -> Self {
        self.serialized_diagnostics = enabled;
        self
    }

    pub fn with_sandbox(mut self, enabled: bool) -> Self {
        self.sandbox_enabled = enabled;
        self
    }

    pub fn with_extra_flags(mut self, flags: Vec<String>) -> Self {
        self.extra_flags = flags;
        self
    }

    fn evaluate_inner(
        &self,
        source: &ManifestSource,
        context: &EvaluationContext,
        result: &mut EvaluationResult,
    ) -> Result<(), SandboxError> {
        // Manifests usually arrive as bytes from a resolved dependency; a
        // root package's manifest is already a file on disk. Either way the
        // compiler wants a path.
        let mut staged = None;
        let manifest_path = if source.path.is_file() {
            source.path.clone()
        } else {
            let mut tmp = tempfile::Builder::new()
                .prefix("manifest-")
                .suffix(".src")
                .tempfile()?;
            tmp.write_all(&source.contents)?;
            tmp.as_file().sync_all()?;
            let path = tmp.path().to_path_buf();
            staged = Some(tmp);
            path
        };

        let outcome = self.evaluate_at_path(source, context, &manifest_path, result);
        drop(staged);
        outcome
    }

    fn evaluate_at_path(
        &self,
        source: &ManifestSource,
        context: &EvaluationContext,
        manifest_path: &Path,
        result: &mut EvaluationResult,
    ) -> Result<(), SandboxError> {
        let workdir = tempfile::tempdir()?;
        let artifact = workdir.path().join("manifest");
        let manifest_output = workdir.path().join("manifest.json");

        let mut phase = EvalPhase::NotStarted;

        // Step one: compile.
        phase.advance(EvalPhase::Compiling);
        let mut argv: Vec<String> = Vec::new();
        argv.push(self.toolchain.compiler_path.to_string_lossy().into_owned());
        argv.extend(self.toolchain.compiler_flags.iter().cloned());
        argv.extend(self.toolchain.interpreter_flags(source.tools_version));
        if let Some(sdk_root) = &self.toolchain.sdk_root {
            argv.push("--sdk".to_owned());
            argv.push(sdk_root.to_string_lossy().into_owned());
        }
        argv.push("--target".to_owned());
        argv.push(host_triple().to_owned());
        if let Some(module_cache) = &self.module_cache_dir {
            argv.push("--module-cache-path".to_owned());
            argv.push(module_cache.to_string_lossy().into_owned());
        }
        if self.serialized_diagnostics {
            let diagnostics_dir = self.cache_dir.join("diagnostics");
            fs::create_dir_all(&diagnostics_dir)?;
            let diagnostic_file =
                diagnostics_dir.join(format!("{}.dia", source.identity.as_str()));
            argv.push("--diagnostics-file".to_owned());
            argv.push(diagnostic_file.to_string_lossy().into_owned());
            result.diagnostic_file = Some(diagnostic_file);
        }
        argv.extend(context.extra_flags.iter().cloned());
        argv.extend(self.extra_flags.iter().cloned());
        argv.push(manifest_path.to_string_lossy().into_owned());
        argv.push("-o".to_owned());
        argv.push(artifact.to_string_lossy().into_owned());

        debug!(identity = %source.identity, "compiling manifest");
        let compile = run_process(&argv, &context.environment)?;
        result.compiler_output = non_empty(merge_output(&compile));
        if !compile.status.success() {
            phase.advance(EvalPhase::CompileFailed);
            return Ok(());
        }
        phase.advance(EvalPhase::Compiled);

        // Step two: run the artifact under confinement.
        phase.advance(EvalPhase::Running);
        let payload = serde_json::to_string(&RunContext {
            package_directory: manifest_path.parent().unwrap_or(Path::new(".")),
        })?;
        let mut run_argv = vec![
            artifact.to_string_lossy().into_owned(),
            "--manifest-output".to_owned(),
            manifest_output.to_string_lossy().into_owned(),
            "--context".to_owned(),
            payload,
        ];
        if self.sandbox_enabled {
            let strictness = Strictness::for_tools_version(source.tools_version);
            let mut writable = vec![workdir.path().to_path_buf(), self.cache_dir.clone()];
            if let Some(module_cache) = &self.module_cache_dir {
                writable.push(module_cache.clone());
            }
            run_argv = apply_policy(&run_argv, &writable, strictness);
        }

        debug!(identity = %source.identity, "running compiled manifest");
        let run = run_process(&run_argv, &context.environment)?;
        let run_output = merge_output(&run);
        if !run.status.success() || !manifest_output.is_file() {
            phase.advance(EvalPhase::RunFailed);
            result.compiler_output = non_empty(match result.compiler_output.take() {
                Some(existing) => format!("{existing}\n{run_output}"),
                None => run_output,
            });
            return Ok(());
        }

        let bytes = fs::read(&manifest_output)?;
        let json = String::from_utf8(bytes)
            .map_err(|e| SandboxError::InvalidOutputEncoding(e.to_string()))?;
        phase.advance(EvalPhase::RunSucceeded);
        result.manifest_json = Some(json);
        Ok(())
    }
}

impl ManifestEvaluator for SandboxedEvaluator {
    fn evaluate(&self, source: &ManifestSource, context: &EvaluationContext) -> EvaluationResult {
        // The result accumulates as the pipeline advances; an infrastructure
        // failure keeps whatever tool output was already collected.
        let mut result = EvaluationResult::default();
        if let Err(error) = self.evaluate_inner(source, context, &mut result) {
            result.manifest_json = None;
            result.error_output = Some(error.to_string());
        }
        result
    }
}

/// Run a command with the evaluation's environment snapshot and nothing
/// inherited from this process.
fn run_process(
    argv: &[String],
    environment: &BTreeMap<String, String>,
) -> Result<std::process::Output, SandboxError> {
    let (program, args) = argv.split_first().ok_or_else(|| {
        SandboxError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty command line",
        ))
    })?;
    Command::new(program)
        .args(args)
        .env_clear()
        .envs(environment)
        .output()
        .map_err(|source| SandboxError::Spawn {
            command: program.clone(),
            source,
        })
}

fn merge_output(output: &std::process::Output) -> String {
    let mut merged = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        if !merged.is_empty() && !merged.ends_with('\n') {
            merged.push('\n');
        }
        merged.push_str(&stderr);
    }
    merged
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_phase_transitions() {
        use EvalPhase::*;
        assert!(EvalPhase::valid_transition(NotStarted, Compiling));
        assert!(EvalPhase::valid_transition(Compiling, CompileFailed));
        assert!(EvalPhase::valid_transition(Compiling, Compiled));
        assert!(EvalPhase::valid_transition(Compiled, Running));
        assert!(EvalPhase::valid_transition(Running, RunFailed));
        assert!(EvalPhase::valid_transition(Running, RunSucceeded));
    }

    #[test]
    fn invalid_phase_transitions() {
        use EvalPhase::*;
        assert!(!EvalPhase::valid_transition(NotStarted, Running));
        assert!(!EvalPhase::valid_transition(Compiling, Running));
        assert!(!EvalPhase::valid_transition(CompileFailed, Compiled));
        assert!(!EvalPhase::valid_transition(RunFailed, Running));
        assert!(!EvalPhase::valid_transition(RunSucceeded, NotStarted));
    }

    #[test]
    fn result_roundtrips_through_json() {
        let result = EvaluationResult {
            diagnostic_file: Some(PathBuf::from("/cache/diagnostics/demo.dia")),
            compiler_output: Some("warning: something".to_owned()),
            manifest_json: Some(r#"{"name": "demo"}"#.to_owned()),
            error_output: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: EvaluationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.manifest_json, result.manifest_json);
        assert_eq!(back.compiler_output, result.compiler_output);
        assert!(!back.has_errors());
    }

    #[test]
    fn error_output_marks_result_as_failed() {
        let mut result = EvaluationResult::default();
        assert!(!result.has_errors());
        result.error_output = Some("failed to create temp file".to_owned());
        assert!(result.has_errors());
        assert!(result.manifest_json.is_none());
    }

    #[test]
    fn merge_output_joins_streams() {
        let output = std::process::Output {
            status: std::process::Command::new("true").status().unwrap(),
            stdout: b"out".to_vec(),
            stderr: b"err".to_vec(),
        };
        assert_eq!(merge_output(&output), "out\nerr");
    }
}

#[cfg(all(test, unix))]
mod pipeline_tests {
    use super::*;
    use gantry_schema::{PackageIdentity, PackageKind, ToolsVersion};
    use std::os::unix::fs::PermissionsExt;

    // A stand-in compiler: writes out an artifact script that emits the
    // given manifest JSON to its --manifest-output path.
    const STUB_COMPILER: &str = r#"#!/bin/sh
out=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then out="$a"; fi
  prev="$a"
done
cat > "$out" <<'ARTIFACT'
#!/bin/sh
dest=""
prev=""
for a in "$@"; do
  if [ "$prev" = "--manifest-output" ]; then dest="$a"; fi
  prev="$a"
done
printf '{"name": "demo"}' > "$dest"
ARTIFACT
chmod +x "$out"
echo "stub compile ok"
"#;

    const FAILING_COMPILER: &str = r#"#!/bin/sh
echo "error: manifest does not compile" >&2
exit 1
"#;

    // Compiles fine, but the artifact itself fails at run time.
    const COMPILER_OF_FAILING_ARTIFACT: &str = r#"#!/bin/sh
out=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then out="$a"; fi
  prev="$a"
done
cat > "$out" <<'ARTIFACT'
#!/bin/sh
echo "fatal error: manifest threw" >&2
exit 3
ARTIFACT
chmod +x "$out"
"#;

    fn install_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn evaluator_with(compiler: PathBuf, cache_dir: &Path) -> SandboxedEvaluator {
        let toolchain = ToolchainConfig::new(compiler, cache_dir.join("api"), "1.0.0-test");
        SandboxedEvaluator::new(toolchain, cache_dir).with_sandbox(false)
    }

    fn source(dir: &Path) -> ManifestSource {
        let manifest_path = dir.join("Package.manifest");
        fs::write(&manifest_path, "package body").unwrap();
        ManifestSource {
            identity: PackageIdentity::new("demo"),
            path: manifest_path,
            contents: b"package body".to_vec(),
            tools_version: ToolsVersion::V5_3,
            kind: PackageKind::Local,
            location: dir.to_string_lossy().into_owned(),
            version: None,
            revision: None,
        }
    }

    fn context() -> EvaluationContext {
        let mut environment = BTreeMap::new();
        environment.insert("PATH".to_owned(), "/usr/bin:/bin".to_owned());
        EvaluationContext {
            environment,
            toolchain_version: "1.0.0-test".to_owned(),
            extra_flags: Vec::new(),
        }
    }

    #[test]
    fn pipeline_produces_manifest_json() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = install_script(dir.path(), "manifestc", STUB_COMPILER);
        let evaluator = evaluator_with(compiler, dir.path());

        let result = evaluator.evaluate(&source(dir.path()), &context());
        assert!(!result.has_errors(), "error: {:?}", result.error_output);
        assert_eq!(result.manifest_json.as_deref(), Some(r#"{"name": "demo"}"#));
        assert!(result.compiler_output.unwrap().contains("stub compile ok"));
    }

    #[test]
    fn pipeline_stages_bytes_when_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = install_script(dir.path(), "manifestc", STUB_COMPILER);
        let evaluator = evaluator_with(compiler, dir.path());

        let mut source = source(dir.path());
        source.path = dir.path().join("does-not-exist").join("Package.manifest");
        let result = evaluator.evaluate(&source, &context());
        assert!(result.manifest_json.is_some());
    }

    #[test]
    fn compile_failure_carries_compiler_output() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = install_script(dir.path(), "manifestc", FAILING_COMPILER);
        let evaluator = evaluator_with(compiler, dir.path());

        let result = evaluator.evaluate(&source(dir.path()), &context());
        assert!(result.manifest_json.is_none());
        assert!(!result.has_errors());
        assert!(result
            .compiler_output
            .unwrap()
            .contains("manifest does not compile"));
    }

    #[test]
    fn run_failure_appends_output() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = install_script(dir.path(), "manifestc", COMPILER_OF_FAILING_ARTIFACT);
        let evaluator = evaluator_with(compiler, dir.path());

        let result = evaluator.evaluate(&source(dir.path()), &context());
        assert!(result.manifest_json.is_none());
        assert!(!result.has_errors());
        assert!(result.compiler_output.unwrap().contains("manifest threw"));
    }

    // Compile succeeds with a warning, but the artifact it writes is not
    // executable, so the run step cannot even launch.
    const COMPILER_OF_UNLAUNCHABLE_ARTIFACT: &str = r#"#!/bin/sh
echo "warning: deprecated manifest API" >&2
out=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then out="$a"; fi
  prev="$a"
done
printf 'not a program' > "$out"
"#;

    #[test]
    fn infrastructure_failure_keeps_compiler_output() {
        let dir = tempfile::tempdir().unwrap();
        let compiler =
            install_script(dir.path(), "manifestc", COMPILER_OF_UNLAUNCHABLE_ARTIFACT);
        let evaluator = evaluator_with(compiler, dir.path());

        let result = evaluator.evaluate(&source(dir.path()), &context());
        assert!(result.has_errors());
        assert!(result.error_output.unwrap().contains("failed to launch"));
        assert!(result
            .compiler_output
            .unwrap()
            .contains("deprecated manifest API"));
        assert!(result.manifest_json.is_none());
    }

    #[test]
    fn missing_compiler_is_infrastructure_failure() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = evaluator_with(dir.path().join("no-such-compiler"), dir.path());

        let result = evaluator.evaluate(&source(dir.path()), &context());
        assert!(result.has_errors());
        assert!(result.error_output.unwrap().contains("no-such-compiler"));
    }

    #[test]
    fn serialized_diagnostics_records_file() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = install_script(dir.path(), "manifestc", STUB_COMPILER);
        let evaluator =
            evaluator_with(compiler, dir.path()).with_serialized_diagnostics(true);

        let result = evaluator.evaluate(&source(dir.path()), &context());
        let diagnostic_file = result.diagnostic_file.unwrap();
        assert_eq!(diagnostic_file.file_name().unwrap(), "demo.dia");
        assert!(diagnostic_file.starts_with(dir.path().join("diagnostics")));
    }
}

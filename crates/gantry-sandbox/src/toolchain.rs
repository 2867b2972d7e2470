use gantry_schema::ToolsVersion;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Location and identity of the toolchain used to compile manifests.
#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    /// Compiler binary invoked for the compile step.
    pub compiler_path: PathBuf,
    /// Flags always passed to the compiler, before per-evaluation flags.
    pub compiler_flags: Vec<String>,
    /// Root directory holding the versioned manifest-API runtimes.
    pub manifest_api_root: PathBuf,
    /// Platform SDK root, when one applies on this host.
    pub sdk_root: Option<PathBuf>,
    /// Toolchain version string, hashed into cache keys.
    pub version: String,
}

impl ToolchainConfig {
    pub fn new(compiler_path: impl Into<PathBuf>, manifest_api_root: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            compiler_path: compiler_path.into(),
            compiler_flags: Vec::new(),
            manifest_api_root: manifest_api_root.into(),
            sdk_root: discover_sdk_root(),
            version: version.into(),
        }
    }

    /// Directory of the manifest-API runtime for `tools_version`.
    ///
    /// A `current` directory, when present, overrides the per-version
    /// subdirectories so a development toolchain can point every evaluation
    /// at its own runtime build.
    pub fn manifest_api_path(&self, tools_version: ToolsVersion) -> PathBuf {
        let current = self.manifest_api_root.join("current");
        if current.is_dir() {
            return current;
        }
        self.manifest_api_root.join(tools_version.runtime_subdir())
    }

    /// Compiler flags selecting the manifest-API runtime for `tools_version`.
    pub fn interpreter_flags(&self, tools_version: ToolsVersion) -> Vec<String> {
        vec![
            "--manifest-api".to_owned(),
            self.manifest_api_path(tools_version)
                .to_string_lossy()
                .into_owned(),
            "--tools-version".to_owned(),
            tools_version.to_string(),
        ]
    }
}

/// Target triple of the host, computed once.
pub fn host_triple() -> &'static str {
    static HOST_TRIPLE: OnceLock<String> = OnceLock::new();
    HOST_TRIPLE.get_or_init(|| format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS))
}

/// Probe for a platform SDK root. Returns `None` on hosts without one.
pub fn discover_sdk_root() -> Option<PathBuf> {
    std::env::var_os("SDKROOT")
        .map(PathBuf::from)
        .filter(|p| p.is_dir())
        .map(|p| canonicalized(&p))
}

fn canonicalized(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &Path) -> ToolchainConfig {
        ToolchainConfig::new("/usr/bin/manifestc", root, "1.0.0")
    }

    #[test]
    fn api_path_uses_versioned_subdir() {
        let dir = tempfile::tempdir().unwrap();
        let versioned = dir.path().join("v5.2");
        std::fs::create_dir_all(&versioned).unwrap();

        let config = config(dir.path());
        assert_eq!(config.manifest_api_path(ToolsVersion::V5_2), versioned);
    }

    #[test]
    fn current_dir_overrides_versioned() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("v5.2")).unwrap();
        let current = dir.path().join("current");
        std::fs::create_dir_all(&current).unwrap();

        let config = config(dir.path());
        assert_eq!(config.manifest_api_path(ToolsVersion::V5_2), current);
        assert_eq!(config.manifest_api_path(ToolsVersion::V5_3), current);
    }

    #[test]
    fn interpreter_flags_carry_tools_version() {
        let dir = tempfile::tempdir().unwrap();
        let flags = config(dir.path()).interpreter_flags(ToolsVersion::V5_3);
        assert_eq!(flags[0], "--manifest-api");
        assert_eq!(flags[2], "--tools-version");
        assert_eq!(flags[3], "5.3.0");
    }

    #[test]
    fn host_triple_is_stable() {
        let triple = host_triple();
        assert!(triple.contains('-'));
        assert_eq!(triple, host_triple());
    }
}

use crate::types::PackageIdentity;
use crate::ManifestError;
use crate::ToolsVersion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Where a package comes from, relative to the current load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageKind {
    /// The package the user invoked the engine on.
    Root,
    /// A dependency vendored at a local filesystem path.
    Local,
    /// A dependency fetched from a remote location.
    Remote,
}

impl PackageKind {
    pub fn is_root(self) -> bool {
        matches!(self, Self::Root)
    }
}

/// The raw inputs to one manifest load. Immutable once read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSource {
    pub identity: PackageIdentity,
    /// Absolute path to the manifest file. May not exist on disk when the
    /// load re-evaluates from retained bytes only.
    pub path: PathBuf,
    pub contents: Vec<u8>,
    pub tools_version: ToolsVersion,
    pub kind: PackageKind,
    /// Location string of the package (local path or remote URL).
    pub location: String,
    /// Resolved version of the package, if known.
    pub version: Option<String>,
    /// Resolved source-control revision of the package, if known.
    pub revision: Option<String>,
}

impl ManifestSource {
    /// Read manifest bytes from `path` and build a source record.
    pub fn read(
        path: impl Into<PathBuf>,
        identity: PackageIdentity,
        kind: PackageKind,
        location: impl Into<String>,
        tools_version: ToolsVersion,
    ) -> Result<Self, ManifestError> {
        let path = path.into();
        let contents = fs::read(&path)?;
        Ok(Self {
            identity,
            path,
            contents,
            tools_version,
            kind,
            location: location.into(),
            version: None,
            revision: None,
        })
    }
}

/// Everything besides the manifest itself that determines evaluation output.
/// Together with `ManifestSource` this fully determines the cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationContext {
    /// Environment variable snapshot passed to the evaluation subprocesses.
    pub environment: BTreeMap<String, String>,
    /// Version string of the host toolchain.
    pub toolchain_version: String,
    /// Extra flags appended to the manifest compile invocation. Not part of
    /// the cache key.
    pub extra_flags: Vec<String>,
}

impl EvaluationContext {
    /// Snapshot the current process environment.
    pub fn snapshot(toolchain_version: impl Into<String>) -> Self {
        Self {
            environment: std::env::vars().collect(),
            toolchain_version: toolchain_version.into(),
            extra_flags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Regular,
    Test,
    Binary,
    System,
    Plugin,
}

/// One entry of a target's dependency list. Product references cross package
/// boundaries; by-name references are resolved later against either a target
/// in this manifest or a declared package dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetDependency {
    Target { name: String },
    Product { name: String, package: Option<String> },
    ByName { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetDescription {
    pub name: String,
    pub kind: TargetKind,
    #[serde(default)]
    pub path: Option<String>,
    /// Remote location of a binary target's prebuilt artifact.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<TargetDependency>,
    #[serde(default)]
    pub pkg_config: Option<String>,
    #[serde(default)]
    pub providers: Vec<SystemPackageProvider>,
}

impl TargetDescription {
    /// A binary target is remote when backed by a URL, local when backed by
    /// a filesystem path.
    pub fn is_remote(&self) -> bool {
        self.url.is_some()
    }

    pub fn is_local(&self) -> bool {
        self.path.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryLinkage {
    Automatic,
    Static,
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    Library { linkage: LibraryLinkage },
    Executable,
    Plugin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProductDescription {
    pub name: String,
    pub kind: ProductKind,
    #[serde(default)]
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionRequirement {
    Exact { version: String },
    Range { lower: String, upper: String },
    Branch { name: String },
    Revision { id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencySource {
    Local {
        path: String,
    },
    Remote {
        url: String,
        requirement: VersionRequirement,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageDependency {
    pub identity: PackageIdentity,
    pub source: DependencySource,
    /// Explicit name used only to resolve target dependencies against this
    /// package.
    #[serde(default)]
    pub explicit_name: Option<String>,
}

impl PackageDependency {
    /// The name target dependencies resolve against: the explicit name when
    /// declared, the identity otherwise.
    pub fn name_for_target_resolution(&self) -> &str {
        self.explicit_name
            .as_deref()
            .unwrap_or_else(|| self.identity.as_str())
    }
}

/// A system-library provider hint, e.g. a package manager and the packages
/// that satisfy the library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemPackageProvider {
    pub manager: String,
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformRequirement {
    pub name: String,
    pub version: String,
}

/// The structural manifest decoded from the evaluator's JSON payload.
/// Fields arrive already typed; nothing here re-parses manifest syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParsedManifest {
    pub name: String,
    #[serde(default)]
    pub default_localization: Option<String>,
    #[serde(default)]
    pub platforms: Vec<PlatformRequirement>,
    #[serde(default)]
    pub c_language_standard: Option<String>,
    #[serde(default)]
    pub cxx_language_standard: Option<String>,
    #[serde(default)]
    pub pkg_config: Option<String>,
    #[serde(default)]
    pub providers: Vec<SystemPackageProvider>,
    #[serde(default)]
    pub targets: Vec<TargetDescription>,
    #[serde(default)]
    pub products: Vec<ProductDescription>,
    #[serde(default)]
    pub dependencies: Vec<PackageDependency>,
}

/// Decode the evaluator's structured-output payload into a typed manifest.
///
/// An empty payload means the evaluated program never emitted its
/// description and is rejected here rather than surfacing as a JSON error.
pub fn parse_evaluator_output(payload: &str) -> Result<ParsedManifest, ManifestError> {
    if payload.trim().is_empty() {
        return Err(ManifestError::EmptyEvaluatorOutput);
    }
    Ok(serde_json::from_str(payload)?)
}

/// The fully assembled, validated output of one load. Owned exclusively by
/// the caller; the engine holds no reference after returning it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub path: PathBuf,
    pub identity: PackageIdentity,
    pub kind: PackageKind,
    pub location: String,
    pub tools_version: ToolsVersion,
    pub version: Option<String>,
    pub revision: Option<String>,
    pub default_localization: Option<String>,
    pub platforms: Vec<PlatformRequirement>,
    pub c_language_standard: Option<String>,
    pub cxx_language_standard: Option<String>,
    pub pkg_config: Option<String>,
    pub providers: Vec<SystemPackageProvider>,
    pub targets: Vec<TargetDescription>,
    pub products: Vec<ProductDescription>,
    pub dependencies: Vec<PackageDependency>,
}

impl Manifest {
    /// Assemble the final manifest from its source record and the (possibly
    /// normalized) parsed description.
    pub fn from_parts(source: &ManifestSource, parsed: ParsedManifest) -> Self {
        Self {
            name: parsed.name,
            path: source.path.clone(),
            identity: source.identity.clone(),
            kind: source.kind,
            location: source.location.clone(),
            tools_version: source.tools_version,
            version: source.version.clone(),
            revision: source.revision.clone(),
            default_localization: parsed.default_localization,
            platforms: parsed.platforms,
            c_language_standard: parsed.c_language_standard,
            cxx_language_standard: parsed.cxx_language_standard,
            pkg_config: parsed.pkg_config,
            providers: parsed.providers,
            targets: parsed.targets,
            products: parsed.products,
            dependencies: parsed.dependencies,
        }
    }

    pub fn target(&self, name: &str) -> Option<&TargetDescription> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Find the declared package dependency a target dependency resolves
    /// against, matching resolution names case-insensitively.
    pub fn dependency_matching(&self, name: &str) -> Option<&PackageDependency> {
        self.dependencies
            .iter()
            .find(|d| d.name_for_target_resolution().eq_ignore_ascii_case(name))
    }
}

/// Conventional manifest file name inside a package directory.
pub const MANIFEST_FILENAME: &str = "Package.manifest";

/// Path of the manifest inside the given package directory.
pub fn manifest_path(package_dir: &Path) -> PathBuf {
    package_dir.join(MANIFEST_FILENAME)
}

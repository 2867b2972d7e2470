//! Structural validation of an assembled manifest.
//!
//! Each check is an independent pure function scanning the full manifest and
//! returning the diagnostics it found; `validate_manifest` concatenates them.
//! Nothing short-circuits, so one pass reports every violation. Checks
//! introduced with tools-version 5.2 produce nothing for older manifests.

use crate::manifest::{
    LibraryLinkage, Manifest, ProductKind, TargetDependency, TargetKind,
};
use crate::ToolsVersion;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Archive extension accepted for remote binary-target artifacts.
pub const SUPPORTED_ARCHIVE_EXTENSION: &str = "zip";
/// Extensions of the recognized local binary-artifact bundle kinds.
pub const BINARY_ARTIFACT_EXTENSIONS: &[&str] = &["xcframework", "artifactbundle"];
/// URL schemes accepted for remote binary targets.
pub const VALID_BINARY_SCHEMES: &[&str] = &["https"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// One validation finding. Errors fail the load once all checks have run;
/// warnings never do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Error => write!(f, "error: {}", self.message),
            Severity::Warning => write!(f, "warning: {}", self.message),
        }
    }
}

/// Whether any collected diagnostic is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

/// Run every structural check applicable at `tools_version` and collect the
/// findings. The caller decides whether errors are fatal.
pub fn validate_manifest(manifest: &Manifest, tools_version: ToolsVersion) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    diagnostics.extend(check_duplicate_targets(manifest));
    diagnostics.extend(check_products(manifest));
    diagnostics.extend(check_dependencies(manifest, tools_version));

    // Checks reserved for tools-version 5.2 features.
    if tools_version >= ToolsVersion::V5_2 {
        diagnostics.extend(check_target_dependency_references(manifest));
        diagnostics.extend(check_binary_targets(manifest));
    }
    diagnostics
}

/// Names appearing more than once, deduplicated and sorted.
fn duplicates<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = BTreeSet::new();
    let mut dup = BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            dup.insert(name);
        }
    }
    dup.into_iter().collect()
}

fn quoted_list(names: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    names
        .into_iter()
        .map(|n| n.as_ref().to_owned())
        .collect::<Vec<_>>()
        .join("', '")
}

fn check_duplicate_targets(manifest: &Manifest) -> Vec<Diagnostic> {
    duplicates(manifest.targets.iter().map(|t| t.name.as_str()))
        .into_iter()
        .map(|name| Diagnostic::error(format!("duplicate target named '{name}'")))
        .collect()
}

fn check_products(manifest: &Manifest) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for product in &manifest.products {
        if product.targets.is_empty() {
            diagnostics.push(Diagnostic::error(format!(
                "product '{}' doesn't reference any targets",
                product.name
            )));
            continue;
        }

        for target in &product.targets {
            if manifest.target(target).is_none() {
                let mut valid: Vec<&str> =
                    manifest.targets.iter().map(|t| t.name.as_str()).collect();
                valid.sort_unstable();
                diagnostics.push(Diagnostic::error(format!(
                    "target '{}' referenced in product '{}' could not be found; \
                     valid targets are: '{}'",
                    target,
                    product.name,
                    quoted_list(valid)
                )));
            }
        }

        // Products referencing only binary targets cannot declare a type
        // beyond the automatic-linkage library.
        let all_binary = product
            .targets
            .iter()
            .all(|t| manifest.target(t).is_some_and(|t| t.kind == TargetKind::Binary));
        let is_automatic_library = matches!(
            product.kind,
            ProductKind::Library {
                linkage: LibraryLinkage::Automatic
            }
        );
        if all_binary && !is_automatic_library {
            diagnostics.push(Diagnostic::error(format!(
                "invalid type for binary product '{}'; products referencing only \
                 binary targets must have a type of 'library'",
                product.name
            )));
        }
    }
    diagnostics
}

fn check_dependencies(manifest: &Manifest, tools_version: ToolsVersion) -> Vec<Diagnostic> {
    let mut by_identity: BTreeMap<&str, usize> = BTreeMap::new();
    for dependency in &manifest.dependencies {
        *by_identity.entry(dependency.identity.as_str()).or_default() += 1;
    }

    let duplicate_identities: BTreeSet<&str> = by_identity
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(identity, _)| *identity)
        .collect();

    let mut diagnostics: Vec<Diagnostic> = duplicate_identities
        .iter()
        .map(|identity| Diagnostic::error(format!("duplicate dependency '{identity}'")))
        .collect();

    if tools_version >= ToolsVersion::V5_2 {
        // Among dependencies not already flagged as identity duplicates,
        // resolution names must be unique too.
        let names = manifest
            .dependencies
            .iter()
            .filter(|d| !duplicate_identities.contains(d.identity.as_str()))
            .map(|d| d.name_for_target_resolution());
        for name in duplicates(names) {
            diagnostics.push(Diagnostic::error(format!(
                "duplicate dependency named '{name}'; consider differentiating \
                 them using the 'name' argument"
            )));
        }
    }
    diagnostics
}

fn location_scheme(location: &str) -> Option<&str> {
    location.split_once("://").map(|(scheme, _)| scheme)
}

fn location_extension(location: &str) -> Option<&str> {
    let component = location.rsplit('/').next().unwrap_or(location);
    component.rsplit_once('.').map(|(_, ext)| ext)
}

fn check_binary_targets(manifest: &Manifest) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for target in manifest.targets.iter().filter(|t| t.kind == TargetKind::Binary) {
        let location = target
            .url
            .as_deref()
            .or(target.path.as_deref())
            .filter(|l| !l.is_empty());
        let Some(location) = location else {
            diagnostics.push(Diagnostic::error(format!(
                "invalid location for binary target '{}'",
                target.name
            )));
            continue;
        };

        if target.is_remote()
            && !location_scheme(location).is_some_and(|s| VALID_BINARY_SCHEMES.contains(&s))
        {
            diagnostics.push(Diagnostic::error(format!(
                "invalid URL scheme for binary target '{}'; valid schemes are: '{}'",
                target.name,
                quoted_list(VALID_BINARY_SCHEMES)
            )));
        }

        let mut valid_extensions = vec![SUPPORTED_ARCHIVE_EXTENSION];
        if target.is_local() {
            valid_extensions.extend_from_slice(BINARY_ARTIFACT_EXTENSIONS);
        }
        if !location_extension(location).is_some_and(|ext| valid_extensions.contains(&ext)) {
            diagnostics.push(Diagnostic::error(format!(
                "unsupported extension for binary target '{}'; valid extensions are: '{}'",
                target.name,
                quoted_list(valid_extensions)
            )));
        }
    }
    diagnostics
}

fn check_target_dependency_references(manifest: &Manifest) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for target in &manifest.targets {
        for dependency in &target.dependencies {
            match dependency {
                // Same-package target references need no cross-checking here.
                TargetDependency::Target { .. } => {}
                TargetDependency::Product { name, package } => {
                    let package_name = package.as_deref().unwrap_or(name);
                    if manifest.dependency_matching(package_name).is_none() {
                        diagnostics.push(Diagnostic::error(format!(
                            "unknown package '{}' in dependencies of target '{}'; \
                             valid packages are: '{}'",
                            package_name,
                            target.name,
                            quoted_list(
                                manifest
                                    .dependencies
                                    .iter()
                                    .map(|d| d.name_for_target_resolution())
                            )
                        )));
                    }
                }
                TargetDependency::ByName { name } => {
                    // Root manifests are skipped so the caller's package
                    // loading layer can emit a richer diagnostic.
                    if !manifest.kind.is_root()
                        && manifest.target(name).is_none()
                        && manifest.dependency_matching(name).is_none()
                    {
                        diagnostics.push(Diagnostic::error(format!(
                            "unknown dependency '{}' in target '{}'; \
                             valid dependencies are: '{}'",
                            name,
                            target.name,
                            quoted_list(
                                manifest
                                    .dependencies
                                    .iter()
                                    .map(|d| d.name_for_target_resolution())
                            )
                        )));
                    }
                }
            }
        }
    }
    diagnostics
}

use crate::ManifestError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The tools-version a manifest declares: the minimum engine version it
/// supports, which gates the manifest-API runtime selected for evaluation
/// and the validation rule sets applied afterwards.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct ToolsVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ToolsVersion {
    /// Threshold for the duplicate-dependency-name, binary-target, and
    /// target-dependency-reference checks.
    pub const V5_2: Self = Self::new(5, 2, 0);
    /// Threshold below which manifests get the looser legacy sandbox profile.
    pub const V5_3: Self = Self::new(5, 3, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Canonical `major.minor.patch` form, stable across parse inputs that
    /// omit trailing components. Used for cache-key derivation.
    pub fn canonical(&self) -> String {
        self.to_string()
    }

    /// Subdirectory name of the versioned manifest-API runtime for this
    /// tools-version, e.g. `v5.2`.
    pub fn runtime_subdir(&self) -> String {
        format!("v{}.{}", self.major, self.minor)
    }
}

impl fmt::Display for ToolsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ToolsVersion {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ManifestError::InvalidToolsVersion(s.to_owned());
        let mut parts = s.trim().splitn(3, '.');
        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let minor = match parts.next() {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 0,
        };
        Ok(Self::new(major, minor, patch))
    }
}

impl TryFrom<String> for ToolsVersion {
    type Error = ManifestError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ToolsVersion> for String {
    fn from(v: ToolsVersion) -> Self {
        v.to_string()
    }
}

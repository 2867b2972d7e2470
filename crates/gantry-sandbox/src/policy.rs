use gantry_schema::ToolsVersion;
use std::path::{Path, PathBuf};

/// Confinement profile applied to the run step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    /// Read-only filesystem outside the granted writable directories, no
    /// network.
    Default,
    /// Same as `Default` plus writable `/tmp` and `/var/tmp`. Manifests
    /// written against older tools-versions predate the tighter profile and
    /// may scribble in the shared temporary directories.
    LegacyManifest,
}

impl Strictness {
    pub fn for_tools_version(tools_version: ToolsVersion) -> Self {
        if tools_version < ToolsVersion::V5_3 {
            Self::LegacyManifest
        } else {
            Self::Default
        }
    }
}

/// Wrap `command` in a bubblewrap invocation enforcing `strictness`.
///
/// The whole filesystem is bound read-only; each entry of `writable_dirs`
/// is re-bound writable on top. Network access is always denied.
pub fn apply_policy(
    command: &[String],
    writable_dirs: &[PathBuf],
    strictness: Strictness,
) -> Vec<String> {
    let mut argv: Vec<String> = vec![
        "bwrap".to_owned(),
        "--ro-bind".to_owned(),
        "/".to_owned(),
        "/".to_owned(),
        "--dev".to_owned(),
        "/dev".to_owned(),
        "--proc".to_owned(),
        "/proc".to_owned(),
        "--unshare-net".to_owned(),
        "--die-with-parent".to_owned(),
    ];

    let mut bind_writable = |dir: &Path| {
        let dir = dir.to_string_lossy().into_owned();
        argv.push("--bind".to_owned());
        argv.push(dir.clone());
        argv.push(dir);
    };

    for dir in writable_dirs {
        bind_writable(dir);
    }
    if strictness == Strictness::LegacyManifest {
        bind_writable(Path::new("/tmp"));
        bind_writable(Path::new("/var/tmp"));
    }

    argv.push("--".to_owned());
    argv.extend(command.iter().cloned());
    argv
}

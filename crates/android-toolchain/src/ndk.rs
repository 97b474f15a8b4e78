//! NDK Resolver
//!
//! Maps NDK release aliases (`r26d`) to the side-by-side version directories
//! sdkmanager installs (`ndk/26.3.11579264`) and validates explicit NDK paths.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use droidup_core::{InstallerError, Result};

use crate::host::HostOs;
use crate::inventory::{read_pkg_revision, ComponentKind};

/// Release alias → `Pkg.Revision` of the matching side-by-side package
const NDK_ALIASES: &[(&str, &str)] = &[
    ("r21e", "21.4.7075529"),
    ("r22b", "22.1.7171670"),
    ("r23b", "23.1.7779620"),
    ("r23c", "23.2.8568313"),
    ("r24", "24.0.8215888"),
    ("r25b", "25.1.8937393"),
    ("r25c", "25.2.9519653"),
    ("r26b", "26.1.10909125"),
    ("r26c", "26.2.11394342"),
    ("r26d", "26.3.11579264"),
    ("r27", "27.0.12077973"),
    ("r27b", "27.1.12297006"),
    ("r27c", "27.2.12479018"),
    ("r28", "28.0.13004108"),
    ("r28b", "28.1.13356709"),
];

/// Which NDK a request wants: a known release alias or an existing directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NdkSpec {
    Alias(String),
    Path(PathBuf),
}

impl NdkSpec {
    pub fn alias(alias: impl Into<String>) -> Result<Self> {
        let alias = alias.into().trim().to_string();
        if alias.is_empty() {
            return Err(InstallerError::InvalidArgument("NDK alias must not be empty".into()));
        }
        Ok(NdkSpec::Alias(alias))
    }

    pub fn path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(InstallerError::InvalidArgument(format!(
                "NDK path must be absolute, got {}",
                path.display()
            )));
        }
        Ok(NdkSpec::Path(path))
    }

    /// Anything containing a path separator is a path, everything else an alias
    pub fn parse(input: &str) -> Result<Self> {
        if input.contains('/') || input.contains('\\') {
            Self::path(input)
        } else {
            Self::alias(input)
        }
    }
}

impl fmt::Display for NdkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NdkSpec::Alias(alias) => f.write_str(alias),
            NdkSpec::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Outcome of resolving an [`NdkSpec`] against an SDK root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedNdk {
    /// Canonical version; `None` for an explicit path without `source.properties`
    pub version: Option<String>,
    pub path: PathBuf,
    pub installed: bool,
}

impl ResolvedNdk {
    /// Component to install when the NDK is missing
    pub fn install_step(&self) -> Option<ComponentKind> {
        match (&self.version, self.installed) {
            (Some(version), false) => Some(ComponentKind::Ndk(version.clone())),
            _ => None,
        }
    }
}

/// Name of the `ndk-build` entry point on this host
pub fn ndk_build_name() -> &'static str {
    match HostOs::current() {
        HostOs::Windows => "ndk-build.cmd",
        _ => "ndk-build",
    }
}

fn has_ndk_build(dir: &Path) -> bool {
    dir.join("ndk-build").is_file() || dir.join("ndk-build.cmd").is_file()
}

pub struct NdkResolver;

impl NdkResolver {
    /// Canonical version for an alias. A canonical version is its own alias.
    pub fn canonical_version(alias: &str) -> Result<&'static str> {
        NDK_ALIASES
            .iter()
            .find(|(name, version)| *name == alias || *version == alias)
            .map(|(_, version)| *version)
            .ok_or_else(|| {
                InstallerError::InvalidArgument(format!(
                    "unknown NDK alias '{}' (known: {})",
                    alias,
                    Self::known_aliases().collect::<Vec<_>>().join(", ")
                ))
            })
    }

    /// Release name (`r26d`) of a canonical version
    pub fn release_name(version: &str) -> Option<&'static str> {
        NDK_ALIASES
            .iter()
            .find(|(_, v)| *v == version)
            .map(|(name, _)| *name)
    }

    pub fn known_aliases() -> impl Iterator<Item = &'static str> {
        NDK_ALIASES.iter().map(|(name, _)| *name)
    }

    /// `sdk_root/ndk/<version>`
    pub fn install_dir(sdk_root: &Path, version: &str) -> PathBuf {
        sdk_root.join("ndk").join(version)
    }

    pub fn resolve(spec: &NdkSpec, sdk_root: &Path) -> Result<ResolvedNdk> {
        match spec {
            NdkSpec::Path(path) => {
                if !path.is_dir() || !has_ndk_build(path) {
                    return Err(InstallerError::ComponentNotFound(format!(
                        "no NDK (ndk-build) at {}",
                        path.display()
                    )));
                }
                let version = std::fs::read_to_string(path.join("source.properties"))
                    .ok()
                    .and_then(|content| crate::inventory::parse_pkg_revision(&content));
                debug!("Explicit NDK at {:?} (version {:?})", path, version);
                Ok(ResolvedNdk {
                    version,
                    path: path.clone(),
                    installed: true,
                })
            }
            NdkSpec::Alias(alias) => {
                let version = Self::canonical_version(alias)?;
                let path = Self::install_dir(sdk_root, version);
                let installed = path.join(ndk_build_name()).is_file();
                debug!("NDK alias {} -> {} (installed: {})", alias, version, installed);
                Ok(ResolvedNdk {
                    version: Some(version.to_string()),
                    path,
                    installed,
                })
            }
        }
    }

    /// Resolve and insist the NDK is on disk
    pub fn require_installed(spec: &NdkSpec, sdk_root: &Path) -> Result<PathBuf> {
        let resolved = Self::resolve(spec, sdk_root)?;
        if !resolved.installed {
            return Err(InstallerError::ComponentNotFound(format!(
                "NDK {} is not installed at {}",
                spec,
                resolved.path.display()
            )));
        }
        Ok(resolved.path)
    }

    /// Installed NDKs as `(version, path)`, including a legacy `ndk-bundle`
    pub async fn list_installed(sdk_root: &Path) -> Result<Vec<(String, PathBuf)>> {
        let mut found = Vec::new();

        let ndk_dir = sdk_root.join("ndk");
        match tokio::fs::read_dir(&ndk_dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await.map_err(|e| InstallerError::io_at(&ndk_dir, e))? {
                    let path = entry.path();
                    if path.is_dir() && has_ndk_build(&path) {
                        found.push((entry.file_name().to_string_lossy().to_string(), path));
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(InstallerError::io_at(&ndk_dir, e)),
        }

        let bundle = sdk_root.join("ndk-bundle");
        if bundle.is_dir() && has_ndk_build(&bundle) {
            let version = read_pkg_revision(&bundle)
                .await
                .unwrap_or_else(|| "ndk-bundle".to_string());
            found.push((version, bundle));
        }

        found.sort();
        Ok(found)
    }
}

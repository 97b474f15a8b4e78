//! Component Inventory
//!
//! Scans an SDK root and records which components are present. The scan is
//! the only source of truth; nothing is cached between runs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use droidup_core::{Abi, InstallerError, Result, SystemImageSpec, SystemImageTarget};

use crate::host::HostOs;
use crate::ndk::ndk_build_name;

/// A provisionable SDK component
///
/// Variant order is the fixed installation order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ComponentKind {
    CmdlineTools,
    PlatformTools,
    Platform(u32),
    BuildTools(String),
    SystemImage(SystemImageSpec),
    Emulator,
    Ndk(String),
}

impl ComponentKind {
    /// sdkmanager package id
    pub fn package_id(&self) -> String {
        match self {
            ComponentKind::CmdlineTools => "cmdline-tools;latest".to_string(),
            ComponentKind::PlatformTools => "platform-tools".to_string(),
            ComponentKind::Platform(api) => format!("platforms;android-{}", api),
            ComponentKind::BuildTools(version) => format!("build-tools;{}", version),
            ComponentKind::SystemImage(spec) => spec.package_id(),
            ComponentKind::Emulator => "emulator".to_string(),
            ComponentKind::Ndk(version) => format!("ndk;{}", version),
        }
    }

    /// Parse a package id as printed by `sdkmanager --list_installed`
    pub fn from_package_id(id: &str) -> Option<Self> {
        let parts: Vec<&str> = id.split(';').collect();
        match parts.as_slice() {
            ["platform-tools"] => Some(ComponentKind::PlatformTools),
            ["emulator"] => Some(ComponentKind::Emulator),
            ["cmdline-tools", "latest"] => Some(ComponentKind::CmdlineTools),
            ["platforms", platform] => parse_api(platform).map(ComponentKind::Platform),
            ["build-tools", version] => Some(ComponentKind::BuildTools(version.to_string())),
            ["ndk", version] => Some(ComponentKind::Ndk(version.to_string())),
            ["system-images", platform, target, arch] => {
                let api = parse_api(platform)?;
                let target: SystemImageTarget = target.parse().ok()?;
                let arch: Abi = arch.parse().ok()?;
                Some(ComponentKind::SystemImage(SystemImageSpec::new(api, target, arch)))
            }
            _ => None,
        }
    }

    /// Where the component lives under the SDK root
    pub fn install_dir(&self, sdk_root: &Path) -> PathBuf {
        match self {
            ComponentKind::CmdlineTools => sdk_root.join("cmdline-tools").join("latest"),
            ComponentKind::PlatformTools => sdk_root.join("platform-tools"),
            ComponentKind::Platform(api) => sdk_root.join("platforms").join(format!("android-{}", api)),
            ComponentKind::BuildTools(version) => sdk_root.join("build-tools").join(version),
            ComponentKind::SystemImage(spec) => spec.install_dir(sdk_root),
            ComponentKind::Emulator => sdk_root.join("emulator"),
            ComponentKind::Ndk(version) => sdk_root.join("ndk").join(version),
        }
    }

    /// File whose presence means the component is installed.
    ///
    /// Tools use their executable entry point, packages their `source.properties`.
    pub fn marker(&self, sdk_root: &Path) -> PathBuf {
        let os = HostOs::current();
        let dir = self.install_dir(sdk_root);
        match self {
            ComponentKind::CmdlineTools => dir.join("bin").join(format!("sdkmanager{}", os.script_suffix())),
            ComponentKind::PlatformTools => dir.join(format!("adb{}", os.exe_suffix())),
            ComponentKind::Emulator => dir.join(format!("emulator{}", os.exe_suffix())),
            ComponentKind::Ndk(_) => dir.join(ndk_build_name()),
            ComponentKind::Platform(_) | ComponentKind::BuildTools(_) | ComponentKind::SystemImage(_) => {
                dir.join("source.properties")
            }
        }
    }

    pub fn is_installed(&self, sdk_root: &Path) -> bool {
        self.marker(sdk_root).is_file()
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::CmdlineTools => f.write_str("cmdline-tools"),
            ComponentKind::PlatformTools => f.write_str("platform-tools"),
            ComponentKind::Platform(api) => write!(f, "platform:{}", api),
            ComponentKind::BuildTools(version) => write!(f, "build-tools:{}", version),
            ComponentKind::SystemImage(spec) => write!(f, "system-image:{}", spec),
            ComponentKind::Emulator => f.write_str("emulator"),
            ComponentKind::Ndk(version) => write!(f, "ndk:{}", version),
        }
    }
}

fn parse_api(platform: &str) -> Option<u32> {
    platform.strip_prefix("android-")?.parse().ok()
}

/// Extract `Pkg.Revision` from a `source.properties` file
pub(crate) fn parse_pkg_revision(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        (key.trim() == "Pkg.Revision").then(|| value.trim().to_string())
    })
}

pub(crate) async fn read_pkg_revision(dir: &Path) -> Option<String> {
    let content = tokio::fs::read_to_string(dir.join("source.properties")).await.ok()?;
    parse_pkg_revision(&content)
}

/// Subdirectory names of `dir`; a missing directory is empty
async fn subdirs(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(InstallerError::io_at(dir, e)),
    };

    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| InstallerError::io_at(dir, e))? {
        let path = entry.path();
        if path.is_dir() {
            found.push((entry.file_name().to_string_lossy().to_string(), path));
        }
    }
    Ok(found)
}

/// Installed components of one SDK root
#[derive(Debug, Clone, Default)]
pub struct ComponentInventory {
    sdk_root: PathBuf,
    entries: BTreeMap<ComponentKind, PathBuf>,
    avds: BTreeSet<String>,
}

impl ComponentInventory {
    /// Empty inventory, as for a fresh SDK root
    pub fn empty(sdk_root: impl Into<PathBuf>) -> Self {
        Self {
            sdk_root: sdk_root.into(),
            ..Default::default()
        }
    }

    /// Scan `sdk_root`. A missing root yields an empty inventory.
    pub async fn scan(sdk_root: &Path) -> Result<Self> {
        let mut inventory = Self::empty(sdk_root);

        for kind in [ComponentKind::CmdlineTools, ComponentKind::PlatformTools, ComponentKind::Emulator] {
            inventory.insert_if_present(kind);
        }

        for (name, _) in subdirs(&sdk_root.join("platforms")).await? {
            if let Some(api) = parse_api(&name) {
                inventory.insert_if_present(ComponentKind::Platform(api));
            }
        }

        for (version, _) in subdirs(&sdk_root.join("build-tools")).await? {
            inventory.insert_if_present(ComponentKind::BuildTools(version));
        }

        for (platform, platform_dir) in subdirs(&sdk_root.join("system-images")).await? {
            let Some(api) = parse_api(&platform) else { continue };
            for (target, target_dir) in subdirs(&platform_dir).await? {
                let Ok(target) = target.parse::<SystemImageTarget>() else {
                    debug!("Skipping unknown system image flavour {:?}", target_dir);
                    continue;
                };
                for (arch, _) in subdirs(&target_dir).await? {
                    if let Ok(arch) = arch.parse::<Abi>() {
                        inventory.insert_if_present(ComponentKind::SystemImage(SystemImageSpec::new(api, target, arch)));
                    }
                }
            }
        }

        for (version, _) in subdirs(&sdk_root.join("ndk")).await? {
            inventory.insert_if_present(ComponentKind::Ndk(version));
        }

        debug!("Inventory of {:?}: {} components", sdk_root, inventory.entries.len());
        Ok(inventory)
    }

    fn insert_if_present(&mut self, kind: ComponentKind) {
        if kind.is_installed(&self.sdk_root) {
            let dir = kind.install_dir(&self.sdk_root);
            self.entries.insert(kind, dir);
        }
    }

    /// Attach the names of AVDs that already exist
    pub fn with_avds(mut self, avds: impl IntoIterator<Item = String>) -> Self {
        self.avds.extend(avds);
        self
    }

    pub fn sdk_root(&self) -> &Path {
        &self.sdk_root
    }

    pub fn contains(&self, kind: &ComponentKind) -> bool {
        self.entries.contains_key(kind)
    }

    pub fn path(&self, kind: &ComponentKind) -> Option<&Path> {
        self.entries.get(kind).map(PathBuf::as_path)
    }

    pub fn has_avd(&self, name: &str) -> bool {
        self.avds.contains(name)
    }

    pub fn components(&self) -> impl Iterator<Item = (&ComponentKind, &Path)> {
        self.entries.iter().map(|(kind, path)| (kind, path.as_path()))
    }

    /// sdkmanager package ids of everything present
    pub fn package_ids(&self) -> Vec<String> {
        self.entries.keys().map(ComponentKind::package_id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

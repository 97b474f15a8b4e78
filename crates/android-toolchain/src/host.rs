//! Host Detection
//!
//! Read-only probe of the machine the toolchain is installed on: OS, CPU
//! architecture, Java, hardware virtualization and free disk space. No probe
//! is fatal; whatever cannot be determined is reported as absent or zero.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use droidup_core::Abi;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};
use which::which;

/// Host operating system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostOs {
    Linux,
    Macos,
    Windows,
}

impl HostOs {
    /// OS of the running process
    pub fn current() -> Self {
        if cfg!(windows) {
            HostOs::Windows
        } else if cfg!(target_os = "macos") {
            HostOs::Macos
        } else {
            HostOs::Linux
        }
    }

    /// Tag used in Google's repository archive names
    pub fn repository_tag(&self) -> &'static str {
        match self {
            HostOs::Linux => "linux",
            HostOs::Macos => "mac",
            HostOs::Windows => "win",
        }
    }

    /// Suffix for batch wrappers such as `sdkmanager.bat`
    pub fn script_suffix(&self) -> &'static str {
        match self {
            HostOs::Windows => ".bat",
            _ => "",
        }
    }

    /// Suffix for native executables such as `adb.exe`
    pub fn exe_suffix(&self) -> &'static str {
        match self {
            HostOs::Windows => ".exe",
            _ => "",
        }
    }
}

impl fmt::Display for HostOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HostOs::Linux => "linux",
            HostOs::Macos => "macos",
            HostOs::Windows => "windows",
        })
    }
}

/// Host CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostArch {
    X86_64,
    Arm64,
}

impl HostArch {
    /// Architecture of the running process
    pub fn current() -> Self {
        match env::consts::ARCH {
            "aarch64" | "arm64" => HostArch::Arm64,
            "x86_64" => HostArch::X86_64,
            other => {
                warn!("Unrecognised host architecture '{}', assuming x86_64", other);
                HostArch::X86_64
            }
        }
    }

    /// System image ABI that runs without translation on this architecture
    pub fn native_abi(&self) -> Abi {
        match self {
            HostArch::X86_64 => Abi::X86_64,
            HostArch::Arm64 => Abi::Arm64V8a,
        }
    }
}

impl fmt::Display for HostArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HostArch::X86_64 => "x86_64",
            HostArch::Arm64 => "arm64",
        })
    }
}

/// Java runtime version reported by `java -version`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JavaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl JavaVersion {
    /// Parse the version out of `java -version` output.
    ///
    /// Handles both `1.8.0_392` (major 8) and `17.0.2` style strings.
    pub fn parse_output(output: &str) -> Option<Self> {
        static VERSION_RE: OnceLock<Regex> = OnceLock::new();
        let re = VERSION_RE.get_or_init(|| {
            Regex::new(r#"version "(\d+)(?:\.(\d+))?(?:\.(\d+))?"#).expect("valid java version regex")
        });

        let caps = re.captures(output)?;
        let first: u32 = caps.get(1)?.as_str().parse().ok()?;
        let second: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let third: u32 = caps.get(3).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);

        if first == 1 {
            // Old format (1.8.x)
            Some(Self { major: second, minor: third, patch: 0 })
        } else {
            Some(Self { major: first, minor: second, patch: third })
        }
    }

    /// Current cmdline-tools need Java 17 or later
    pub fn supports_cmdline_tools(&self) -> bool {
        self.major >= 17
    }
}

impl fmt::Display for JavaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Immutable snapshot of the host, taken once per invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub os: HostOs,
    pub arch: HostArch,
    pub has_kvm: bool,
    pub java_version: Option<JavaVersion>,
    /// Free bytes on the filesystem holding the SDK root; 0 when unknown
    pub free_disk_bytes: u64,
}

/// Host detector
pub struct HostDetector;

impl HostDetector {
    /// Probe the host. Never fails; sub-probes that cannot run leave their field empty.
    pub async fn detect(sdk_root: &Path) -> HostInfo {
        info!("Detecting host environment...");

        let os = HostOs::current();
        let arch = HostArch::current();
        let has_kvm = Self::probe_virtualization(os).await;
        let java_version = Self::probe_java().await;
        let free_disk_bytes = Self::free_disk_bytes(sdk_root).unwrap_or_else(|| {
            debug!("Free disk space for {:?} is unknown", sdk_root);
            0
        });

        let host = HostInfo {
            os,
            arch,
            has_kvm,
            java_version,
            free_disk_bytes,
        };
        info!(
            "Host: {} {} (acceleration: {}, java: {}, free: {} MiB)",
            host.os,
            host.arch,
            host.has_kvm,
            host.java_version.map(|v| v.to_string()).unwrap_or_else(|| "none".into()),
            host.free_disk_bytes / (1024 * 1024)
        );
        host
    }

    /// Find a java executable: `JAVA_HOME/bin/java` first, then `PATH`
    fn java_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        let exe = format!("java{}", HostOs::current().exe_suffix());

        if let Some(java_home) = env::var_os("JAVA_HOME").filter(|v| !v.is_empty()) {
            candidates.push(PathBuf::from(java_home).join("bin").join(&exe));
        }
        if let Ok(java) = which("java") {
            candidates.push(java);
        }
        candidates
    }

    async fn probe_java() -> Option<JavaVersion> {
        for java in Self::java_candidates() {
            if !java.exists() {
                continue;
            }
            match Command::new(&java).arg("-version").output().await {
                Ok(output) => {
                    // java -version prints to stderr; some wrappers use stdout
                    let text = format!(
                        "{}{}",
                        String::from_utf8_lossy(&output.stderr),
                        String::from_utf8_lossy(&output.stdout)
                    );
                    if let Some(version) = JavaVersion::parse_output(&text) {
                        debug!("Found Java {} at {:?}", version, java);
                        return Some(version);
                    }
                    debug!("Could not parse version from {:?}", java);
                }
                Err(e) => debug!("Failed to run {:?}: {}", java, e),
            }
        }
        None
    }

    async fn probe_virtualization(os: HostOs) -> bool {
        match os {
            HostOs::Linux => {
                // The emulator needs read/write access to /dev/kvm
                let accessible = std::fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open("/dev/kvm")
                    .is_ok();
                debug!("/dev/kvm accessible: {}", accessible);
                accessible
            }
            HostOs::Macos => match Command::new("sysctl").args(["-n", "kern.hv_support"]).output().await {
                Ok(output) => String::from_utf8_lossy(&output.stdout).trim() == "1",
                Err(e) => {
                    debug!("sysctl probe failed: {}", e);
                    false
                }
            },
            HostOs::Windows => false,
        }
    }

    /// Nearest ancestor of `path` that exists; the SDK root usually does not yet
    fn existing_ancestor(path: &Path) -> Option<&Path> {
        path.ancestors().find(|p| p.exists())
    }

    #[cfg(unix)]
    fn free_disk_bytes(path: &Path) -> Option<u64> {
        let probe = Self::existing_ancestor(path)?;
        match nix::sys::statvfs::statvfs(probe) {
            #[allow(clippy::unnecessary_cast)]
            Ok(stat) => Some(stat.blocks_available() as u64 * stat.fragment_size() as u64),
            Err(e) => {
                debug!("statvfs({:?}) failed: {}", probe, e);
                None
            }
        }
    }

    #[cfg(windows)]
    fn free_disk_bytes(path: &Path) -> Option<u64> {
        use std::os::windows::ffi::OsStrExt;
        use windows_sys::Win32::Storage::FileSystem::GetDiskFreeSpaceExW;

        let probe = Self::existing_ancestor(path)?;
        let wide: Vec<u16> = probe.as_os_str().encode_wide().chain(Some(0)).collect();
        let mut free: u64 = 0;
        // SAFETY: `wide` is NUL-terminated and outlives the call; the unused
        // out-parameters may be null per the Win32 contract.
        let ok = unsafe {
            GetDiskFreeSpaceExW(wide.as_ptr(), &mut free, std::ptr::null_mut(), std::ptr::null_mut())
        };
        (ok != 0).then_some(free)
    }

    #[cfg(not(any(unix, windows)))]
    fn free_disk_bytes(_path: &Path) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_java_version_parsing() {
        let modern = "openjdk version \"17.0.2\" 2022-01-18\nOpenJDK Runtime Environment";
        assert_eq!(
            JavaVersion::parse_output(modern),
            Some(JavaVersion { major: 17, minor: 0, patch: 2 })
        );

        let legacy = "java version \"1.8.0_392\"\nJava(TM) SE Runtime Environment";
        let v = JavaVersion::parse_output(legacy).unwrap();
        assert_eq!(v.major, 8);
        assert!(!v.supports_cmdline_tools());

        let bare = "openjdk version \"21\" 2023-09-19";
        assert_eq!(JavaVersion::parse_output(bare).unwrap().major, 21);

        assert_eq!(JavaVersion::parse_output("command not found"), None);
    }

    #[tokio::test]
    async fn test_detect_never_fails() {
        let dir = tempfile::tempdir().unwrap();
        let host = HostDetector::detect(&dir.path().join("not").join("yet").join("sdk")).await;
        assert_eq!(host.os, HostOs::current());
    }

    #[test]
    fn test_repository_tags() {
        assert_eq!(HostOs::Linux.repository_tag(), "linux");
        assert_eq!(HostOs::Windows.script_suffix(), ".bat");
        assert_eq!(HostOs::Macos.exe_suffix(), "");
        assert_eq!(HostArch::Arm64.native_abi(), Abi::Arm64V8a);
    }
}

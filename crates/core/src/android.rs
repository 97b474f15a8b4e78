//! Android value types shared by the planner, the SDK adapter and the AVD manager.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InstallerError;

/// Lowest API level the installer provisions
pub const MIN_API_LEVEL: u32 = 21;

/// Highest API level the installer provisions
pub const MAX_API_LEVEL: u32 = 34;

/// An Android platform version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AndroidVersion {
    pub api_level: u32,
}

impl AndroidVersion {
    /// Create a version, rejecting API levels outside the supported range
    pub fn new(api_level: u32) -> Result<Self, InstallerError> {
        if !(MIN_API_LEVEL..=MAX_API_LEVEL).contains(&api_level) {
            return Err(InstallerError::InvalidArgument(format!(
                "API level {} is outside the supported range {}-{}",
                api_level, MIN_API_LEVEL, MAX_API_LEVEL
            )));
        }
        Ok(Self { api_level })
    }

    /// `platforms;android-XX`
    pub fn platform_package(&self) -> String {
        format!("platforms;android-{}", self.api_level)
    }
}

/// Target ABI of a system image
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Abi {
    #[serde(rename = "arm64-v8a")]
    Arm64V8a,
    #[serde(rename = "armeabi-v7a")]
    ArmeabiV7a,
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "x86")]
    X86,
}

impl Abi {
    /// Get the ABI name as used in SDK package ids and directory names
    pub fn as_str(&self) -> &'static str {
        match self {
            Abi::Arm64V8a => "arm64-v8a",
            Abi::ArmeabiV7a => "armeabi-v7a",
            Abi::X86_64 => "x86_64",
            Abi::X86 => "x86",
        }
    }

    /// Get all ABIs
    pub fn all() -> &'static [Abi] {
        &[Abi::Arm64V8a, Abi::ArmeabiV7a, Abi::X86_64, Abi::X86]
    }

    /// Whether the ABI is an ARM flavour
    pub fn is_arm(&self) -> bool {
        matches!(self, Abi::Arm64V8a | Abi::ArmeabiV7a)
    }
}

impl fmt::Display for Abi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Abi {
    type Err = InstallerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arm64-v8a" | "arm64" | "aarch64" => Ok(Abi::Arm64V8a),
            "armeabi-v7a" => Ok(Abi::ArmeabiV7a),
            "x86_64" => Ok(Abi::X86_64),
            "x86" => Ok(Abi::X86),
            other => Err(InstallerError::InvalidArgument(format!("unknown ABI '{}'", other))),
        }
    }
}

/// System image flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemImageTarget {
    Default,
    GoogleApis,
    GoogleAtd,
    GoogleApisPlaystore,
}

impl SystemImageTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemImageTarget::Default => "default",
            SystemImageTarget::GoogleApis => "google_apis",
            SystemImageTarget::GoogleAtd => "google_atd",
            SystemImageTarget::GoogleApisPlaystore => "google_apis_playstore",
        }
    }

    pub fn all() -> &'static [SystemImageTarget] {
        &[
            SystemImageTarget::Default,
            SystemImageTarget::GoogleApis,
            SystemImageTarget::GoogleAtd,
            SystemImageTarget::GoogleApisPlaystore,
        ]
    }
}

impl fmt::Display for SystemImageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemImageTarget {
    type Err = InstallerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(SystemImageTarget::Default),
            "google_apis" => Ok(SystemImageTarget::GoogleApis),
            "google_atd" => Ok(SystemImageTarget::GoogleAtd),
            "google_apis_playstore" | "playstore" => Ok(SystemImageTarget::GoogleApisPlaystore),
            other => Err(InstallerError::InvalidArgument(format!(
                "unknown system image target '{}'",
                other
            ))),
        }
    }
}

/// A concrete system image: API level, flavour and ABI
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SystemImageSpec {
    pub api_level: u32,
    pub target: SystemImageTarget,
    pub arch: Abi,
}

impl SystemImageSpec {
    pub fn new(api_level: u32, target: SystemImageTarget, arch: Abi) -> Self {
        Self { api_level, target, arch }
    }

    /// Package id understood by sdkmanager and avdmanager
    pub fn package_id(&self) -> String {
        format!(
            "system-images;android-{};{};{}",
            self.api_level, self.target, self.arch
        )
    }

    /// `sdk_root/system-images/android-<api>/<target>/<arch>`
    pub fn install_dir(&self, sdk_root: &Path) -> PathBuf {
        sdk_root
            .join("system-images")
            .join(format!("android-{}", self.api_level))
            .join(self.target.as_str())
            .join(self.arch.as_str())
    }

    /// Whether the image is present on disk (its `source.properties` exists)
    pub fn is_installed(&self, sdk_root: &Path) -> bool {
        self.install_dir(sdk_root).join("source.properties").is_file()
    }
}

impl fmt::Display for SystemImageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "android-{};{};{}", self.api_level, self.target, self.arch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_image_package_id() {
        let spec = SystemImageSpec::new(34, SystemImageTarget::GoogleApis, Abi::X86_64);
        assert_eq!(spec.package_id(), "system-images;android-34;google_apis;x86_64");
        assert_eq!(
            spec.install_dir(Path::new("/sdk")),
            Path::new("/sdk/system-images/android-34/google_apis/x86_64")
        );
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("arm64-v8a".parse::<Abi>().unwrap(), Abi::Arm64V8a);
        assert_eq!(
            "google_atd".parse::<SystemImageTarget>().unwrap(),
            SystemImageTarget::GoogleAtd
        );
        assert!("mips".parse::<Abi>().is_err());
    }

    #[test]
    fn test_api_range() {
        assert!(AndroidVersion::new(21).is_ok());
        assert!(AndroidVersion::new(34).is_ok());
        assert!(AndroidVersion::new(20).is_err());
        assert_eq!(AndroidVersion::new(30).unwrap().platform_package(), "platforms;android-30");
    }
}

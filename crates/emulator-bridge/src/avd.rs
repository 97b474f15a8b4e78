//! AVD (Android Virtual Device) Manager
//!
//! Creates, lists, inspects and deletes AVDs. Creation is idempotent and
//! never downloads anything: the system image must already be installed.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use configparser::ini::Ini;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use droidup_core::{InstallerError, Result, SystemImageSpec};

/// AVD configuration for creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvdConfig {
    pub name: String,
    pub system_image: SystemImageSpec,
    /// Device profile, e.g. `pixel_6`
    pub device: String,
    /// Replace an existing AVD of the same name
    pub force: bool,
}

impl AvdConfig {
    pub fn new(name: impl Into<String>, system_image: SystemImageSpec, device: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_image,
            device: device.into(),
            force: false,
        }
    }

    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AvdOutcome {
    /// Left untouched
    AlreadyExists,
    Created,
    Simulated,
}

/// AVD information
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvdInfo {
    pub name: String,
    pub path: PathBuf,
    /// `android-30` from the pointer file
    pub target: Option<String>,
    /// System image flavour (`tag.id`)
    pub tag: Option<String>,
    pub abi: Option<String>,
    /// `image.sysdir.1`, relative to the SDK root
    pub system_image_dir: Option<String>,
    pub device_name: Option<String>,
    pub ram_size_mb: Option<u32>,
    pub sdcard_size: Option<String>,
}

/// AVD operations
#[async_trait]
pub trait AvdBackend: Send + Sync {
    async fn create(&self, config: &AvdConfig) -> Result<AvdOutcome>;
    /// Names of existing AVDs, sorted
    async fn list(&self) -> Result<Vec<String>>;
    async fn get_info(&self, name: &str) -> Result<AvdInfo>;
    /// `false` when no AVD of that name exists
    async fn delete(&self, name: &str) -> Result<bool>;
}

/// Resolve the AVD home from environment lookups:
/// `ANDROID_AVD_HOME`, then `ANDROID_USER_HOME/avd`, then `~/.android/avd`.
pub fn avd_home_from(lookup: impl Fn(&str) -> Option<OsString>, home: Option<PathBuf>) -> PathBuf {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);

    if let Some(path) = non_empty("ANDROID_AVD_HOME") {
        return path;
    }
    if let Some(path) = non_empty("ANDROID_USER_HOME") {
        return path.join("avd");
    }
    home.unwrap_or_else(|| PathBuf::from("."))
        .join(".android")
        .join("avd")
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(InstallerError::InvalidArgument(format!(
            "invalid AVD name '{}' (allowed: letters, digits, '.', '_', '-')",
            name
        )))
    }
}

/// avdmanager-backed [`AvdBackend`]
pub struct AvdManager {
    sdk_root: PathBuf,
    avd_home: PathBuf,
    dry_run: bool,
    timeout: Duration,
}

impl AvdManager {
    pub fn new(sdk_root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            sdk_root: sdk_root.into(),
            avd_home: avd_home_from(|key| std::env::var_os(key), dirs::home_dir()),
            dry_run: false,
            timeout,
        }
    }

    pub fn with_avd_home(mut self, avd_home: impl Into<PathBuf>) -> Self {
        self.avd_home = avd_home.into();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn avd_home(&self) -> &Path {
        &self.avd_home
    }

    /// `<avd_home>/<name>.ini`
    fn pointer_file(&self, name: &str) -> PathBuf {
        self.avd_home.join(format!("{}.ini", name))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.pointer_file(name).is_file()
    }

    /// Get avdmanager path
    fn avdmanager_path(&self) -> Option<PathBuf> {
        let exe = if cfg!(windows) { "avdmanager.bat" } else { "avdmanager" };
        let path = self.sdk_root.join("cmdline-tools").join("latest").join("bin").join(exe);
        path.is_file().then_some(path)
    }

    async fn run_avdmanager(&self, args: &[&str], stdin_answer: &str) -> Result<String> {
        let avdmanager = self
            .avdmanager_path()
            .ok_or_else(|| InstallerError::ComponentNotFound("avdmanager (install cmdline-tools first)".into()))?;
        debug!("Running {:?} {:?}", avdmanager, args);

        let mut child = Command::new(&avdmanager)
            .args(args)
            .env("ANDROID_SDK_ROOT", &self.sdk_root)
            .env("ANDROID_HOME", &self.sdk_root)
            .env("ANDROID_AVD_HOME", &self.avd_home)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| InstallerError::io_at(&avdmanager, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(stdin_answer.as_bytes()).await {
                debug!("avdmanager closed stdin early: {}", e);
            }
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| InstallerError::Timeout(format!("avdmanager {}", args.join(" "))))?
            .map_err(|e| InstallerError::io_at(&avdmanager, e))?;

        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if !output.status.success() {
            return Err(InstallerError::AvdManager(format!(
                "`avdmanager {}` exited with {:?}: {}",
                args.join(" "),
                output.status.code(),
                combined.trim()
            )));
        }
        Ok(combined)
    }

    fn read_ini(content: String, path: &Path) -> Result<Ini> {
        let mut ini = Ini::new();
        ini.read(content)
            .map_err(|e| InstallerError::AvdManager(format!("cannot parse {}: {}", path.display(), e)))?;
        Ok(ini)
    }

    /// Parse AVD info from the pointer file and `config.ini`
    async fn parse_avd_info(&self, name: &str) -> Result<AvdInfo> {
        let pointer = self.pointer_file(name);
        let content = tokio::fs::read_to_string(&pointer)
            .await
            .map_err(|e| InstallerError::io_at(&pointer, e))?;
        let ini = Self::read_ini(content, &pointer)?;

        let path = ini
            .get("default", "path")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.avd_home.join(format!("{}.avd", name)));

        let mut info = AvdInfo {
            name: name.to_string(),
            target: ini.get("default", "target"),
            path,
            tag: None,
            abi: None,
            system_image_dir: None,
            device_name: None,
            ram_size_mb: None,
            sdcard_size: None,
        };

        let config_path = info.path.join("config.ini");
        if config_path.is_file() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .map_err(|e| InstallerError::io_at(&config_path, e))?;
            let config = Self::read_ini(content, &config_path)?;

            info.tag = config.get("default", "tag.id");
            info.abi = config.get("default", "abi.type");
            info.system_image_dir = config.get("default", "image.sysdir.1");
            info.device_name = config.get("default", "hw.device.name");
            info.ram_size_mb = config
                .get("default", "hw.ramSize")
                .and_then(|s| s.trim_end_matches(|c: char| c.is_ascii_alphabetic()).parse().ok());
            info.sdcard_size = config.get("default", "sdcard.size");
        }

        Ok(info)
    }

    /// Remove the pointer file and AVD directory without avdmanager
    async fn remove_files(&self, name: &str) -> Result<()> {
        let info = self.parse_avd_info(name).await?;
        if info.path.is_dir() {
            tokio::fs::remove_dir_all(&info.path)
                .await
                .map_err(|e| InstallerError::io_at(&info.path, e))?;
        }
        let pointer = self.pointer_file(name);
        tokio::fs::remove_file(&pointer)
            .await
            .map_err(|e| InstallerError::io_at(&pointer, e))
    }
}

#[async_trait]
impl AvdBackend for AvdManager {
    async fn create(&self, config: &AvdConfig) -> Result<AvdOutcome> {
        validate_name(&config.name)?;

        if self.exists(&config.name) && !config.force {
            info!("AVD '{}' already exists, leaving it untouched", config.name);
            return Ok(AvdOutcome::AlreadyExists);
        }
        if self.dry_run {
            info!("[dry-run] would create AVD '{}' from {}", config.name, config.system_image.package_id());
            return Ok(AvdOutcome::Simulated);
        }
        if !config.system_image.is_installed(&self.sdk_root) {
            return Err(InstallerError::AvdManager(format!(
                "missing dependency: system image {} is not installed",
                config.system_image.package_id()
            )));
        }

        tokio::fs::create_dir_all(&self.avd_home)
            .await
            .map_err(|e| InstallerError::io_at(&self.avd_home, e))?;

        info!("Creating AVD: {}", config.name);
        let package = config.system_image.package_id();
        let mut args = vec![
            "create",
            "avd",
            "-n",
            config.name.as_str(),
            "-k",
            package.as_str(),
            "-d",
            config.device.as_str(),
        ];
        if config.force {
            args.push("--force");
        }
        // Decline the custom hardware profile question
        self.run_avdmanager(&args, "no\n").await?;

        if !self.exists(&config.name) {
            return Err(InstallerError::AvdManager(format!(
                "avdmanager reported success but {} is missing",
                self.pointer_file(&config.name).display()
            )));
        }
        info!("AVD created successfully: {}", config.name);
        Ok(AvdOutcome::Created)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.avd_home).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(InstallerError::io_at(&self.avd_home, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| InstallerError::io_at(&self.avd_home, e))?
        {
            let path = entry.path();
            if path.is_file() && path.extension().map(|e| e == "ini").unwrap_or(false) {
                if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn get_info(&self, name: &str) -> Result<AvdInfo> {
        validate_name(name)?;
        if !self.exists(name) {
            return Err(InstallerError::ComponentNotFound(format!("AVD '{}'", name)));
        }
        self.parse_avd_info(name).await
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        if !self.exists(name) {
            debug!("AVD '{}' does not exist, nothing to delete", name);
            return Ok(false);
        }
        if self.dry_run {
            info!("[dry-run] would delete AVD '{}'", name);
            return Ok(true);
        }

        info!("Deleting AVD: {}", name);
        if self.avdmanager_path().is_some() {
            self.run_avdmanager(&["delete", "avd", "-n", name], "").await?;
        } else {
            self.remove_files(name).await?;
        }
        Ok(true)
    }
}

//! SDK Manager
//!
//! Realizes plan steps by invoking the vendor `sdkmanager`, or the archive
//! downloader where sdkmanager cannot help. Every `ensure_*` call is
//! idempotent: a component whose marker file exists is left alone.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use droidup_core::retry::with_backoff;
use droidup_core::{InstallerConfig, InstallerError, Result, RetryPolicy, SystemImageSpec};

use crate::downloader::{ArchiveCatalog, Downloader};
use crate::host::{HostArch, HostOs};
use crate::inventory::{ComponentInventory, ComponentKind};

/// Result of an `ensure_*` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsureOutcome {
    AlreadyPresent,
    Installed,
    /// Dry-run: nothing was changed
    Simulated,
}

/// Package-level operations on an SDK root
#[async_trait]
pub trait SdkBackend: Send + Sync {
    fn sdk_root(&self) -> &Path;

    async fn ensure_cmdline_tools(&self) -> Result<EnsureOutcome>;
    async fn ensure_platform_tools(&self) -> Result<EnsureOutcome>;
    async fn ensure_platform(&self, api_level: u32) -> Result<EnsureOutcome>;
    async fn ensure_system_image(&self, spec: &SystemImageSpec) -> Result<EnsureOutcome>;
    async fn ensure_emulator(&self) -> Result<EnsureOutcome>;
    async fn ensure_build_tools(&self, version: &str) -> Result<EnsureOutcome>;
    async fn ensure_ndk(&self, version: &str) -> Result<EnsureOutcome>;
    async fn accept_licenses(&self) -> Result<EnsureOutcome>;

    /// Package ids present on disk
    async fn list_installed(&self) -> Result<Vec<String>>;

    /// Route a component to its `ensure_*` method
    async fn ensure(&self, kind: &ComponentKind) -> Result<EnsureOutcome> {
        match kind {
            ComponentKind::CmdlineTools => self.ensure_cmdline_tools().await,
            ComponentKind::PlatformTools => self.ensure_platform_tools().await,
            ComponentKind::Platform(api) => self.ensure_platform(*api).await,
            ComponentKind::BuildTools(version) => self.ensure_build_tools(version).await,
            ComponentKind::SystemImage(spec) => self.ensure_system_image(spec).await,
            ComponentKind::Emulator => self.ensure_emulator().await,
            ComponentKind::Ndk(version) => self.ensure_ndk(version).await,
        }
    }
}

/// A row of `sdkmanager --list_installed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportedPackage {
    pub package: String,
    pub version: String,
    pub description: String,
    pub location: PathBuf,
}

/// `sdkmanager`-backed [`SdkBackend`]
pub struct SdkManager {
    sdk_root: PathBuf,
    os: HostOs,
    arch: HostArch,
    java_home: Option<PathBuf>,
    dry_run: bool,
    accept_licenses: bool,
    command_timeout: Duration,
    policy: RetryPolicy,
    downloader: Downloader,
}

impl SdkManager {
    pub fn new(sdk_root: impl Into<PathBuf>, config: &InstallerConfig) -> Result<Self> {
        let sdk_root = sdk_root.into();
        let downloader = Downloader::new(
            &sdk_root,
            config.resolve_cache_dir(&sdk_root),
            &config.network,
            config.show_progress,
        )?;

        Ok(Self {
            sdk_root,
            os: HostOs::current(),
            arch: HostArch::current(),
            java_home: None,
            dry_run: false,
            accept_licenses: config.accept_licenses,
            command_timeout: config.tools.command_timeout(),
            policy: config.network.retry_policy(),
            downloader,
        })
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the JAVA_HOME for SDK manager operations
    pub fn with_java_home(mut self, java_home: PathBuf) -> Self {
        self.java_home = Some(java_home);
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Find the sdkmanager executable
    pub fn find_sdkmanager(&self) -> Option<PathBuf> {
        let exe_name = format!("sdkmanager{}", self.os.script_suffix());

        let latest = self.sdk_root.join("cmdline-tools").join("latest").join("bin").join(&exe_name);
        if latest.is_file() {
            return Some(latest);
        }

        // Versioned cmdline-tools/X.Y
        if let Ok(entries) = std::fs::read_dir(self.sdk_root.join("cmdline-tools")) {
            for entry in entries.flatten() {
                let path = entry.path().join("bin").join(&exe_name);
                if path.is_file() {
                    return Some(path);
                }
            }
        }

        // Legacy tools/ directory
        let legacy = self.sdk_root.join("tools").join("bin").join(&exe_name);
        legacy.is_file().then_some(legacy)
    }

    /// Create the base command with environment variables
    fn create_command(&self, sdkmanager: &Path) -> Command {
        let mut cmd = Command::new(sdkmanager);
        cmd.env("ANDROID_SDK_ROOT", &self.sdk_root);
        cmd.env("ANDROID_HOME", &self.sdk_root);
        if let Some(java_home) = &self.java_home {
            cmd.env("JAVA_HOME", java_home);
        }
        cmd
    }

    /// Run sdkmanager once, answering `y` to up to `answers` prompts.
    /// Returns combined stdout and stderr.
    async fn run_sdkmanager(&self, sdkmanager: &Path, args: &[String], what: &str, answers: usize) -> Result<String> {
        debug!("Running {:?} {:?}", sdkmanager, args);

        let mut child = self
            .create_command(sdkmanager)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    InstallerError::ComponentNotFound(format!("sdkmanager at {}", sdkmanager.display()))
                }
                _ => InstallerError::io_at(sdkmanager, e),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let answers = "y\n".repeat(answers);
            // sdkmanager may exit without reading every answer
            if let Err(e) = stdin.write_all(answers.as_bytes()).await {
                debug!("sdkmanager closed stdin early: {}", e);
            }
        }

        let output = match tokio::time::timeout(self.command_timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| InstallerError::io_at(sdkmanager, e))?,
            Err(_) => {
                return Err(InstallerError::Timeout(format!(
                    "sdkmanager {} after {:?}",
                    what, self.command_timeout
                )))
            }
        };

        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        for line in combined.lines().filter(|l| !l.trim().is_empty()) {
            debug!("sdkmanager: {}", line);
        }

        if !output.status.success() {
            return Err(InstallerError::SdkManager {
                package: what.to_string(),
                exit_code: output.status.code(),
                output: combined,
            });
        }
        Ok(combined)
    }

    async fn install_with_sdkmanager(&self, sdkmanager: &Path, kind: &ComponentKind) -> Result<()> {
        let package = kind.package_id();
        let args = vec![format!("--sdk_root={}", self.sdk_root.display()), package.clone()];
        info!("Installing {} with sdkmanager", package);

        // Without consent, closed stdin makes sdkmanager fail at a license prompt
        let answers = if self.accept_licenses { 10 } else { 0 };
        let package_ref = package.as_str();
        let args_ref = args.as_slice();
        with_backoff(self.policy, &format!("sdkmanager {}", package), move |_| async move {
            self.run_sdkmanager(sdkmanager, args_ref, package_ref, answers).await
        })
        .await?;
        Ok(())
    }

    async fn install_from_archive(&self, kind: &ComponentKind) -> Result<()> {
        let spec = ArchiveCatalog::for_component(kind, self.os, self.arch)?;
        info!("Installing {} from {}", kind.package_id(), spec.url);
        self.downloader.install(&spec, &kind.install_dir(&self.sdk_root)).await
    }

    async fn ensure_component(&self, kind: ComponentKind) -> Result<EnsureOutcome> {
        if kind.is_installed(&self.sdk_root) {
            debug!("{} already present", kind);
            return Ok(EnsureOutcome::AlreadyPresent);
        }
        if self.dry_run {
            info!("[dry-run] would install {}", kind.package_id());
            return Ok(EnsureOutcome::Simulated);
        }

        let has_archive = matches!(
            kind,
            ComponentKind::CmdlineTools | ComponentKind::PlatformTools | ComponentKind::Emulator | ComponentKind::Ndk(_)
        );
        match self.find_sdkmanager() {
            // sdkmanager cannot bootstrap itself
            Some(_) if kind == ComponentKind::CmdlineTools => self.install_from_archive(&kind).await?,
            Some(sdkmanager) => self.install_with_sdkmanager(&sdkmanager, &kind).await?,
            None if has_archive => {
                warn!("sdkmanager not found, falling back to a direct download for {}", kind);
                self.install_from_archive(&kind).await?
            }
            None => {
                return Err(InstallerError::ComponentNotFound(format!(
                    "sdkmanager is required to install {}; install cmdline-tools first",
                    kind.package_id()
                )))
            }
        }

        let marker = kind.marker(&self.sdk_root);
        if !marker.is_file() {
            return Err(InstallerError::SdkManager {
                package: kind.package_id(),
                exit_code: Some(0),
                output: format!("install finished but {} is missing", marker.display()),
            });
        }
        Ok(EnsureOutcome::Installed)
    }

    /// Packages as reported by `sdkmanager --list_installed`
    pub async fn list_reported(&self) -> Result<Vec<ReportedPackage>> {
        let sdkmanager = self
            .find_sdkmanager()
            .ok_or_else(|| InstallerError::ComponentNotFound("sdkmanager".into()))?;
        let args = vec![
            format!("--sdk_root={}", self.sdk_root.display()),
            "--list_installed".to_string(),
        ];
        let output = self.run_sdkmanager(&sdkmanager, &args, "--list_installed", 0).await?;
        Ok(Self::parse_installed_output(&output, &self.sdk_root))
    }

    /// Parse the `Installed packages:` table
    pub fn parse_installed_output(output: &str, sdk_root: &Path) -> Vec<ReportedPackage> {
        let mut packages = Vec::new();
        let mut in_packages = false;

        for line in output.lines() {
            let line = line.trim();

            if line.starts_with("Installed packages:") {
                in_packages = true;
                continue;
            }
            if in_packages && line.ends_with(':') && !line.contains('|') {
                // Next section ("Available Packages:", "Available Updates:")
                break;
            }

            if in_packages && !line.is_empty() && !line.starts_with("---") && !line.starts_with("Path") {
                let parts: Vec<&str> = line.split('|').map(str::trim).collect();
                if parts.len() >= 3 {
                    let location = parts
                        .get(3)
                        .map(|loc| sdk_root.join(loc))
                        .unwrap_or_else(|| sdk_root.join(parts[0].replace(';', std::path::MAIN_SEPARATOR_STR)));
                    packages.push(ReportedPackage {
                        package: parts[0].to_string(),
                        version: parts[1].to_string(),
                        description: parts[2].to_string(),
                        location,
                    });
                }
            }
        }

        packages
    }
}

#[async_trait]
impl SdkBackend for SdkManager {
    fn sdk_root(&self) -> &Path {
        &self.sdk_root
    }

    async fn ensure_cmdline_tools(&self) -> Result<EnsureOutcome> {
        self.ensure_component(ComponentKind::CmdlineTools).await
    }

    async fn ensure_platform_tools(&self) -> Result<EnsureOutcome> {
        self.ensure_component(ComponentKind::PlatformTools).await
    }

    async fn ensure_platform(&self, api_level: u32) -> Result<EnsureOutcome> {
        self.ensure_component(ComponentKind::Platform(api_level)).await
    }

    async fn ensure_system_image(&self, spec: &SystemImageSpec) -> Result<EnsureOutcome> {
        self.ensure_component(ComponentKind::SystemImage(*spec)).await
    }

    async fn ensure_emulator(&self) -> Result<EnsureOutcome> {
        self.ensure_component(ComponentKind::Emulator).await
    }

    async fn ensure_build_tools(&self, version: &str) -> Result<EnsureOutcome> {
        self.ensure_component(ComponentKind::BuildTools(version.to_string())).await
    }

    async fn ensure_ndk(&self, version: &str) -> Result<EnsureOutcome> {
        self.ensure_component(ComponentKind::Ndk(version.to_string())).await
    }

    async fn accept_licenses(&self) -> Result<EnsureOutcome> {
        if self.sdk_root.join("licenses").join("android-sdk-license").is_file() {
            debug!("SDK license already accepted");
            return Ok(EnsureOutcome::AlreadyPresent);
        }
        if self.dry_run {
            info!("[dry-run] would accept SDK licenses");
            return Ok(EnsureOutcome::Simulated);
        }

        let sdkmanager = self
            .find_sdkmanager()
            .ok_or_else(|| InstallerError::ComponentNotFound("sdkmanager (needed to accept licenses)".into()))?;
        info!("Accepting Android SDK licenses...");
        let args = vec![format!("--sdk_root={}", self.sdk_root.display()), "--licenses".to_string()];
        self.run_sdkmanager(&sdkmanager, &args, "--licenses", 50).await?;
        Ok(EnsureOutcome::Installed)
    }

    async fn list_installed(&self) -> Result<Vec<String>> {
        Ok(ComponentInventory::scan(&self.sdk_root).await?.package_ids())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use droidup_core::{Abi, SystemImageTarget};

    fn manager(sdk_root: &Path) -> SdkManager {
        SdkManager::new(sdk_root, &InstallerConfig::default()).unwrap()
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[tokio::test]
    async fn test_present_component_is_not_reinstalled() {
        let dir = tempfile::tempdir().unwrap();
        let sdk = manager(dir.path());
        touch(&ComponentKind::Platform(30).marker(dir.path()));

        assert_eq!(sdk.ensure_platform(30).await.unwrap(), EnsureOutcome::AlreadyPresent);
        assert_eq!(sdk.list_installed().await.unwrap(), vec!["platforms;android-30".to_string()]);
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("sdk");
        let sdk = manager(&root).with_dry_run(true);
        let image = SystemImageSpec::new(30, SystemImageTarget::GoogleAtd, Abi::Arm64V8a);

        assert_eq!(sdk.ensure_cmdline_tools().await.unwrap(), EnsureOutcome::Simulated);
        assert_eq!(sdk.ensure_system_image(&image).await.unwrap(), EnsureOutcome::Simulated);
        assert_eq!(sdk.accept_licenses().await.unwrap(), EnsureOutcome::Simulated);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_package_without_sdkmanager() {
        let dir = tempfile::tempdir().unwrap();
        let sdk = manager(dir.path());

        assert!(sdk.find_sdkmanager().is_none());
        let err = sdk.ensure_build_tools("34.0.0").await.unwrap_err();
        assert!(matches!(err, InstallerError::ComponentNotFound(_)));
    }

    #[tokio::test]
    async fn test_licenses_skipped_when_accepted() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("licenses").join("android-sdk-license"));
        assert_eq!(manager(dir.path()).accept_licenses().await.unwrap(), EnsureOutcome::AlreadyPresent);
    }

    #[test]
    fn test_find_versioned_sdkmanager() {
        let dir = tempfile::tempdir().unwrap();
        let exe = format!("sdkmanager{}", HostOs::current().script_suffix());
        touch(&dir.path().join("cmdline-tools").join("9.0").join("bin").join(&exe));
        assert!(manager(dir.path()).find_sdkmanager().unwrap().ends_with(Path::new("9.0").join("bin").join(&exe)));
    }

    #[test]
    fn test_parse_installed_output() {
        let output = "\
Installed packages:
  Path                 | Version | Description                | Location
  -------              | ------- | -------                    | -------
  build-tools;34.0.0   | 34.0.0  | Android SDK Build-Tools 34 | build-tools/34.0.0
  platform-tools       | 35.0.1  | Android SDK Platform-Tools | platform-tools
  platforms;android-30 | 3       | Android SDK Platform 30    | platforms/android-30

Available Packages:
  ndk;26.3.11579264    | 26.3.11579264 | NDK (Side by side) 26.3.11579264
";
        let packages = SdkManager::parse_installed_output(output, Path::new("/sdk"));
        assert_eq!(packages.len(), 3);
        assert_eq!(packages[0].package, "build-tools;34.0.0");
        assert_eq!(packages[2].version, "3");
        assert_eq!(packages[1].location, Path::new("/sdk/platform-tools"));
    }

    /// Install an executable `sdkmanager` script that records its arguments,
    /// stdin and invocation count next to itself, then runs `body`
    #[cfg(unix)]
    fn scripted_sdkmanager(sdk_root: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let bin = sdk_root.join("cmdline-tools").join("latest").join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let script = bin.join("sdkmanager");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\nhere=\"$(dirname \"$0\")\"\necho run >> \"$here/calls.log\"\necho \"$@\" > \"$here/args.txt\"\ncat > \"$here/stdin.txt\"\n{}\n",
                body
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        bin
    }

    #[cfg(unix)]
    const CREATE_PLATFORM: &str =
        "mkdir -p \"$ANDROID_SDK_ROOT/platforms/android-30\" && touch \"$ANDROID_SDK_ROOT/platforms/android-30/source.properties\"";

    #[cfg(unix)]
    fn scripted_manager(sdk_root: &Path, accept_licenses: bool) -> SdkManager {
        let mut config = InstallerConfig::default();
        config.accept_licenses = accept_licenses;
        let mut sdk = SdkManager::new(sdk_root, &config).unwrap();
        sdk.policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
        };
        sdk
    }

    #[cfg(unix)]
    fn calls(bin: &Path) -> usize {
        std::fs::read_to_string(bin.join("calls.log")).unwrap().lines().count()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_install_passes_sdk_root_and_package() {
        let dir = tempfile::tempdir().unwrap();
        let bin = scripted_sdkmanager(dir.path(), CREATE_PLATFORM);
        let sdk = scripted_manager(dir.path(), false);

        assert_eq!(sdk.ensure_platform(30).await.unwrap(), EnsureOutcome::Installed);
        let args = std::fs::read_to_string(bin.join("args.txt")).unwrap();
        assert_eq!(args.trim(), format!("--sdk_root={} platforms;android-30", dir.path().display()));
        assert_eq!(calls(&bin), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_license_prompts_left_unanswered_without_consent() {
        let dir = tempfile::tempdir().unwrap();
        let bin = scripted_sdkmanager(dir.path(), CREATE_PLATFORM);

        scripted_manager(dir.path(), false).ensure_platform(30).await.unwrap();
        assert_eq!(std::fs::read_to_string(bin.join("stdin.txt")).unwrap(), "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_license_prompts_answered_with_consent() {
        let dir = tempfile::tempdir().unwrap();
        let bin = scripted_sdkmanager(dir.path(), CREATE_PLATFORM);

        scripted_manager(dir.path(), true).ensure_platform(30).await.unwrap();
        assert_eq!(std::fs::read_to_string(bin.join("stdin.txt")).unwrap(), "y\n".repeat(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_install_reports_output_and_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let bin = scripted_sdkmanager(dir.path(), "echo \"License android-sdk-license not accepted\"\nexit 1");
        let sdk = scripted_manager(dir.path(), false);

        match sdk.ensure_platform(30).await.unwrap_err() {
            InstallerError::SdkManager {
                package,
                exit_code,
                output,
            } => {
                assert_eq!(package, "platforms;android-30");
                assert_eq!(exit_code, Some(1));
                assert!(output.contains("not accepted"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(calls(&bin), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_install_without_marker_fails() {
        let dir = tempfile::tempdir().unwrap();
        scripted_sdkmanager(dir.path(), "exit 0");

        match scripted_manager(dir.path(), false).ensure_platform(30).await.unwrap_err() {
            InstallerError::SdkManager { exit_code, output, .. } => {
                assert_eq!(exit_code, Some(0));
                assert!(output.contains("install finished but"));
                assert!(output.contains("is missing"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_sdkmanager_times_out_and_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let bin = scripted_sdkmanager(dir.path(), "sleep 5");
        let mut sdk = scripted_manager(dir.path(), false);
        sdk.command_timeout = Duration::from_millis(500);

        let err = sdk.ensure_platform(30).await.unwrap_err();
        assert!(matches!(err, InstallerError::Timeout(_)), "{:?}", err);
        assert_eq!(calls(&bin), 2);
        assert!(!ComponentKind::Platform(30).is_installed(dir.path()));
    }
}

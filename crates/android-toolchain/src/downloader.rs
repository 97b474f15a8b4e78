//! Archive Downloader
//!
//! Direct-download fallback for components sdkmanager cannot provide: the
//! command-line tools themselves, and platform-tools, emulator or NDK when
//! sdkmanager is missing. Archives land in `<cache>/<file>.part`, are renamed
//! once complete, then unpack into `sdk_root/.droidup-staging` and move into
//! place only after extraction succeeded.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use droidup_core::config::NetworkConfig;
use droidup_core::retry::with_backoff;
use droidup_core::{InstallerError, Result, RetryPolicy};

use crate::host::{HostArch, HostOs};
use crate::inventory::ComponentKind;
use crate::ndk::NdkResolver;

const REPOSITORY: &str = "https://dl.google.com/android/repository";

/// Pinned command-line tools build
const CMDLINE_TOOLS_BUILD: &str = "11076708";

/// Pinned emulator build used when sdkmanager is unavailable
const EMULATOR_BUILD: &str = "11237101";

/// Directory under the SDK root used for unpacking
pub const STAGING_DIR: &str = ".droidup-staging";

/// A downloadable component archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSpec {
    pub url: String,
    pub file_name: String,
    pub sha256: Option<&'static str>,
    /// Top-level directory inside the archive
    pub root_dir: String,
}

impl ArchiveSpec {
    fn new(file_name: String, sha256: Option<&'static str>, root_dir: impl Into<String>) -> Self {
        Self {
            url: format!("{}/{}", REPOSITORY, file_name),
            file_name,
            sha256,
            root_dir: root_dir.into(),
        }
    }
}

/// Known archive locations per host
pub struct ArchiveCatalog;

impl ArchiveCatalog {
    pub fn cmdline_tools(os: HostOs) -> ArchiveSpec {
        let sha256 = match os {
            HostOs::Linux => "2d2d50857e4eb553af5a6dc3ad507a17adf43d115264b1afc116f95c92e5e258",
            HostOs::Macos => "7bc5c72ba0275c80a8f19684fb92793b83e8e5234be12c7f8e6d42c5c9bd787d",
            HostOs::Windows => "4d6931209eebb1bfb7c7e8b240a6a3cb3ab24479ea294f3539429574b1eec862",
        };
        ArchiveSpec::new(
            format!("commandlinetools-{}-{}_latest.zip", os.repository_tag(), CMDLINE_TOOLS_BUILD),
            Some(sha256),
            "cmdline-tools",
        )
    }

    pub fn platform_tools(os: HostOs) -> ArchiveSpec {
        let tag = match os {
            HostOs::Macos => "darwin",
            HostOs::Linux => "linux",
            HostOs::Windows => "windows",
        };
        ArchiveSpec::new(format!("platform-tools-latest-{}.zip", tag), None, "platform-tools")
    }

    pub fn emulator(os: HostOs, arch: HostArch) -> Result<ArchiveSpec> {
        let tag = match (os, arch) {
            (HostOs::Linux, HostArch::X86_64) => "linux_x64",
            (HostOs::Macos, HostArch::X86_64) => "darwin_x64",
            (HostOs::Macos, HostArch::Arm64) => "darwin_aarch64",
            (HostOs::Windows, _) => "windows_x64",
            (HostOs::Linux, HostArch::Arm64) => {
                return Err(InstallerError::ComponentNotFound(
                    "no emulator archive is published for linux/arm64".into(),
                ))
            }
        };
        Ok(ArchiveSpec::new(
            format!("emulator-{}-{}.zip", tag, EMULATOR_BUILD),
            None,
            "emulator",
        ))
    }

    pub fn ndk(version: &str, os: HostOs) -> Result<ArchiveSpec> {
        let release = NdkResolver::release_name(version).ok_or_else(|| {
            InstallerError::ComponentNotFound(format!("no archive known for NDK {}", version))
        })?;
        let tag = match os {
            HostOs::Linux => "linux",
            HostOs::Windows => "windows",
            // macOS NDKs ship as .dmg only
            HostOs::Macos => {
                return Err(InstallerError::ComponentNotFound(format!(
                    "NDK {} has no zip archive for macOS; install it with sdkmanager",
                    version
                )))
            }
        };
        // Releases before r23 name the host architecture too
        let major: Option<u32> = release
            .trim_start_matches('r')
            .chars()
            .take_while(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .ok();
        let arch = if major.is_some_and(|major| major < 23) { "-x86_64" } else { "" };
        Ok(ArchiveSpec::new(
            format!("android-ndk-{}-{}{}.zip", release, tag, arch),
            None,
            format!("android-ndk-{}", release),
        ))
    }

    /// Archive for a component, if it has one
    pub fn for_component(kind: &ComponentKind, os: HostOs, arch: HostArch) -> Result<ArchiveSpec> {
        match kind {
            ComponentKind::CmdlineTools => Ok(Self::cmdline_tools(os)),
            ComponentKind::PlatformTools => Ok(Self::platform_tools(os)),
            ComponentKind::Emulator => Self::emulator(os, arch),
            ComponentKind::Ndk(version) => Self::ndk(version, os),
            other => Err(InstallerError::ComponentNotFound(format!(
                "{} is only available through sdkmanager",
                other.package_id()
            ))),
        }
    }
}

/// Downloads, verifies and unpacks component archives
pub struct Downloader {
    client: Client,
    cache_dir: PathBuf,
    staging_root: PathBuf,
    policy: RetryPolicy,
    timeout: Duration,
    show_progress: bool,
}

impl Downloader {
    pub fn new(sdk_root: &Path, cache_dir: PathBuf, network: &NetworkConfig, show_progress: bool) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("droidup/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| InstallerError::Config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            cache_dir,
            staging_root: sdk_root.join(STAGING_DIR),
            policy: network.retry_policy(),
            timeout: network.download_timeout(),
            show_progress,
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Download `spec` into the cache, reusing a complete cached copy
    pub async fn fetch(&self, spec: &ArchiveSpec) -> Result<PathBuf> {
        let target = self.cache_dir.join(&spec.file_name);

        if target.is_file() {
            let intact = match spec.sha256 {
                Some(expected) => Self::verify_checksum(&target, expected).await?,
                None => true,
            };
            if intact {
                debug!("Using cached archive {:?}", target);
                return Ok(target);
            }
            warn!("Cached {:?} is corrupt, downloading again", target);
            remove_file_if_exists(&target).await?;
        }

        let target_ref = target.as_path();
        with_backoff(self.policy, &format!("download {}", spec.file_name), move |_| async move {
            match tokio::time::timeout(self.timeout, self.download_once(spec, target_ref)).await {
                Ok(result) => result,
                Err(_) => Err(InstallerError::Timeout(format!("download of {}", spec.url))),
            }
        })
        .await?;

        Ok(target)
    }

    async fn download_once(&self, spec: &ArchiveSpec, target: &Path) -> Result<()> {
        info!("Downloading {}", spec.url);
        let download_err = |message: String| InstallerError::Download {
            url: spec.url.clone(),
            message,
        };

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| InstallerError::io_at(&self.cache_dir, e))?;

        let response = self
            .client
            .get(&spec.url)
            .send()
            .await
            .map_err(|e| download_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(download_err(format!("HTTP {}", response.status())));
        }

        let total = response.content_length().unwrap_or(0);
        let progress = self.progress_bar(total, &spec.file_name);

        let part = target.with_file_name(format!("{}.part", spec.file_name));
        let mut file = tokio::fs::File::create(&part)
            .await
            .map_err(|e| InstallerError::io_at(&part, e))?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| download_err(e.to_string()))?;
            file.write_all(&chunk).await.map_err(|e| InstallerError::io_at(&part, e))?;
            progress.inc(chunk.len() as u64);
        }
        file.flush().await.map_err(|e| InstallerError::io_at(&part, e))?;
        drop(file);
        progress.finish_and_clear();

        if let Some(expected) = spec.sha256 {
            if !Self::verify_checksum(&part, expected).await? {
                remove_file_if_exists(&part).await?;
                return Err(download_err("checksum mismatch".into()));
            }
        }

        tokio::fs::rename(&part, target)
            .await
            .map_err(|e| InstallerError::io_at(target, e))?;
        debug!("Download complete: {:?}", target);
        Ok(())
    }

    fn progress_bar(&self, total: u64, name: &str) -> ProgressBar {
        if !self.show_progress || total == 0 {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::with_template("{msg} [{bar:40}] {bytes}/{total_bytes} ({eta})") {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(name.to_string());
        bar
    }

    /// Compare the SHA-256 of `path` with `expected` (hex)
    pub async fn verify_checksum(path: &Path, expected: &str) -> Result<bool> {
        let path = path.to_path_buf();
        let actual = tokio::task::spawn_blocking(move || -> Result<String> {
            let mut file = std::fs::File::open(&path).map_err(|e| InstallerError::io_at(&path, e))?;
            let mut hasher = Sha256::new();
            std::io::copy(&mut file, &mut hasher).map_err(|e| InstallerError::io_at(&path, e))?;
            Ok(hex::encode(hasher.finalize()))
        })
        .await
        .map_err(|e| InstallerError::Io(std::io::Error::other(e)))??;

        let matches = actual.eq_ignore_ascii_case(expected);
        if !matches {
            warn!("Checksum mismatch: expected {}, got {}", expected, actual);
        }
        Ok(matches)
    }

    /// Extract a zip archive into `target_dir`, refusing entries that escape it
    pub async fn extract_zip(archive: &Path, target_dir: &Path) -> Result<()> {
        debug!("Extracting {:?} to {:?}", archive, target_dir);
        let archive = archive.to_path_buf();
        let target_dir = target_dir.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let unpack_err = |message: String| InstallerError::Unpack {
                archive: archive.clone(),
                message,
            };

            let file = std::fs::File::open(&archive).map_err(|e| InstallerError::io_at(&archive, e))?;
            let mut zip = zip::ZipArchive::new(file).map_err(|e| unpack_err(e.to_string()))?;

            for i in 0..zip.len() {
                let mut entry = zip.by_index(i).map_err(|e| unpack_err(e.to_string()))?;
                let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
                    return Err(unpack_err(format!("unsafe entry name {:?}", entry.name())));
                };
                let outpath = target_dir.join(relative);

                if entry.is_dir() {
                    std::fs::create_dir_all(&outpath).map_err(|e| InstallerError::io_at(&outpath, e))?;
                    continue;
                }
                if let Some(parent) = outpath.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| InstallerError::io_at(parent, e))?;
                }
                let mut outfile = std::fs::File::create(&outpath).map_err(|e| InstallerError::io_at(&outpath, e))?;
                std::io::copy(&mut entry, &mut outfile).map_err(|e| unpack_err(format!("{}: {}", outpath.display(), e)))?;

                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    if let Some(mode) = entry.unix_mode() {
                        std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode)).ok();
                    }
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| InstallerError::Io(std::io::Error::other(e)))?
    }

    /// Download `spec` and install its root directory at `dest`.
    ///
    /// A corrupt archive is deleted and fetched once more before giving up.
    pub async fn install(&self, spec: &ArchiveSpec, dest: &Path) -> Result<()> {
        let archive = self.fetch(spec).await?;
        match self.unpack_into(spec, &archive, dest).await {
            Err(InstallerError::Unpack { message, .. }) => {
                warn!("Unpacking {} failed ({}), downloading again", spec.file_name, message);
                remove_file_if_exists(&archive).await?;
                let archive = self.fetch(spec).await?;
                self.unpack_into(spec, &archive, dest).await
            }
            other => other,
        }
    }

    async fn unpack_into(&self, spec: &ArchiveSpec, archive: &Path, dest: &Path) -> Result<()> {
        tokio::fs::create_dir_all(&self.staging_root)
            .await
            .map_err(|e| InstallerError::io_at(&self.staging_root, e))?;
        let staging = tempfile::Builder::new()
            .prefix("unpack-")
            .tempdir_in(&self.staging_root)
            .map_err(|e| InstallerError::io_at(&self.staging_root, e))?;

        Self::extract_zip(archive, staging.path()).await?;

        let staged = staging.path().join(&spec.root_dir);
        if !staged.is_dir() {
            return Err(InstallerError::Unpack {
                archive: archive.to_path_buf(),
                message: format!("archive has no top-level {}/ directory", spec.root_dir),
            });
        }

        // Anything already at `dest` is a leftover without its marker file
        if dest.exists() {
            tokio::fs::remove_dir_all(dest)
                .await
                .map_err(|e| InstallerError::io_at(dest, e))?;
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| InstallerError::io_at(parent, e))?;
        }
        tokio::fs::rename(&staged, dest)
            .await
            .map_err(|e| InstallerError::io_at(dest, e))?;

        info!("Installed {} to {:?}", spec.file_name, dest);
        Ok(())
    }

    /// Delete cached archives and/or staging leftovers. Installed components are never touched.
    pub async fn cleanup(sdk_root: &Path, cache_dir: &Path, remove_downloads: bool, remove_temp: bool) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();

        if remove_downloads {
            match tokio::fs::read_dir(cache_dir).await {
                Ok(mut entries) => {
                    while let Some(entry) = entries.next_entry().await.map_err(|e| InstallerError::io_at(cache_dir, e))? {
                        let path = entry.path();
                        let name = entry.file_name().to_string_lossy().to_string();
                        if path.is_file() && (name.ends_with(".zip") || name.ends_with(".part")) {
                            remove_file_if_exists(&path).await?;
                            removed.push(path);
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(InstallerError::io_at(cache_dir, e)),
            }
        }

        let staging = sdk_root.join(STAGING_DIR);
        if remove_temp && staging.exists() {
            tokio::fs::remove_dir_all(&staging)
                .await
                .map_err(|e| InstallerError::io_at(&staging, e))?;
            removed.push(staging);
        }

        info!("Cleanup removed {} entries", removed.len());
        Ok(removed)
    }
}

async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(InstallerError::io_at(path, e)),
    }
}

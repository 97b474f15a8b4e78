//! CLI commands for droidup
//!
//! Each command maps onto one library operation. Results go to stdout, as
//! text or as JSON when `--json` is set; diagnostics go through `tracing`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use droidup_android_toolchain::{
    AvdRequest, Downloader, EnvExporter, ExportFormat, HostArch, InstallerPlan, NdkResolver, NdkSpec,
};
use droidup_core::InstallerConfig;
use droidup_emulator_bridge::{AvdBackend, AvdManager};

use crate::cli::{AvdAction, NdkAction, TargetArgs};
use crate::installer::{AndroidInstaller, InstallRequest, InstallerResult};

/// Settings shared by every command
#[derive(Debug, Clone)]
pub struct Session {
    pub config: InstallerConfig,
    pub sdk_root: PathBuf,
    pub json: bool,
}

impl Session {
    /// Load the config file (or defaults) and settle the SDK root
    pub async fn load(config_path: Option<&Path>, sdk_root: Option<&Path>, json: bool) -> Result<Self> {
        let config = match config_path {
            Some(path) => InstallerConfig::load_from(path).await?,
            None => InstallerConfig::load().await?,
        };
        let sdk_root = config.resolve_sdk_root(sdk_root)?;
        info!("SDK root: {:?}", sdk_root);
        Ok(Self { config, sdk_root, json })
    }

    fn installer(&self, dry_run: bool) -> Result<AndroidInstaller> {
        Ok(AndroidInstaller::new(self.config.clone(), Some(&self.sdk_root), dry_run)?)
    }

    fn avd_manager(&self) -> AvdManager {
        AvdManager::new(&self.sdk_root, self.config.tools.command_timeout())
    }

    fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// Turn command-line target flags into an install request
pub fn build_request(args: &TargetArgs, config: &InstallerConfig) -> Result<InstallRequest> {
    let abi = args.abi.unwrap_or_else(|| HostArch::current().native_abi());
    let mut request = InstallRequest::new(args.api, args.target, abi);

    if let Some(ndk) = &args.ndk {
        request = request.with_ndk(NdkSpec::parse(ndk)?);
    }
    match &args.build_tools {
        Some(Some(version)) => request = request.with_build_tools(version.as_str()),
        Some(None) => request = request.with_build_tools(config.defaults.build_tools.as_str()),
        None => {}
    }
    if args.emulator {
        request = request.with_emulator();
    }
    if let Some(name) = &args.avd {
        request = request.with_avd(AvdRequest {
            name: name.clone(),
            device: args.device.clone().unwrap_or_else(|| config.defaults.device.clone()),
            force: args.force,
        });
    }
    Ok(request)
}

/// Ensure command options
pub struct EnsureCommand {
    pub request: InstallRequest,
    pub dry_run: bool,
    pub accept_licenses: bool,
    pub print_env: Option<ExportFormat>,
}

impl EnsureCommand {
    /// Execute the ensure command
    pub async fn execute(&self, session: &Session) -> Result<InstallerResult> {
        let mut session = session.clone();
        session.config.accept_licenses |= self.accept_licenses;
        let installer = session.installer(self.dry_run)?;

        let token = installer.cancellation_token();
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping after the current step");
                token.cancel();
            }
        });

        let outcome = installer.ensure(&self.request).await;
        ctrl_c.abort();
        let result = outcome?;

        if session.json {
            session.print_json(&result)?;
        } else {
            print_result(&result);
        }
        if let Some(format) = self.print_env {
            print!("{}", result.env().render(format));
        }
        Ok(result)
    }
}

fn print_result(result: &InstallerResult) {
    let verb = if result.dry_run { "Would run" } else { "Ran" };
    let steps = if result.dry_run {
        &result.simulated_steps
    } else {
        &result.performed_steps
    };
    println!("{} {} step(s) in {}", verb, steps.len(), result.sdk_root.display());
    for step in steps {
        println!("  {}", step.description);
    }
    if result.cancelled {
        println!("Cancelled before the plan finished");
    }
    if let Some(ndk) = &result.ndk_path {
        println!("NDK: {}", ndk.display());
    }
    print_verification(&result.verification);
}

fn print_verification(report: &BTreeMap<String, bool>) {
    for (key, present) in report {
        println!("  [{}] {}", if *present { "ok" } else { "missing" }, key);
    }
}

/// Plan command options
pub struct PlanCommand {
    pub request: InstallRequest,
}

impl PlanCommand {
    /// Print the plan without executing it
    pub async fn execute(&self, session: &Session) -> Result<InstallerPlan> {
        let installer = session.installer(true)?;
        let plan = installer.plan(&self.request).await?;

        if session.json {
            session.print_json(&plan)?;
        } else if plan.is_empty() {
            println!("Nothing to do");
        } else {
            for (index, step) in plan.steps.iter().enumerate() {
                println!("{:>2}. {} (~{} MiB)", index + 1, step.description, step.estimated_bytes / (1024 * 1024));
            }
            for warning in &plan.warnings {
                println!("warning: {}", warning);
            }
        }
        Ok(plan)
    }
}

/// Verify command options
pub struct VerifyCommand {
    pub request: InstallRequest,
}

impl VerifyCommand {
    /// Returns whether everything requested is present
    pub async fn execute(&self, session: &Session) -> Result<bool> {
        let installer = session.installer(false)?;
        let report = installer.verify(&self.request).await?;

        if session.json {
            session.print_json(&report)?;
        } else {
            print_verification(&report);
        }
        Ok(report.values().all(|present| *present))
    }
}

/// Env command options
pub struct EnvCommand {
    pub format: ExportFormat,
    pub ndk: Option<String>,
    pub output: Option<PathBuf>,
}

impl EnvCommand {
    /// Render (or write) the environment for the SDK root
    pub async fn execute(&self, session: &Session) -> Result<()> {
        let ndk_path = match &self.ndk {
            Some(spec) => Some(NdkResolver::require_installed(&NdkSpec::parse(spec)?, &session.sdk_root)?),
            None => None,
        };
        let exporter = EnvExporter::new(&session.sdk_root, ndk_path);

        if let Some(path) = &self.output {
            exporter.write_script(path, self.format).await?;
            info!("Wrote {} environment to {:?}", self.format, path);
        } else if session.json {
            session.print_json(&exporter.vars())?;
        } else {
            print!("{}", exporter.render(self.format));
            if self.format == ExportFormat::Github {
                eprintln!("# append to $GITHUB_PATH:");
                eprint!("{}", exporter.render_github_path());
            }
        }
        Ok(())
    }
}

/// AVD management command
pub struct AvdCommand {
    pub action: AvdAction,
}

impl AvdCommand {
    pub async fn execute(&self, session: &Session) -> Result<()> {
        let avds = session.avd_manager();
        match &self.action {
            AvdAction::List => {
                let names = avds.list().await?;
                if session.json {
                    session.print_json(&names)?;
                } else if names.is_empty() {
                    println!("No AVDs in {:?}", avds.avd_home());
                } else {
                    for name in names {
                        println!("{}", name);
                    }
                }
            }
            AvdAction::Info { name } => {
                let info = avds.get_info(name).await?;
                if session.json {
                    session.print_json(&info)?;
                } else {
                    println!("Name:         {}", info.name);
                    println!("Path:         {}", info.path.display());
                    println!("Target:       {}", info.target.as_deref().unwrap_or("-"));
                    println!("Tag/ABI:      {}/{}", info.tag.as_deref().unwrap_or("-"), info.abi.as_deref().unwrap_or("-"));
                    println!("Device:       {}", info.device_name.as_deref().unwrap_or("-"));
                    if let Some(ram) = info.ram_size_mb {
                        println!("RAM:          {} MB", ram);
                    }
                }
            }
            AvdAction::Delete { name } => {
                let removed = avds.delete(name).await?;
                if session.json {
                    session.print_json(&serde_json::json!({ "name": name, "removed": removed }))?;
                } else if removed {
                    println!("Deleted {}", name);
                } else {
                    println!("{} does not exist", name);
                }
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct NdkListing {
    installed: Vec<InstalledNdk>,
    aliases: BTreeMap<&'static str, &'static str>,
}

#[derive(Serialize)]
struct InstalledNdk {
    version: String,
    path: PathBuf,
}

/// NDK inspection command
pub struct NdkCommand {
    pub action: NdkAction,
}

impl NdkCommand {
    pub async fn execute(&self, session: &Session) -> Result<()> {
        match &self.action {
            NdkAction::List => {
                let installed = NdkResolver::list_installed(&session.sdk_root).await?;
                let mut aliases = BTreeMap::new();
                for alias in NdkResolver::known_aliases() {
                    aliases.insert(alias, NdkResolver::canonical_version(alias)?);
                }

                if session.json {
                    let listing = NdkListing {
                        installed: installed
                            .into_iter()
                            .map(|(version, path)| InstalledNdk { version, path })
                            .collect(),
                        aliases,
                    };
                    session.print_json(&listing)?;
                } else {
                    println!("Installed:");
                    if installed.is_empty() {
                        println!("  (none)");
                    }
                    for (version, path) in &installed {
                        println!("  {:<16} {}", version, path.display());
                    }
                    println!("Aliases:");
                    for (alias, version) in &aliases {
                        println!("  {:<8} {}", alias, version);
                    }
                }
            }
            NdkAction::Resolve { spec } => {
                let spec = NdkSpec::parse(spec)?;
                let resolved = NdkResolver::resolve(&spec, &session.sdk_root)
                    .with_context(|| format!("cannot resolve NDK {}", spec))?;
                if session.json {
                    session.print_json(&resolved)?;
                } else {
                    let state = if resolved.installed { "installed" } else { "not installed" };
                    println!("{} ({})", resolved.path.display(), state);
                }
            }
        }
        Ok(())
    }
}

/// Cleanup command options
pub struct CleanupCommand {
    pub remove_downloads: bool,
    pub remove_temp: bool,
    pub dry_run: bool,
}

impl CleanupCommand {
    pub async fn execute(&self, session: &Session) -> Result<Vec<PathBuf>> {
        let cache_dir = session.config.resolve_cache_dir(&session.sdk_root);
        let removed = if self.dry_run {
            info!("[dry-run] would clean {:?} and staging under {:?}", cache_dir, session.sdk_root);
            Vec::new()
        } else {
            Downloader::cleanup(&session.sdk_root, &cache_dir, self.remove_downloads, self.remove_temp).await?
        };

        if session.json {
            session.print_json(&removed)?;
        } else {
            println!("Removed {} item(s)", removed.len());
            for path in &removed {
                println!("  {}", path.display());
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use droidup_core::{Abi, SystemImageTarget};

    use crate::cli::{Cli, Command};

    fn target_of(args: &[&str]) -> TargetArgs {
        match Cli::try_parse_from(args).unwrap().command {
            Command::Plan { target } => target,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_request_from_flags() {
        let config = InstallerConfig::default();
        let args = target_of(&[
            "droidup", "plan", "--api", "30", "--target", "google_atd", "--abi", "arm64-v8a", "--ndk", "r26d",
            "--build-tools", "--avd", "t1",
        ]);
        let request = build_request(&args, &config).unwrap();

        assert_eq!(request.api_level, 30);
        assert_eq!(request.target, SystemImageTarget::GoogleAtd);
        assert_eq!(request.arch, Abi::Arm64V8a);
        assert_eq!(request.ndk, Some(NdkSpec::Alias("r26d".to_string())));
        assert_eq!(request.build_tools.as_deref(), Some("34.0.0"));
        let avd = request.create_avd.unwrap();
        assert_eq!(avd.name, "t1");
        assert_eq!(avd.device, "pixel_6");
        assert!(!avd.force);
    }

    #[test]
    fn test_abi_defaults_to_host() {
        let config = InstallerConfig::default();
        let request = build_request(&target_of(&["droidup", "plan", "--api", "34"]), &config).unwrap();
        assert_eq!(request.arch, HostArch::current().native_abi());
        assert_eq!(request.ndk, None);
        assert_eq!(request.build_tools, None);
    }

    #[test]
    fn test_relative_ndk_path_is_rejected() {
        let config = InstallerConfig::default();
        let args = target_of(&["droidup", "plan", "--api", "34", "--ndk", "some/relative/ndk"]);
        assert!(build_request(&args, &config).is_err());
    }

    #[tokio::test]
    async fn test_cleanup_on_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session {
            config: InstallerConfig::default(),
            sdk_root: dir.path().to_path_buf(),
            json: true,
        };
        let removed = CleanupCommand {
            remove_downloads: true,
            remove_temp: true,
            dry_run: false,
        }
        .execute(&session)
        .await
        .unwrap();
        assert!(removed.is_empty());
    }
}

//! Android Installer
//!
//! Top-level façade: detect the host, scan the SDK root, plan, execute the
//! plan step by step, resolve the NDK and verify the result.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use droidup_android_toolchain::{
    build_plan, required_components, ComponentInventory, Downloader, EnsureOutcome, EnvExporter, HostDetector, InstallerPlan,
    NdkResolver, NdkSpec, PlanAction, PlanStep, SdkBackend, SdkManager,
};
use droidup_core::{
    CancellationToken, EventBus, InstallState, InstallerConfig, InstallerError, Lifecycle, Result, StepLog, StepRecord, StepStatus,
};
use droidup_emulator_bridge::{AvdBackend, AvdConfig, AvdManager, AvdOutcome};

pub use droidup_android_toolchain::DesiredState as InstallRequest;

/// Outcome of a successful (or cancelled) [`AndroidInstaller::ensure`]
#[derive(Debug, Clone, Serialize)]
pub struct InstallerResult {
    pub sdk_root: PathBuf,
    pub ndk_path: Option<PathBuf>,
    pub avd_created: bool,
    /// Steps that changed the filesystem
    pub performed_steps: Vec<PlanStep>,
    /// Steps only described because of dry-run
    pub simulated_steps: Vec<PlanStep>,
    pub plan: InstallerPlan,
    pub cancelled: bool,
    pub dry_run: bool,
    /// Post-run presence check, keyed like plan steps
    pub verification: BTreeMap<String, bool>,
}

impl InstallerResult {
    /// Environment for the installed toolchain
    pub fn env(&self) -> EnvExporter {
        EnvExporter::new(&self.sdk_root, self.ndk_path.clone())
    }
}

/// A failed run: the error plus whatever had already been done
#[derive(Debug, thiserror::Error)]
#[error("{error} ({} step(s) completed before the failure)", .performed_steps.len())]
pub struct InstallFailure {
    #[source]
    pub error: InstallerError,
    pub performed_steps: Vec<PlanStep>,
    /// `None` when the run failed before a plan existed
    pub plan: Option<InstallerPlan>,
}

impl InstallFailure {
    fn new(error: InstallerError, performed_steps: Vec<PlanStep>, plan: Option<InstallerPlan>) -> Self {
        Self {
            error,
            performed_steps,
            plan,
        }
    }
}

impl From<InstallerError> for InstallFailure {
    fn from(error: InstallerError) -> Self {
        Self::new(error, Vec::new(), None)
    }
}

/// Android toolchain installer
pub struct AndroidInstaller {
    config: InstallerConfig,
    sdk_root: PathBuf,
    sdk: Box<dyn SdkBackend>,
    avds: Box<dyn AvdBackend>,
    lifecycle: Lifecycle,
    dry_run: bool,
}

impl AndroidInstaller {
    /// Installer backed by the vendor `sdkmanager`/`avdmanager`
    pub fn new(config: InstallerConfig, sdk_root: Option<&Path>, dry_run: bool) -> Result<Self> {
        let sdk_root = config.resolve_sdk_root(sdk_root)?;
        let sdk = SdkManager::new(&sdk_root, &config)?.with_dry_run(dry_run);
        let avds = AvdManager::new(&sdk_root, config.tools.command_timeout()).with_dry_run(dry_run);
        Self::with_backends(config, sdk_root, Box::new(sdk), Box::new(avds), dry_run)
    }

    /// Installer with caller-supplied backends
    pub fn with_backends(
        config: InstallerConfig,
        sdk_root: PathBuf,
        sdk: Box<dyn SdkBackend>,
        avds: Box<dyn AvdBackend>,
        dry_run: bool,
    ) -> Result<Self> {
        let step_log = config.step_log.as_deref().map(StepLog::open).transpose()?;
        Ok(Self {
            config,
            sdk_root,
            sdk,
            avds,
            lifecycle: Lifecycle::new(step_log),
            dry_run,
        })
    }

    pub fn sdk_root(&self) -> &Path {
        &self.sdk_root
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn state(&self) -> InstallState {
        self.lifecycle.state()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.lifecycle.event_bus()
    }

    /// Cancel from another task; checked between steps
    pub fn cancellation_token(&self) -> CancellationToken {
        self.lifecycle.cancellation_token()
    }

    /// Detect, scan and plan without executing anything
    pub async fn plan(&self, request: &InstallRequest) -> Result<InstallerPlan> {
        self.lifecycle.set_state(InstallState::Detecting);
        let host = HostDetector::detect(&self.sdk_root).await;

        self.lifecycle.set_state(InstallState::Planning);
        // A user-supplied NDK is never installed, so a bad path fails before any download
        if let Some(spec @ NdkSpec::Path(_)) = &request.ndk {
            if !self.dry_run {
                NdkResolver::resolve(spec, &self.sdk_root)?;
            }
        }
        let avds = match self.avds.list().await {
            Ok(avds) => avds,
            Err(e) if self.dry_run => {
                self.lifecycle.warn(format!("cannot list AVDs: {}", e));
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        let inventory = ComponentInventory::scan(&self.sdk_root).await?.with_avds(avds);
        let plan = build_plan(request, &host, &inventory)?;

        for warning in &plan.warnings {
            self.lifecycle.warn(warning.clone());
        }
        info!(
            "Plan: {} step(s), about {} MiB to download",
            plan.len(),
            droidup_android_toolchain::estimate_size(&plan) / (1024 * 1024)
        );
        Ok(plan)
    }

    /// Bring the SDK root to the requested state
    pub async fn ensure(&self, request: &InstallRequest) -> std::result::Result<InstallerResult, InstallFailure> {
        let plan = match self.plan(request).await {
            Ok(plan) => plan,
            Err(error) => {
                self.lifecycle.set_state(InstallState::Failed);
                return Err(error.into());
            }
        };

        let mut result = InstallerResult {
            sdk_root: self.sdk_root.clone(),
            ndk_path: None,
            avd_created: false,
            performed_steps: Vec::new(),
            simulated_steps: Vec::new(),
            plan: plan.clone(),
            cancelled: false,
            dry_run: self.dry_run,
            verification: BTreeMap::new(),
        };

        let total = plan.len();
        let mut licenses_checked = false;
        for (index, step) in plan.steps.iter().enumerate() {
            if self.lifecycle.is_cancelled() {
                info!("Cancelled before step {}/{}", index + 1, total);
                self.lifecycle.record_step(StepRecord::new(
                    step.idempotency_key.as_str(),
                    StepStatus::Cancelled,
                    0,
                    "cancelled before start",
                ));
                self.lifecycle.set_state(InstallState::Cancelled);
                result.cancelled = true;
                return Ok(result);
            }

            self.lifecycle.set_state(InstallState::Executing { step: index + 1, total });

            if self.dry_run {
                self.lifecycle.record_step(StepRecord::new(
                    step.idempotency_key.as_str(),
                    StepStatus::Simulated,
                    0,
                    step.description.as_str(),
                ));
                result.simulated_steps.push(step.clone());
                continue;
            }

            if self.config.accept_licenses && !licenses_checked && needs_sdkmanager(step) {
                licenses_checked = true;
                if let Err(error) = self.accept_licenses().await {
                    self.lifecycle.set_state(InstallState::Failed);
                    return Err(InstallFailure::new(error, result.performed_steps, Some(result.plan)));
                }
            }

            match self.execute_step(step).await {
                Ok(true) => {
                    if matches!(step.action, PlanAction::CreateAvd { .. }) {
                        result.avd_created = true;
                    }
                    result.performed_steps.push(step.clone());
                }
                Ok(false) => {}
                Err(error) => {
                    self.lifecycle.set_state(InstallState::Failed);
                    return Err(InstallFailure::new(error, result.performed_steps, Some(result.plan)));
                }
            }
        }

        match self.resolve_ndk_path(request) {
            Ok(path) => result.ndk_path = path,
            Err(error) => {
                self.lifecycle.set_state(InstallState::Failed);
                return Err(InstallFailure::new(error, result.performed_steps, Some(result.plan)));
            }
        }

        self.lifecycle.set_state(InstallState::Verifying);
        match self.verify(request).await {
            Ok(verification) => result.verification = verification,
            Err(error) => {
                self.lifecycle.set_state(InstallState::Failed);
                return Err(InstallFailure::new(error, result.performed_steps, Some(result.plan)));
            }
        }

        self.lifecycle.set_state(InstallState::Done);
        info!(
            "Done: {} step(s) performed, {} simulated",
            result.performed_steps.len(),
            result.simulated_steps.len()
        );
        Ok(result)
    }

    /// Run one step; `Ok(true)` when it changed the filesystem
    async fn execute_step(&self, step: &PlanStep) -> Result<bool> {
        let key = step.idempotency_key.as_str();
        self.lifecycle
            .record_step(StepRecord::new(key, StepStatus::Started, 0, step.description.as_str()));
        let started = Instant::now();

        let outcome = match &step.action {
            PlanAction::Install(kind) => self.sdk.ensure(kind).await.map(|outcome| match outcome {
                EnsureOutcome::Installed => StepStatus::Performed,
                EnsureOutcome::AlreadyPresent => StepStatus::Satisfied,
                EnsureOutcome::Simulated => StepStatus::Simulated,
            }),
            PlanAction::CreateAvd { request, system_image } => {
                let config = AvdConfig::new(request.name.as_str(), *system_image, request.device.as_str())
                    .forced(request.force);
                self.avds.create(&config).await.map(|outcome| match outcome {
                    AvdOutcome::Created => StepStatus::Performed,
                    AvdOutcome::AlreadyExists => StepStatus::Satisfied,
                    AvdOutcome::Simulated => StepStatus::Simulated,
                })
            }
        };
        let elapsed = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(status) => {
                self.lifecycle
                    .record_step(StepRecord::new(key, status, elapsed, step.description.as_str()));
                Ok(status == StepStatus::Performed)
            }
            Err(error) => {
                self.lifecycle
                    .record_step(StepRecord::new(key, StepStatus::Failed, elapsed, error.to_string()));
                Err(error)
            }
        }
    }

    async fn accept_licenses(&self) -> Result<()> {
        let started = Instant::now();
        let outcome = self.sdk.accept_licenses().await;
        let elapsed = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(outcome) => {
                let status = match outcome {
                    EnsureOutcome::Installed => StepStatus::Performed,
                    EnsureOutcome::AlreadyPresent => StepStatus::Satisfied,
                    EnsureOutcome::Simulated => StepStatus::Simulated,
                };
                self.lifecycle
                    .record_step(StepRecord::new("licenses", status, elapsed, "accept SDK licenses"));
                Ok(())
            }
            Err(error) => {
                self.lifecycle
                    .record_step(StepRecord::new("licenses", StepStatus::Failed, elapsed, error.to_string()));
                Err(error)
            }
        }
    }

    /// NDK path for the result. Dry-run downgrades a missing explicit path to a warning.
    fn resolve_ndk_path(&self, request: &InstallRequest) -> Result<Option<PathBuf>> {
        let Some(spec) = &request.ndk else {
            return Ok(None);
        };

        match NdkResolver::resolve(spec, &self.sdk_root) {
            Ok(resolved) if resolved.installed || self.dry_run => Ok(Some(resolved.path)),
            Ok(resolved) => Err(InstallerError::ComponentNotFound(format!(
                "NDK {} missing at {} after installation",
                spec,
                resolved.path.display()
            ))),
            Err(InstallerError::ComponentNotFound(message)) if self.dry_run => {
                self.lifecycle.warn(format!("NDK not found: {}", message));
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Re-scan the filesystem and report each requested component
    pub async fn verify(&self, request: &InstallRequest) -> Result<BTreeMap<String, bool>> {
        let inventory = ComponentInventory::scan(&self.sdk_root).await?;
        let mut report: BTreeMap<String, bool> = required_components(request)?
            .into_iter()
            .map(|kind| {
                let present = inventory.contains(&kind);
                (kind.to_string(), present)
            })
            .collect();

        if let Some(NdkSpec::Path(path)) = &request.ndk {
            let present = NdkResolver::require_installed(&NdkSpec::Path(path.clone()), &self.sdk_root).is_ok();
            report.insert(format!("ndk:{}", path.display()), present);
        }

        if let Some(avd) = &request.create_avd {
            let present = self.avds.list().await?.iter().any(|name| name == &avd.name);
            report.insert(format!("avd:{}", avd.name), present);
        }

        debug!("Verification: {:?}", report);
        Ok(report)
    }

    /// Delete cached archives and staging leftovers; installed components stay
    pub async fn cleanup(&self, remove_downloads: bool, remove_temp: bool) -> Result<Vec<PathBuf>> {
        if self.dry_run {
            info!("[dry-run] would clean downloads={} temp={}", remove_downloads, remove_temp);
            return Ok(Vec::new());
        }
        let cache_dir = self.config.resolve_cache_dir(&self.sdk_root);
        Downloader::cleanup(&self.sdk_root, &cache_dir, remove_downloads, remove_temp).await
    }
}

/// Whether the step goes through sdkmanager and so needs accepted licenses
fn needs_sdkmanager(step: &PlanStep) -> bool {
    !matches!(
        step.action,
        PlanAction::Install(droidup_android_toolchain::ComponentKind::CmdlineTools)
    )
}

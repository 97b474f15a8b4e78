//! End-to-end runs of the installer against fake package and AVD backends.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use droidup::installer::{AndroidInstaller, InstallRequest};
use droidup::toolchain::{AvdRequest, ComponentKind, EnsureOutcome, NdkSpec, SdkBackend};
use droidup::base::{
    Abi, Event, InstallState, InstallerConfig, InstallerError, Result, SystemImageSpec, SystemImageTarget,
};
use droidup::emulator::{AvdBackend, AvdConfig, AvdInfo, AvdOutcome};

/// Installs a component by writing its marker file
#[derive(Clone)]
struct FakeSdk {
    root: PathBuf,
    installed: Arc<Mutex<Vec<String>>>,
    licenses: Arc<AtomicUsize>,
    fail_on: Option<ComponentKind>,
}

impl FakeSdk {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            installed: Arc::new(Mutex::new(Vec::new())),
            licenses: Arc::new(AtomicUsize::new(0)),
            fail_on: None,
        }
    }

    fn failing_on(mut self, kind: ComponentKind) -> Self {
        self.fail_on = Some(kind);
        self
    }

    fn installs(&self) -> Vec<String> {
        self.installed.lock().unwrap().clone()
    }

    fn put(&self, kind: ComponentKind) -> Result<EnsureOutcome> {
        if self.fail_on.as_ref() == Some(&kind) {
            return Err(InstallerError::SdkManager {
                package: kind.package_id(),
                exit_code: Some(1),
                output: "Warning: Failed to find package".to_string(),
            });
        }
        let marker = kind.marker(&self.root);
        if marker.is_file() {
            return Ok(EnsureOutcome::AlreadyPresent);
        }
        std::fs::create_dir_all(marker.parent().unwrap())?;
        std::fs::write(&marker, "Pkg.Revision=1.0.0\n")?;
        self.installed.lock().unwrap().push(kind.to_string());
        Ok(EnsureOutcome::Installed)
    }
}

#[async_trait]
impl SdkBackend for FakeSdk {
    fn sdk_root(&self) -> &Path {
        &self.root
    }

    async fn ensure_cmdline_tools(&self) -> Result<EnsureOutcome> {
        self.put(ComponentKind::CmdlineTools)
    }

    async fn ensure_platform_tools(&self) -> Result<EnsureOutcome> {
        self.put(ComponentKind::PlatformTools)
    }

    async fn ensure_platform(&self, api_level: u32) -> Result<EnsureOutcome> {
        self.put(ComponentKind::Platform(api_level))
    }

    async fn ensure_system_image(&self, spec: &SystemImageSpec) -> Result<EnsureOutcome> {
        self.put(ComponentKind::SystemImage(*spec))
    }

    async fn ensure_emulator(&self) -> Result<EnsureOutcome> {
        self.put(ComponentKind::Emulator)
    }

    async fn ensure_build_tools(&self, version: &str) -> Result<EnsureOutcome> {
        self.put(ComponentKind::BuildTools(version.to_string()))
    }

    async fn ensure_ndk(&self, version: &str) -> Result<EnsureOutcome> {
        self.put(ComponentKind::Ndk(version.to_string()))
    }

    async fn accept_licenses(&self) -> Result<EnsureOutcome> {
        self.licenses.fetch_add(1, Ordering::SeqCst);
        Ok(EnsureOutcome::Installed)
    }

    async fn list_installed(&self) -> Result<Vec<String>> {
        Ok(self.installs())
    }
}

/// Keeps AVDs in memory
#[derive(Clone, Default)]
struct FakeAvds {
    avds: Arc<Mutex<BTreeMap<String, AvdConfig>>>,
    creations: Arc<AtomicUsize>,
}

#[async_trait]
impl AvdBackend for FakeAvds {
    async fn create(&self, config: &AvdConfig) -> Result<AvdOutcome> {
        let mut avds = self.avds.lock().unwrap();
        if avds.contains_key(&config.name) && !config.force {
            return Ok(AvdOutcome::AlreadyExists);
        }
        avds.insert(config.name.clone(), config.clone());
        self.creations.fetch_add(1, Ordering::SeqCst);
        Ok(AvdOutcome::Created)
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.avds.lock().unwrap().keys().cloned().collect())
    }

    async fn get_info(&self, name: &str) -> Result<AvdInfo> {
        Err(InstallerError::AvdManager(format!("no info for {}", name)))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.avds.lock().unwrap().remove(name).is_some())
    }
}

fn installer(root: &Path, sdk: &FakeSdk, avds: &FakeAvds, dry_run: bool) -> AndroidInstaller {
    installer_with(InstallerConfig::default(), root, sdk, avds, dry_run)
}

fn installer_with(
    config: InstallerConfig,
    root: &Path,
    sdk: &FakeSdk,
    avds: &FakeAvds,
    dry_run: bool,
) -> AndroidInstaller {
    AndroidInstaller::with_backends(
        config,
        root.to_path_buf(),
        Box::new(sdk.clone()),
        Box::new(avds.clone()),
        dry_run,
    )
    .unwrap()
}

/// api 30, google_atd, arm64-v8a, NDK r26d, no AVD
fn scenario() -> InstallRequest {
    InstallRequest::new(30, SystemImageTarget::GoogleAtd, Abi::Arm64V8a).with_ndk(NdkSpec::alias("r26d").unwrap())
}

/// Every file under `root` with its contents
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(dir: &Path, root: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
        let Ok(entries) = std::fs::read_dir(dir) else { return };
        for entry in entries {
            let path = entry.unwrap().path();
            let relative = path.strip_prefix(root).unwrap().to_path_buf();
            if path.is_dir() {
                out.insert(relative, Vec::new());
                walk(&path, root, out);
            } else {
                out.insert(relative, std::fs::read(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

#[tokio::test]
async fn scenario_installs_five_steps_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let sdk = FakeSdk::new(dir.path());
    let avds = FakeAvds::default();
    let installer = installer(dir.path(), &sdk, &avds, false);

    let result = installer.ensure(&scenario()).await.unwrap();

    let keys: Vec<&str> = result.performed_steps.iter().map(|s| s.idempotency_key.as_str()).collect();
    assert_eq!(
        keys,
        vec![
            "cmdline-tools",
            "platform-tools",
            "platform:30",
            "system-image:android-30;google_atd;arm64-v8a",
            "ndk:26.3.11579264",
        ]
    );
    assert_eq!(result.plan.len(), 5);
    assert!(result.simulated_steps.is_empty());
    assert!(!result.cancelled);
    assert!(!result.avd_created);
    assert_eq!(installer.state(), InstallState::Done);

    let ndk = result.ndk_path.clone().unwrap();
    assert!(ndk.ends_with("26.3.11579264"));
    assert_eq!(ndk, dir.path().join("ndk").join("26.3.11579264"));

    assert_eq!(result.verification.len(), 5);
    assert!(result.verification.values().all(|present| *present));

    let vars = result.env().vars();
    assert_eq!(vars["ANDROID_NDK_HOME"], ndk.display().to_string());
    assert_eq!(vars["ANDROID_SDK_ROOT"], dir.path().display().to_string());
}

#[tokio::test]
async fn second_run_performs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let sdk = FakeSdk::new(dir.path());
    let avds = FakeAvds::default();

    let first = installer(dir.path(), &sdk, &avds, false).ensure(&scenario()).await.unwrap();
    assert_eq!(first.performed_steps.len(), 5);

    let second = installer(dir.path(), &sdk, &avds, false).ensure(&scenario()).await.unwrap();
    assert!(second.plan.is_empty());
    assert!(second.performed_steps.is_empty());
    assert_eq!(second.ndk_path, first.ndk_path);
    assert_eq!(sdk.installs().len(), 5);
}

#[tokio::test]
async fn dry_run_leaves_the_filesystem_untouched() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("platforms").join("android-29")).unwrap();
    std::fs::write(dir.path().join("platforms").join("android-29").join("source.properties"), "Pkg.Revision=5\n").unwrap();
    let before = snapshot(dir.path());

    let sdk = FakeSdk::new(dir.path());
    let avds = FakeAvds::default();
    let installer = installer(dir.path(), &sdk, &avds, true);

    let planned = installer.plan(&scenario()).await.unwrap();
    let result = installer.ensure(&scenario()).await.unwrap();

    assert!(result.dry_run);
    assert!(result.performed_steps.is_empty());
    assert_eq!(result.simulated_steps.len(), planned.len());
    assert_eq!(result.plan.len(), 5);
    assert!(sdk.installs().is_empty());
    assert_eq!(sdk.licenses.load(Ordering::SeqCst), 0);
    assert_eq!(snapshot(dir.path()), before);
}

#[tokio::test]
async fn verify_reports_missing_then_present() {
    let dir = tempfile::tempdir().unwrap();
    let sdk = FakeSdk::new(dir.path());
    let avds = FakeAvds::default();
    let installer = installer(dir.path(), &sdk, &avds, false);

    let before = installer.verify(&scenario()).await.unwrap();
    assert_eq!(before.len(), 5);
    assert!(before.values().all(|present| !*present));

    installer.ensure(&scenario()).await.unwrap();

    let after = installer.verify(&scenario()).await.unwrap();
    assert!(after["cmdline-tools"]);
    assert!(after["platform-tools"]);
    assert!(after["platform:30"]);
    assert!(after["system-image:android-30;google_atd;arm64-v8a"]);
    assert!(after["ndk:26.3.11579264"]);
}

#[tokio::test]
async fn unpublished_image_is_rejected_before_any_work() {
    let dir = tempfile::tempdir().unwrap();
    let sdk = FakeSdk::new(dir.path());
    let avds = FakeAvds::default();
    let request = InstallRequest::new(21, SystemImageTarget::GoogleApisPlaystore, Abi::X86);

    for dry_run in [false, true] {
        let failure = installer(dir.path(), &sdk, &avds, dry_run).ensure(&request).await.unwrap_err();
        assert!(matches!(failure.error, InstallerError::InvalidArgument(_)));
        assert!(failure.performed_steps.is_empty());
        assert!(failure.plan.is_none());
    }
    assert!(sdk.installs().is_empty());
}

#[tokio::test]
async fn avd_is_created_once() {
    let dir = tempfile::tempdir().unwrap();
    let sdk = FakeSdk::new(dir.path());
    let avds = FakeAvds::default();
    let request = InstallRequest::new(33, SystemImageTarget::GoogleApis, Abi::X86_64).with_avd(AvdRequest {
        name: "t1".to_string(),
        device: "pixel_6".to_string(),
        force: false,
    });

    let first = installer(dir.path(), &sdk, &avds, false).ensure(&request).await.unwrap();
    assert!(first.avd_created);
    assert_eq!(first.performed_steps.last().unwrap().idempotency_key, "avd:t1");
    assert!(first.performed_steps.iter().any(|s| s.idempotency_key == "emulator"));
    assert!(first.verification["avd:t1"]);

    let created = avds.avds.lock().unwrap()["t1"].clone();

    let second = installer(dir.path(), &sdk, &avds, false).ensure(&request).await.unwrap();
    assert!(!second.avd_created);
    assert!(second.performed_steps.is_empty());
    assert_eq!(avds.creations.load(Ordering::SeqCst), 1);
    assert_eq!(avds.avds.lock().unwrap()["t1"], created);
}

#[tokio::test]
async fn forced_avd_is_recreated() {
    let dir = tempfile::tempdir().unwrap();
    let sdk = FakeSdk::new(dir.path());
    let avds = FakeAvds::default();
    let request = InstallRequest::new(33, SystemImageTarget::GoogleApis, Abi::X86_64).with_avd(AvdRequest {
        name: "t1".to_string(),
        device: "pixel_6".to_string(),
        force: true,
    });

    installer(dir.path(), &sdk, &avds, false).ensure(&request).await.unwrap();
    let second = installer(dir.path(), &sdk, &avds, false).ensure(&request).await.unwrap();

    assert_eq!(second.performed_steps.len(), 1);
    assert!(second.avd_created);
    assert_eq!(avds.creations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cancelled_run_returns_partial_result() {
    let dir = tempfile::tempdir().unwrap();
    let sdk = FakeSdk::new(dir.path());
    let avds = FakeAvds::default();
    let installer = installer(dir.path(), &sdk, &avds, false);
    let events = installer.event_bus().subscribe();

    installer.cancellation_token().cancel();
    let result = installer.ensure(&scenario()).await.unwrap();

    assert!(result.cancelled);
    assert!(result.performed_steps.is_empty());
    assert_eq!(result.plan.len(), 5);
    assert_eq!(installer.state(), InstallState::Cancelled);
    assert!(sdk.installs().is_empty());
    assert!(events
        .drain()
        .iter()
        .any(|event| matches!(event, Event::StateChanged(InstallState::Cancelled))));
}

#[tokio::test]
async fn failure_keeps_completed_steps() {
    let dir = tempfile::tempdir().unwrap();
    let image = ComponentKind::SystemImage(SystemImageSpec::new(30, SystemImageTarget::GoogleAtd, Abi::Arm64V8a));
    let sdk = FakeSdk::new(dir.path()).failing_on(image);
    let avds = FakeAvds::default();
    let installer = installer(dir.path(), &sdk, &avds, false);

    let failure = installer.ensure(&scenario()).await.unwrap_err();

    assert!(matches!(failure.error, InstallerError::SdkManager { .. }));
    let done: Vec<&str> = failure.performed_steps.iter().map(|s| s.idempotency_key.as_str()).collect();
    assert_eq!(done, vec!["cmdline-tools", "platform-tools", "platform:30"]);
    assert_eq!(failure.plan.unwrap().len(), 5);
    assert_eq!(installer.state(), InstallState::Failed);
    assert!(!dir.path().join("ndk").exists());
}

#[tokio::test]
async fn licenses_are_accepted_once_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let sdk = FakeSdk::new(dir.path());
    let avds = FakeAvds::default();
    let config = InstallerConfig {
        accept_licenses: true,
        ..Default::default()
    };

    installer_with(config, dir.path(), &sdk, &avds, false)
        .ensure(&scenario())
        .await
        .unwrap();

    assert_eq!(sdk.licenses.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn step_log_gets_one_json_line_per_event() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("sdk");
    let log = dir.path().join("steps.jsonl");
    let sdk = FakeSdk::new(&root);
    let avds = FakeAvds::default();
    let config = InstallerConfig {
        step_log: Some(log.clone()),
        ..Default::default()
    };

    installer_with(config, &root, &sdk, &avds, false)
        .ensure(&scenario())
        .await
        .unwrap();

    let content = std::fs::read_to_string(&log).unwrap();
    let records: Vec<serde_json::Value> = content.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
    let performed: Vec<&str> = records
        .iter()
        .filter(|r| r["status"] == "performed")
        .map(|r| r["step"].as_str().unwrap())
        .collect();
    assert_eq!(performed.len(), 5);
    assert_eq!(performed[0], "cmdline-tools");
    assert!(records.iter().all(|r| r["durationMs"].is_u64() && r["timestamp"].is_string()));
}

#[tokio::test]
async fn missing_explicit_ndk_path() {
    let dir = tempfile::tempdir().unwrap();
    let sdk = FakeSdk::new(dir.path());
    let avds = FakeAvds::default();
    let missing = dir.path().join("elsewhere").join("android-ndk");
    let request = InstallRequest::new(30, SystemImageTarget::GoogleAtd, Abi::Arm64V8a)
        .with_ndk(NdkSpec::path(missing.clone()).unwrap());

    let dry = installer(dir.path(), &sdk, &avds, true);
    let events = dry.event_bus().subscribe();
    let result = dry.ensure(&request).await.unwrap();
    assert_eq!(result.ndk_path, None);
    assert!(events.drain().iter().any(|event| matches!(event, Event::Warning(w) if w.contains("NDK"))));

    let failure = installer(dir.path(), &sdk, &avds, false).ensure(&request).await.unwrap_err();
    assert!(matches!(failure.error, InstallerError::ComponentNotFound(_)));
    assert!(failure.performed_steps.is_empty());
    assert!(failure.plan.is_none());
    assert!(sdk.installs().is_empty());
}

#[tokio::test]
async fn explicit_ndk_path_is_used_as_is() {
    let dir = tempfile::tempdir().unwrap();
    let ndk = dir.path().join("custom-ndk");
    std::fs::create_dir_all(&ndk).unwrap();
    std::fs::write(ndk.join(droidup::toolchain::ndk::ndk_build_name()), "").unwrap();

    let root = dir.path().join("sdk");
    let sdk = FakeSdk::new(&root);
    let avds = FakeAvds::default();
    let request =
        InstallRequest::new(30, SystemImageTarget::GoogleAtd, Abi::Arm64V8a).with_ndk(NdkSpec::path(ndk.clone()).unwrap());

    let result = installer(&root, &sdk, &avds, false).ensure(&request).await.unwrap();

    assert_eq!(result.ndk_path, Some(ndk.clone()));
    assert_eq!(result.plan.len(), 4);
    assert!(result.verification[&format!("ndk:{}", ndk.display())]);
}

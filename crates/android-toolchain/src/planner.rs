//! Installation Planner
//!
//! Turns a desired toolchain plus the host snapshot and the current inventory
//! into an ordered list of steps. Pure: the same inputs always give the same
//! plan, and a component already present never appears in it.

use serde::Serialize;

use droidup_core::{Abi, AndroidVersion, InstallerError, Result, SystemImageSpec, SystemImageTarget};

use crate::host::{HostArch, HostInfo};
use crate::inventory::{ComponentInventory, ComponentKind};
use crate::ndk::{NdkResolver, NdkSpec};

const MB: u64 = 1024 * 1024;

/// AVD requested alongside the toolchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvdRequest {
    pub name: String,
    /// Device profile passed to `avdmanager -d`
    pub device: String,
    /// Recreate even when an AVD of that name exists
    pub force: bool,
}

/// What the caller wants installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesiredState {
    pub api_level: u32,
    pub target: SystemImageTarget,
    pub arch: Abi,
    pub ndk: Option<NdkSpec>,
    pub build_tools: Option<String>,
    pub install_emulator: bool,
    pub create_avd: Option<AvdRequest>,
}

impl DesiredState {
    pub fn new(api_level: u32, target: SystemImageTarget, arch: Abi) -> Self {
        Self {
            api_level,
            target,
            arch,
            ndk: None,
            build_tools: None,
            install_emulator: false,
            create_avd: None,
        }
    }

    pub fn with_ndk(mut self, ndk: NdkSpec) -> Self {
        self.ndk = Some(ndk);
        self
    }

    pub fn with_build_tools(mut self, version: impl Into<String>) -> Self {
        self.build_tools = Some(version.into());
        self
    }

    pub fn with_emulator(mut self) -> Self {
        self.install_emulator = true;
        self
    }

    pub fn with_avd(mut self, avd: AvdRequest) -> Self {
        self.create_avd = Some(avd);
        self
    }

    pub fn system_image(&self) -> SystemImageSpec {
        SystemImageSpec::new(self.api_level, self.target, self.arch)
    }

    /// Emulator is needed when asked for directly or implied by an AVD
    pub fn wants_emulator(&self) -> bool {
        self.install_emulator || self.create_avd.is_some()
    }
}

/// What a step does
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Install(ComponentKind),
    CreateAvd {
        request: AvdRequest,
        system_image: SystemImageSpec,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    pub action: PlanAction,
    pub description: String,
    pub estimated_bytes: u64,
    /// Stable key; re-running a step with the same key is a no-op once it succeeded
    pub idempotency_key: String,
}

impl PlanStep {
    fn install(kind: ComponentKind) -> Self {
        Self {
            description: format!("Install {}", kind.package_id()),
            estimated_bytes: estimated_bytes(&kind),
            idempotency_key: kind.to_string(),
            action: PlanAction::Install(kind),
        }
    }

    fn create_avd(request: AvdRequest, system_image: SystemImageSpec) -> Self {
        Self {
            description: format!(
                "Create AVD '{}' ({}, device {})",
                request.name,
                system_image.package_id(),
                request.device
            ),
            estimated_bytes: 0,
            idempotency_key: format!("avd:{}", request.name),
            action: PlanAction::CreateAvd { request, system_image },
        }
    }
}

/// Ordered steps plus host observations that did not block planning
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallerPlan {
    pub steps: Vec<PlanStep>,
    pub warnings: Vec<String>,
}

impl InstallerPlan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.idempotency_key.as_str()).collect()
    }
}

/// Approximate download size per component
fn estimated_bytes(kind: &ComponentKind) -> u64 {
    match kind {
        ComponentKind::CmdlineTools => 150 * MB,
        ComponentKind::PlatformTools => 10 * MB,
        ComponentKind::Platform(_) => 65 * MB,
        ComponentKind::BuildTools(_) => 60 * MB,
        ComponentKind::SystemImage(_) => 1200 * MB,
        ComponentKind::Emulator => 300 * MB,
        ComponentKind::Ndk(_) => 1024 * MB,
    }
}

/// Whether `(api, target, arch)` is published upstream
pub fn is_valid_combination(api_level: u32, target: SystemImageTarget, arch: Abi) -> bool {
    if AndroidVersion::new(api_level).is_err() {
        return false;
    }

    let range = match (target, arch) {
        (SystemImageTarget::Default, Abi::X86) => 21..=30,
        (SystemImageTarget::Default, Abi::X86_64) => 21..=31,
        (SystemImageTarget::Default, Abi::ArmeabiV7a) => 21..=25,
        (SystemImageTarget::Default, Abi::Arm64V8a) => 24..=31,

        (SystemImageTarget::GoogleApis, Abi::X86) => 21..=31,
        (SystemImageTarget::GoogleApis, Abi::X86_64) => 21..=34,
        (SystemImageTarget::GoogleApis, Abi::ArmeabiV7a) => 21..=25,
        (SystemImageTarget::GoogleApis, Abi::Arm64V8a) => 24..=34,

        (SystemImageTarget::GoogleAtd, Abi::X86_64 | Abi::Arm64V8a) => 30..=34,
        (SystemImageTarget::GoogleAtd, _) => return false,

        (SystemImageTarget::GoogleApisPlaystore, Abi::X86) => 24..=30,
        (SystemImageTarget::GoogleApisPlaystore, Abi::X86_64) => 28..=34,
        (SystemImageTarget::GoogleApisPlaystore, Abi::Arm64V8a) => 30..=34,
        (SystemImageTarget::GoogleApisPlaystore, Abi::ArmeabiV7a) => return false,
    };
    range.contains(&api_level)
}

/// Total estimated download size of a plan
pub fn estimate_size(plan: &InstallerPlan) -> u64 {
    plan.steps.iter().map(|s| s.estimated_bytes).sum()
}

/// Validate a request and list the components it needs, in installation order
pub fn required_components(desired: &DesiredState) -> Result<Vec<ComponentKind>> {
    AndroidVersion::new(desired.api_level)?;
    if !is_valid_combination(desired.api_level, desired.target, desired.arch) {
        return Err(InstallerError::InvalidArgument(format!(
            "system image {} is not published",
            desired.system_image()
        )));
    }
    if let Some(version) = &desired.build_tools {
        if version.trim().is_empty() {
            return Err(InstallerError::InvalidArgument("build-tools version must not be empty".into()));
        }
    }
    if let Some(avd) = &desired.create_avd {
        if avd.name.trim().is_empty() {
            return Err(InstallerError::InvalidArgument("AVD name must not be empty".into()));
        }
    }

    // Explicit NDK paths are validated by the installer; only aliases can be installed
    let ndk_version = match &desired.ndk {
        Some(NdkSpec::Alias(alias)) => Some(NdkResolver::canonical_version(alias)?.to_string()),
        _ => None,
    };

    let mut wanted = vec![
        ComponentKind::CmdlineTools,
        ComponentKind::PlatformTools,
        ComponentKind::Platform(desired.api_level),
    ];
    if let Some(version) = &desired.build_tools {
        wanted.push(ComponentKind::BuildTools(version.trim().to_string()));
    }
    wanted.push(ComponentKind::SystemImage(desired.system_image()));
    if desired.wants_emulator() {
        wanted.push(ComponentKind::Emulator);
    }
    if let Some(version) = ndk_version {
        wanted.push(ComponentKind::Ndk(version));
    }
    Ok(wanted)
}

/// Build the ordered plan
pub fn build_plan(desired: &DesiredState, host: &HostInfo, inventory: &ComponentInventory) -> Result<InstallerPlan> {
    let wanted = required_components(desired)?;

    let mut steps: Vec<PlanStep> = wanted
        .into_iter()
        .filter(|kind| !inventory.contains(kind))
        .map(PlanStep::install)
        .collect();

    if let Some(avd) = &desired.create_avd {
        if avd.force || !inventory.has_avd(&avd.name) {
            steps.push(PlanStep::create_avd(avd.clone(), desired.system_image()));
        }
    }

    let needed_bytes: u64 = steps.iter().map(|s| s.estimated_bytes).sum();
    Ok(InstallerPlan {
        warnings: host_warnings(desired, host, needed_bytes),
        steps,
    })
}

fn host_warnings(desired: &DesiredState, host: &HostInfo, needed_bytes: u64) -> Vec<String> {
    let mut warnings = Vec::new();

    match host.java_version {
        None => warnings.push("Java not found; sdkmanager and avdmanager need a JDK 17 or newer".to_string()),
        Some(java) if !java.supports_cmdline_tools() => warnings.push(format!(
            "Java {} found; current cmdline-tools need JDK 17 or newer",
            java
        )),
        Some(_) => {}
    }

    if desired.wants_emulator() && !host.has_kvm {
        warnings.push("Hardware acceleration unavailable; the emulator will be slow or fail to boot".to_string());
    }

    if host.arch == HostArch::Arm64 && !desired.arch.is_arm() {
        warnings.push(format!(
            "{} system image on an arm64 host cannot be accelerated",
            desired.arch
        ));
    }

    if host.free_disk_bytes > 0 && host.free_disk_bytes < needed_bytes {
        warnings.push(format!(
            "Only {} MiB free, plan needs about {} MiB",
            host.free_disk_bytes / MB,
            needed_bytes / MB
        ));
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostOs, JavaVersion};
    use std::path::Path;

    fn host() -> HostInfo {
        HostInfo {
            os: HostOs::Linux,
            arch: HostArch::X86_64,
            has_kvm: true,
            java_version: Some(JavaVersion { major: 17, minor: 0, patch: 2 }),
            free_disk_bytes: 0,
        }
    }

    fn scenario() -> DesiredState {
        DesiredState::new(30, SystemImageTarget::GoogleAtd, Abi::Arm64V8a)
            .with_ndk(NdkSpec::alias("r26d").unwrap())
    }

    #[test]
    fn test_empty_root_plan_order() {
        let plan = build_plan(&scenario(), &host(), &ComponentInventory::empty("/sdk")).unwrap();
        assert_eq!(
            plan.keys(),
            vec![
                "cmdline-tools",
                "platform-tools",
                "platform:30",
                "system-image:android-30;google_atd;arm64-v8a",
                "ndk:26.3.11579264",
            ]
        );
        assert!(plan.warnings.is_empty());
        assert_eq!(estimate_size(&plan), (150 + 10 + 65 + 1200 + 1024) * MB);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let inventory = ComponentInventory::empty("/sdk");
        let a = build_plan(&scenario(), &host(), &inventory).unwrap();
        let b = build_plan(&scenario(), &host(), &inventory).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_present_components_are_omitted() {
        let dir = tempfile::tempdir().unwrap();
        for kind in [ComponentKind::CmdlineTools, ComponentKind::Platform(30)] {
            let marker = kind.marker(dir.path());
            std::fs::create_dir_all(marker.parent().unwrap()).unwrap();
            std::fs::write(marker, "").unwrap();
        }
        let inventory = ComponentInventory::scan(dir.path()).await.unwrap();
        let plan = build_plan(&scenario(), &host(), &inventory).unwrap();

        assert!(!plan.keys().contains(&"cmdline-tools"));
        assert!(!plan.keys().contains(&"platform:30"));
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_invalid_combination() {
        assert!(!is_valid_combination(21, SystemImageTarget::GoogleApisPlaystore, Abi::X86));
        assert!(is_valid_combination(30, SystemImageTarget::GoogleAtd, Abi::Arm64V8a));
        assert!(!is_valid_combination(35, SystemImageTarget::GoogleApis, Abi::X86_64));

        let desired = DesiredState::new(21, SystemImageTarget::GoogleApisPlaystore, Abi::X86);
        let err = build_plan(&desired, &host(), &ComponentInventory::empty("/sdk")).unwrap_err();
        assert!(matches!(err, InstallerError::InvalidArgument(_)));
    }

    #[test]
    fn test_build_tools_and_avd_steps() {
        let desired = DesiredState::new(34, SystemImageTarget::GoogleApis, Abi::X86_64)
            .with_build_tools("34.0.0")
            .with_avd(AvdRequest {
                name: "t1".into(),
                device: "pixel_6".into(),
                force: false,
            });
        let inventory = ComponentInventory::empty("/sdk");
        let plan = build_plan(&desired, &host(), &inventory).unwrap();

        assert_eq!(plan.keys()[3], "build-tools:34.0.0");
        assert_eq!(&plan.keys()[4..], &["system-image:android-34;google_apis;x86_64", "emulator", "avd:t1"]);

        // Existing AVD is left alone unless forced
        let existing = ComponentInventory::empty("/sdk").with_avds(vec!["t1".to_string()]);
        let plan = build_plan(&desired, &host(), &existing).unwrap();
        assert!(!plan.keys().contains(&"avd:t1"));

        let mut forced = desired.clone();
        if let Some(avd) = forced.create_avd.as_mut() {
            avd.force = true;
        }
        let plan = build_plan(&forced, &host(), &existing).unwrap();
        assert_eq!(plan.keys().last(), Some(&"avd:t1"));
    }

    #[test]
    fn test_host_warnings() {
        let host = HostInfo {
            os: HostOs::Macos,
            arch: HostArch::Arm64,
            has_kvm: false,
            java_version: None,
            free_disk_bytes: MB,
        };
        let desired = DesiredState::new(30, SystemImageTarget::GoogleApis, Abi::X86_64).with_emulator();
        let plan = build_plan(&desired, &host, &ComponentInventory::empty(Path::new("/sdk"))).unwrap();
        assert_eq!(plan.warnings.len(), 4);
    }

    #[test]
    fn test_unknown_ndk_alias_is_rejected() {
        let desired = DesiredState::new(30, SystemImageTarget::GoogleApis, Abi::X86_64)
            .with_ndk(NdkSpec::alias("r1").unwrap());
        assert!(build_plan(&desired, &host(), &ComponentInventory::empty("/sdk")).is_err());
    }
}

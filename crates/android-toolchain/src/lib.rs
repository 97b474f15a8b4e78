//! Android Toolchain Provisioning
//!
//! Everything between "what the caller wants" and "what is on disk":
//! - Host detection (OS, arch, Java, acceleration, free disk)
//! - NDK alias resolution
//! - SDK root inventory and installation planning
//! - sdkmanager adapter with direct-archive fallback
//! - Environment export for shells and CI

pub mod downloader;
pub mod env;
pub mod host;
pub mod inventory;
pub mod ndk;
pub mod planner;
pub mod sdk_manager;

pub use downloader::{ArchiveCatalog, ArchiveSpec, Downloader};
pub use env::{EnvExporter, ExportFormat};
pub use host::{HostArch, HostDetector, HostInfo, HostOs, JavaVersion};
pub use inventory::{ComponentInventory, ComponentKind};
pub use ndk::{NdkResolver, NdkSpec, ResolvedNdk};
pub use planner::{
    build_plan, estimate_size, is_valid_combination, required_components, AvdRequest, DesiredState, InstallerPlan, PlanAction,
    PlanStep,
};
pub use sdk_manager::{EnsureOutcome, ReportedPackage, SdkBackend, SdkManager};

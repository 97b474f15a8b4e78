//! droidup - Android toolchain provisioning
//!
//! Brings an Android SDK root to a requested state (command-line tools,
//! platform-tools, platform, system image, build-tools, emulator, NDK and
//! AVD) without interactive steps, and reports what it did.
//!
//! ## Architecture
//!
//! - `droidup-core`: errors, configuration, events and shared Android types
//! - `droidup-android-toolchain`: host detection, NDK aliases, inventory,
//!   planning, the sdkmanager adapter and environment export
//! - `droidup-emulator-bridge`: AVD management
//!
//! This crate adds the [`installer::AndroidInstaller`] orchestrator and the
//! command-line front end.

#![warn(clippy::all)]

pub mod cli;
pub mod commands;
pub mod installer;

pub use droidup_android_toolchain as toolchain;
pub use droidup_core as base;
pub use droidup_emulator_bridge as emulator;

/// droidup version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::installer::{AndroidInstaller, InstallFailure, InstallRequest, InstallerResult};
    pub use droidup_android_toolchain::{AvdRequest, EnvExporter, ExportFormat, NdkSpec, SdkBackend};
    pub use droidup_core::{Abi, InstallerConfig, InstallerError, SystemImageTarget};
    pub use droidup_emulator_bridge::{AvdBackend, AvdManager};
}

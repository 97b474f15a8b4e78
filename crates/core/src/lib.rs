//! droidup core - shared types for Android toolchain provisioning
//!
//! Error taxonomy, installer configuration, lifecycle/event plumbing and the
//! Android value types shared by the toolchain and emulator crates.

pub mod android;
pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod retry;

pub use android::{Abi, AndroidVersion, SystemImageSpec, SystemImageTarget, MAX_API_LEVEL, MIN_API_LEVEL};
pub use config::{InstallerConfig, RetryPolicy};
pub use error::{ErrorKind, InstallerError, Result};
pub use events::{Event, EventBus, EventSubscription, StepLog, StepRecord, StepStatus};
pub use lifecycle::{CancellationToken, InstallState, Lifecycle};

/// droidup version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Android Emulator Bridge
//!
//! Manages Android Virtual Devices (AVDs) through `avdmanager`.

pub mod avd;

pub use avd::{avd_home_from, AvdBackend, AvdConfig, AvdInfo, AvdManager, AvdOutcome};

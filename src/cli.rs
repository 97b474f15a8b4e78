use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use droidup_android_toolchain::ExportFormat;
use droidup_core::{Abi, SystemImageTarget};

#[derive(Parser, Debug)]
#[command(name = "droidup", version, about = "Provision the Android SDK, NDK, system images and AVDs")]
pub struct Cli {
    /// Android SDK root (defaults to config, then ANDROID_SDK_ROOT, then ANDROID_HOME)
    #[arg(long, global = true, env = "DROIDUP_SDK_ROOT")]
    pub sdk_root: Option<PathBuf>,

    /// Path to configuration file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Install whatever is missing for the requested target
    Ensure {
        #[command(flatten)]
        target: TargetArgs,

        /// Describe the steps without touching the filesystem
        #[arg(long)]
        dry_run: bool,

        /// Answer `y` to SDK license prompts
        #[arg(long)]
        accept_licenses: bool,

        /// Also print the environment for this shell once done
        #[arg(long, value_name = "FORMAT")]
        print_env: Option<ExportFormat>,
    },
    /// Show the steps `ensure` would run
    Plan {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Check that every requested component is present (exit 1 otherwise)
    Verify {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Print environment variables for an SDK root
    Env {
        /// bash, fish, powershell, cmd or github
        #[arg(long, short = 'f', default_value = "bash")]
        format: ExportFormat,

        /// NDK alias or absolute path to export as ANDROID_NDK_HOME
        #[arg(long)]
        ndk: Option<String>,

        /// Write the script to a file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// Manage Android Virtual Devices
    Avd {
        #[command(subcommand)]
        action: AvdAction,
    },
    /// Inspect NDK aliases and installations
    Ndk {
        #[command(subcommand)]
        action: NdkAction,
    },
    /// Remove cached downloads and staging leftovers
    Cleanup {
        /// Keep cached archives
        #[arg(long)]
        keep_downloads: bool,

        /// Keep staging directories and partial downloads
        #[arg(long)]
        keep_temp: bool,

        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum AvdAction {
    /// List AVD names
    List,
    /// Show one AVD's configuration
    Info { name: String },
    /// Delete an AVD (succeeds when it does not exist)
    Delete { name: String },
}

#[derive(Subcommand, Debug)]
pub enum NdkAction {
    /// List installed NDKs and known aliases
    List,
    /// Resolve an alias or path to an NDK directory
    Resolve { spec: String },
}

/// Target description shared by `ensure`, `plan` and `verify`
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Android API level
    #[arg(long, short = 'a')]
    pub api: u32,

    /// System image flavour: default, google_apis, google_apis_playstore, google_atd
    #[arg(long, short = 't', default_value = "google_apis")]
    pub target: SystemImageTarget,

    /// System image ABI (defaults to the host architecture)
    #[arg(long)]
    pub abi: Option<Abi>,

    /// NDK alias (r26d) or absolute path
    #[arg(long)]
    pub ndk: Option<String>,

    /// Install build-tools; without a value the configured default version is used
    #[arg(long, value_name = "VERSION", num_args = 0..=1)]
    pub build_tools: Option<Option<String>>,

    /// Install the emulator even without an AVD
    #[arg(long)]
    pub emulator: bool,

    /// Create an AVD with this name (implies the emulator)
    #[arg(long)]
    pub avd: Option<String>,

    /// Device profile for the AVD (defaults to config)
    #[arg(long, requires = "avd")]
    pub device: Option<String>,

    /// Recreate the AVD when it already exists
    #[arg(long, requires = "avd")]
    pub force: bool,
}

//! droidup - Android toolchain provisioning
//!
//! Binary entry point: parses the command line, sets up logging and runs one
//! command against the library.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use droidup::cli::{Cli, Command};
use droidup::commands::{
    build_request, AvdCommand, CleanupCommand, EnsureCommand, EnvCommand, NdkCommand, PlanCommand, Session,
    VerifyCommand,
};
use droidup::installer::InstallFailure;
use droidup::base::InstallerError;

/// Main entry point
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for --json
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("droidup v{} starting", droidup::VERSION);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{}", describe(&err));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let session = Session::load(cli.config.as_deref(), cli.sdk_root.as_deref(), cli.json).await?;

    match cli.command {
        Command::Ensure {
            target,
            dry_run,
            accept_licenses,
            print_env,
        } => {
            let command = EnsureCommand {
                request: build_request(&target, &session.config)?,
                dry_run,
                accept_licenses,
                print_env,
            };
            let result = command.execute(&session).await?;
            if result.cancelled {
                return Ok(ExitCode::from(130));
            }
        }
        Command::Plan { target } => {
            PlanCommand {
                request: build_request(&target, &session.config)?,
            }
            .execute(&session)
            .await?;
        }
        Command::Verify { target } => {
            let complete = VerifyCommand {
                request: build_request(&target, &session.config)?,
            }
            .execute(&session)
            .await?;
            if !complete {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Env { format, ndk, output } => {
            EnvCommand { format, ndk, output }.execute(&session).await?;
        }
        Command::Avd { action } => {
            AvdCommand { action }.execute(&session).await?;
        }
        Command::Ndk { action } => {
            NdkCommand { action }.execute(&session).await?;
        }
        Command::Cleanup {
            keep_downloads,
            keep_temp,
            dry_run,
        } => {
            CleanupCommand {
                remove_downloads: !keep_downloads,
                remove_temp: !keep_temp,
                dry_run,
            }
            .execute(&session)
            .await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Human message for a top-level error
fn describe(err: &anyhow::Error) -> String {
    if let Some(failure) = err.downcast_ref::<InstallFailure>() {
        let done: Vec<&str> = failure
            .performed_steps
            .iter()
            .map(|step| step.idempotency_key.as_str())
            .collect();
        if done.is_empty() {
            return failure.error.user_message();
        }
        return format!("{}\nalready done: {}", failure.error.user_message(), done.join(", "));
    }
    match err.downcast_ref::<InstallerError>() {
        Some(e) => e.user_message(),
        None => format!("{:#}", err),
    }
}

//! streamota - over-the-air firmware update CLI
//!
//! Thin entry points over the `streamota` library: load the update policy,
//! run a check or a full update, and report the result for humans or
//! scripts. Restarting the device after an install is left to the caller.

#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use streamota::{HttpSource, UpdateError, UpdatePolicy, UpdateSession};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "streamota")]
#[command(about = "Check for and install over-the-air firmware updates")]
#[command(version)]
struct Cli {
    /// Update policy file
    #[arg(
        short,
        long,
        global = true,
        env = "STREAMOTA_CONFIG",
        default_value = "streamota.json"
    )]
    config: PathBuf,

    /// Output in JSON format for machine parsing
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare the published manifest with the installed version
    Check(UpdateArgs),

    /// Download, verify and install newer firmware
    Update(UpdateArgs),
}

#[derive(clap::Args, Debug, Clone, Default)]
struct UpdateArgs {
    /// Install whatever the server publishes, ignoring the version file
    #[arg(long)]
    no_version_check: bool,

    /// Hex SHA-256 of the server's DER SubjectPublicKeyInfo
    #[arg(long, value_name = "HEX", value_parser = parse_pin)]
    pin: Option<PinnedKey>,
}

/// Decoded `--pin` value
#[derive(Debug, Clone, PartialEq, Eq)]
struct PinnedKey(Vec<u8>);

impl UpdateArgs {
    fn pin(&self) -> Option<&[u8]> {
        self.pin.as_ref().map(|pin| pin.0.as_slice())
    }
}

fn parse_pin(value: &str) -> Result<PinnedKey, String> {
    let pin = hex::decode(value.trim()).map_err(|e| format!("invalid hex: {e}"))?;
    if pin.is_empty() {
        return Err("pin must not be empty".to_string());
    }
    Ok(PinnedKey(pin))
}

/// Exit status for a failed command
fn exit_code(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<UpdateError>() {
        Some(UpdateError::Config(_)) => 2,
        Some(UpdateError::Network(_) | UpdateError::Pinning(_)) => 3,
        Some(UpdateError::ManifestParse(_)) => 4,
        Some(UpdateError::InsufficientSpace { .. }) => 5,
        Some(UpdateError::Integrity { .. }) => 6,
        Some(
            UpdateError::Decompress { .. }
            | UpdateError::ArchiveFormat(_)
            | UpdateError::Extraction(_),
        ) => 7,
        _ => 1,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("streamota={log_level}").into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match execute_command(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn open_session(config: &Path) -> Result<UpdateSession> {
    let policy = UpdatePolicy::load(config)
        .await
        .with_context(|| format!("Failed to load update policy {}", config.display()))?;
    let source = HttpSource::new(policy.request_timeout())?;
    Ok(UpdateSession::new(policy, Arc::new(source))?)
}

async fn execute_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Check(args) => {
            let session = open_session(&cli.config).await?;
            let check = session
                .probe(!args.no_version_check, args.pin())
                .await?;
            output::print_check(&check, cli.json);
            Ok(())
        }
        Commands::Update(args) => {
            let mut session = open_session(&cli.config).await?;
            let installed = session
                .run_update(!args.no_version_check, args.pin())
                .await?;
            if let Some(report) = &installed {
                info!("Installed {}, restart to apply", report.version);
            }
            output::print_update(installed.as_ref(), cli.json);
            Ok(())
        }
    }
}

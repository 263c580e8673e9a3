//! provisio CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments or missing environment
//! - 3: Validation failure
//! - 5: IaC error

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use provisio_config::ConfigError;
use provisio_core::CoreError;

mod commands;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const VALIDATION_FAILURE: u8 = 3;
    pub const IAC_ERROR: u8 = 5;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "provisio=debug,info"
    } else if cli.quiet {
        "provisio=warn,error"
    } else {
        "provisio=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let log_result = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }

    let result = match cli.command {
        Commands::Synth(args) => commands::synth::execute(args).await,
        Commands::Validate(args) => commands::validate::execute(args).await,
        Commands::WhitelistIps(args) => commands::whitelist_ips::execute(args).await,
        Commands::TrustPolicy(args) => commands::trust_policy::execute(args).await,
        Commands::AlbControllerRepo(args) => commands::alb_controller_repo::execute(args).await,
        Commands::Params(args) => commands::params::execute(args).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Map an error to its exit code by the first typed error in its chain.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(core) = cause.downcast_ref::<CoreError>() {
            return match core.root() {
                CoreError::MissingEnvironmentSelector(_)
                | CoreError::MissingEnvironmentVariable(_)
                | CoreError::InvalidEnvironment(_) => ExitCodes::INVALID_ARGS,
                CoreError::Config(_) => ExitCodes::VALIDATION_FAILURE,
                other if other.is_provisioning_error() => ExitCodes::IAC_ERROR,
                _ => ExitCodes::GENERAL_ERROR,
            };
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return ExitCodes::VALIDATION_FAILURE;
        }
    }
    ExitCodes::GENERAL_ERROR
}

//! CLI module for Parley
//!
//! Provides commands:
//! - `ask`: Send a prompt to the configured services and print the report
//! - `status`: Show (and optionally check) service readiness
//! - `watch`: Run the periodic health loop until interrupted
//! - `profiles`: List or register service profiles
//! - `report`: Show persisted reports

use anyhow::Context;
use clap::{Parser, Subcommand};
use parley_core::{format_error_for_cli, OrchestrationManager};
use std::path::PathBuf;
use std::sync::Arc;

use crate::local::OllamaProcessor;
use crate::otp::TerminalOtp;
use crate::settings::{load_settings, AppSettings};

pub mod ask;
pub mod profiles;
mod render;
pub mod report;
pub mod status;

/// Parley CLI
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "Ask several web AI services at once and compare their answers")]
#[command(version)]
pub struct Cli {
    /// Configuration file layered over the defaults
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a prompt and print the aggregated report
    Ask(ask::AskArgs),
    /// Show service readiness
    Status {
        /// Validate every service now instead of showing recorded state
        #[arg(long)]
        check: bool,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Run periodic health checks until interrupted
    Watch,
    /// Manage service profiles
    Profiles {
        #[command(subcommand)]
        command: Option<profiles::ProfilesCommand>,
    },
    /// Show a persisted report
    Report {
        /// Job id
        job_id: Option<String>,
        /// List stored reports
        #[arg(long)]
        list: bool,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
}

/// Wire the engine with the terminal OTP prompt and the local model
pub(crate) fn build_manager(settings: &AppSettings) -> anyhow::Result<OrchestrationManager> {
    let mut builder = OrchestrationManager::builder(settings.engine.clone())
        .otp_provider(Arc::new(TerminalOtp::new()));
    if settings.local.enabled {
        builder = builder.local_processor(Arc::new(OllamaProcessor::new(&settings.local)?));
    }
    builder.build().context("Failed to start the engine")
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let Some(command) = cli.command else {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    };

    let settings = load_settings(cli.config.as_deref())?;

    let result = match command {
        Commands::Ask(args) => ask::run(&settings, args).await,
        Commands::Status { check, json } => status::run(&settings, check, json).await,
        Commands::Watch => status::watch(&settings).await,
        Commands::Profiles { command } => profiles::run(&settings, command.unwrap_or_default()),
        Commands::Report { job_id, list, json } => {
            report::run(&settings, job_id.as_deref(), list, json)
        }
    };

    if let Err(e) = &result {
        if let Some(core) = e.downcast_ref::<parley_core::Error>() {
            eprint!("{}", format_error_for_cli(core));
            std::process::exit(1);
        }
    }
    result
}

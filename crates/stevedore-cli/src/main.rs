//! # stevedore-cli
//!
//! Binary entry point for the stevedore task executor.
//!
//! The agent launches one `stevedore` process per task; everything the
//! process needs arrives through the environment. Exit code 0 means a clean
//! shutdown (terminal status delivered); anything else is a fatal error.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use stevedore_adapters::{ExecHook, LogstashPipeline};
use stevedore_core::hook::Hook;
use stevedore_core::{Config, Executor, Runtime};

/// Task executor for a two-level cluster scheduler. Configuration comes from
/// `STEVEDORE_*` environment variables plus the agent launch environment.
#[derive(Parser)]
#[command(name = "stevedore", version, about)]
struct Cli {
    /// Load and validate the configuration, then exit without subscribing.
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load executor configuration: {err}");
            return ExitCode::FAILURE;
        }
    };
    if cli.validate {
        println!("configuration ok");
        return ExitCode::SUCCESS;
    }
    init_tracing(config.debug);
    info!(version = env!("CARGO_PKG_VERSION"), "Stevedore executor");

    let pipeline = Arc::new(LogstashPipeline::new(config.servicelog_ignore_keys.clone()));
    let executor = match Executor::new(config, Runtime::system(), build_hooks()) {
        Ok(executor) => executor.with_scrape_pipeline(pipeline),
        Err(err) => {
            error!(error = %err, "Failed to initialize executor");
            return ExitCode::FAILURE;
        }
    };

    match executor.run().await {
        Ok(()) => {
            info!("Executor exited successfully");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "Executor exited with error");
            ExitCode::FAILURE
        }
    }
}

fn build_hooks() -> Vec<Box<dyn Hook>> {
    let mut hooks: Vec<Box<dyn Hook>> = Vec::new();
    if let Some(exec_hook) = ExecHook::from_env() {
        info!("Exec hook enabled");
        hooks.push(Box::new(exec_hook));
    }
    hooks
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

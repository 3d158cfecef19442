//! Easel CLI - Main entry point.
//!
//! Runs plugin commands from the command line:
//! - `run` invokes a single command
//! - `batch` runs a JSON or TOML batch file
//! - `list` and `stats` inspect the registry
//!
//! Exit codes: 0 success, 1 failure, 2 usage error, 124 timeout, 130 cancelled.

mod cli;
mod handlers;
mod host;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use cli::{Cli, Commands, LogLevel};
use easel_commands::invocation::EXIT_FAILURE;
use host::Host;

/// Pick the log filter: flags first, then `EASEL_LOG_LEVEL`, then `RUST_LOG`.
fn log_filter(cli: &Cli, configured: Option<&str>) -> String {
    if cli.verbose {
        return LogLevel::Debug.as_filter_str().to_string();
    }
    if let Some(level) = cli.log_level {
        return level.as_filter_str().to_string();
    }
    if let Some(level) = std::env::var("EASEL_LOG_LEVEL")
        .ok()
        .and_then(|s| LogLevel::from_str_loose(&s))
    {
        return level.as_filter_str().to_string();
    }
    if let Ok(filter) = std::env::var("RUST_LOG") {
        return filter;
    }
    configured
        .map(str::to_string)
        .unwrap_or_else(|| LogLevel::default().as_filter_str().to_string())
}

/// Cancel `token` on Ctrl+C.
fn install_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, cancelling...");
            token.cancel();
        }
    });
}

/// Render an error for the terminal. The cause chain is shown only when verbose.
fn error_message(e: &anyhow::Error, verbose: bool) -> String {
    if verbose {
        format!("{:#}", e)
    } else {
        format!("{}", e)
    }
}

async fn dispatch(cli: Cli, host: Host, cancel: CancellationToken) -> Result<i32> {
    match cli.command {
        Commands::Run(args) => handlers::run(&host, args, cancel).await,
        Commands::Batch(args) => handlers::batch(&host, args, cancel).await,
        Commands::List(args) => handlers::list(&host, args),
        Commands::Stats(args) => handlers::stats(&host, args),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = host::load_config(cli.config.as_deref());
    let configured = config
        .as_ref()
        .ok()
        .and_then(|c| c.cli.log_level.clone());

    // Logging goes to stderr so command output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&cli, configured.as_deref()))
        .with_writer(std::io::stderr)
        .init();

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("{}", error_message(&e, cli.verbose));
            std::process::exit(EXIT_FAILURE);
        }
    };
    let host = Host::new(config);

    let cancel = CancellationToken::new();
    install_interrupt_handler(cancel.clone());

    let verbose = cli.verbose;
    let code = match dispatch(cli, host, cancel).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", error_message(&e, verbose));
            EXIT_FAILURE
        }
    };
    debug!("Exiting with code {}", code);
    std::process::exit(code);
}

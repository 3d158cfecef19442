//! Command-line argument structures.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Log verbosity level for CLI output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    /// Only show errors
    Error,
    /// Show warnings and errors (default)
    #[default]
    Warn,
    /// Show informational messages, warnings, and errors
    Info,
    /// Show debug messages and above
    Debug,
    /// Show all messages including trace-level details
    Trace,
}

impl LogLevel {
    /// Convert to tracing filter string.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Parse from string (case-insensitive).
    pub fn from_str_loose(s: &str) -> Option<LogLevel> {
        match s.to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

/// Easel command runner
///
/// Runs commands contributed by Easel plugins, one at a time or in batches.
#[derive(Debug, Parser)]
#[command(name = "easel")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (default: $EASEL_CONFIG or the user config directory)
    #[arg(long, short = 'c', global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose output (same as --log-level debug)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Log level
    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a single command
    Run(RunArgs),

    /// Run a batch file (JSON or TOML)
    Batch(BatchArgs),

    /// List registered commands
    #[command(alias = "ls")]
    List(ListArgs),

    /// Show registry statistics
    Stats(StatsArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Command id, e.g. `core.echo`
    pub command_id: String,

    /// Parameter as KEY=VALUE (repeatable)
    #[arg(long = "param", short = 'p', value_parser = parse_param, value_name = "KEY=VALUE")]
    pub params: Vec<(String, String)>,

    /// Cancel the command after this many milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct BatchArgs {
    /// Batch file
    pub file: PathBuf,

    /// Run up to N requests at once
    #[arg(long, value_name = "N", value_parser = parse_parallelism)]
    pub parallel: Option<usize>,

    /// Keep going after a failed request
    #[arg(long)]
    pub continue_on_error: bool,

    /// Timeout for the whole batch in milliseconds
    #[arg(long, value_name = "MS")]
    pub global_timeout_ms: Option<u64>,

    /// Write the execution log to this file
    #[arg(long, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only commands in this category
    #[arg(long)]
    pub category: Option<String>,

    /// Only commands bound to a keyboard shortcut
    #[arg(long, conflicts_with = "category")]
    pub shortcuts: bool,

    /// Case-insensitive search over id, name and description
    #[arg(long, conflicts_with_all = ["category", "shortcuts"])]
    pub search: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct StatsArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Parse a `KEY=VALUE` parameter. The value may be empty or contain `=`.
fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("parameter '{raw}' must be in KEY=VALUE form"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("parameter '{raw}' has an empty key"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_parallelism(s: &str) -> Result<usize, String> {
    let n: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if n == 0 {
        return Err("--parallel must be at least 1".to_string());
    }
    Ok(n)
}

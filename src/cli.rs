//! CLI argument parsing for the perfscope demo

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for the fetched tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Indented `key = value` listing (default)
    Text,
    /// JSON array of traces in tree order
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "perfscope")]
#[command(version)]
#[command(about = "Run an instrumented workload and print its trace tree", long_about = None)]
pub struct Cli {
    /// Producer loop iterations to run before exiting
    #[arg(short = 'n', long = "iterations", default_value = "50")]
    pub iterations: usize,

    /// Simulated work per iteration, in milliseconds
    #[arg(long = "interval-ms", value_name = "MS", default_value = "2")]
    pub interval_ms: u64,

    /// Fork sampling interval (0 or 1 = trace every iteration); overrides the config file
    #[arg(long = "fork-interval", value_name = "N")]
    pub fork_interval: Option<usize>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Only print traces whose full dotted key matches this regex
    #[arg(short = 'e', long = "pattern", value_name = "REGEX")]
    pub pattern: Option<String>,

    /// Subscribe (true) or unsubscribe (false) every matched trace
    #[arg(long = "subscribe", value_name = "BOOL")]
    pub subscribe: Option<bool>,

    /// Tracer configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}

//! CLI command definitions
//!
//! Defines the clap commands for the wafprobe CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::testing::OutputFormat;

#[derive(Subcommand)]
pub enum Commands {
    /// Run WAF tests
    Run(RunArgs),

    /// Parse test files and report definition errors without sending anything
    Check {
        /// Test files or directories to check
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Test files or directories containing YAML tests
    #[arg(short = 'd', long = "dir", default_value = ".")]
    pub paths: Vec<PathBuf>,

    /// Configuration file (YAML or TOML)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Only run tests whose id matches this regular expression
    #[arg(long, short = 'i')]
    pub include: Option<String>,

    /// Skip tests whose id matches this regular expression
    #[arg(long, short = 'e')]
    pub exclude: Option<String>,

    /// Stop after the first failed test
    #[arg(long)]
    pub fail_fast: bool,

    /// Only print failed tests
    #[arg(long)]
    pub show_failures_only: bool,

    /// Print the time each test took
    #[arg(long, short = 't')]
    pub time: bool,

    /// Output format
    #[arg(long, short = 'o', value_enum, default_value_t = OutputFormat::Normal)]
    pub output: OutputFormat,

    /// Run without access to the WAF log; only responses are checked
    #[arg(long)]
    pub cloud: bool,

    /// WAF log file (overrides the configuration)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Connect timeout in milliseconds
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Read timeout in milliseconds
    #[arg(long)]
    pub read_timeout: Option<u64>,

    /// Minimum milliseconds between requests
    #[arg(long)]
    pub rate_limit: Option<u64>,

    /// How many probes to send while waiting for a log marker
    #[arg(long)]
    pub max_marker_retries: Option<u32>,

    /// How many log lines to search, from the end, for a marker
    #[arg(long)]
    pub max_marker_log_lines: Option<usize>,
}

//! wafprobe - WAF compliance test runner
//!
//! Sends the requests described in YAML test files to a web application
//! firewall and checks the responses and the WAF's own log.

use clap::Parser;
use commands::Commands;
use wafprobe::cli::{self, Outcome};
use wafprobe::commands;
use wafprobe::common::logging::{self, Verbosity};

#[derive(Parser)]
#[command(name = "wafprobe", about = "WAF compliance test runner")]
#[command(version, long_about = None)]
struct Cli {
    /// Debug logging on stderr
    #[arg(long, global = true)]
    debug: bool,

    /// Trace logging on stderr
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(Verbosity::from_flags(cli.debug, cli.trace));

    match cli::dispatch(cli.command).await {
        Ok(outcome) => {
            if let Outcome::Failed(count) = outcome {
                tracing::debug!(count, "Tests failed");
            }
            std::process::exit(outcome.exit_code());
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

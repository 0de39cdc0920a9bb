//! Test execution
//!
//! Loads YAML test files and runs them against a WAF. Each stage is
//! correlated with the WAF log through marker probes, then checked
//! against its expectations.

mod config;
mod output;
mod runner;
mod stage;
mod stats;

pub use config::*;
pub use output::{OutputFormat, Reporter};
pub use runner::{run, RunnerOptions};
pub use stage::{probe_request, Session, StageDecision, StageReport};
pub use stats::{RunStats, StageRecord};

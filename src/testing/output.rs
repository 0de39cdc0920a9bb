//! Console reporting for a run

use std::time::Duration;

use colored::Colorize;

use super::stats::RunStats;
use crate::check::Verdict;
use crate::common::Result;

/// How results are printed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Colored progress and a summary
    #[default]
    Normal,
    /// Nothing; only the exit code reports the result
    Quiet,
    /// Summary as a JSON document on stdout
    Json,
}

/// Prints progress and the final summary according to an [`OutputFormat`]
#[derive(Debug, Clone)]
pub struct Reporter {
    format: OutputFormat,
    show_only_failed: bool,
    show_time: bool,
}

impl Reporter {
    pub fn new(format: OutputFormat, show_only_failed: bool, show_time: bool) -> Self {
        Self {
            format,
            show_only_failed,
            show_time,
        }
    }

    fn progress(&self) -> bool {
        self.format == OutputFormat::Normal
    }

    pub fn run_started(&self, files: usize, cloud_mode: bool) {
        if !self.progress() {
            return;
        }
        let mode = if cloud_mode { " (cloud mode)" } else { "" };
        println!(
            "{} {} test file(s){}",
            "Running".blue().bold(),
            files,
            mode.dimmed()
        );
    }

    pub fn file_started(&self, name: &str) {
        if self.progress() && !self.show_only_failed {
            println!("\n{} {}", "=>".cyan(), name.white().bold());
        }
    }

    pub fn file_disabled(&self, name: &str) {
        if self.progress() && !self.show_only_failed {
            println!("\n{} {} {}", "=>".cyan(), name, "(disabled)".dimmed());
        }
    }

    pub fn test_started(&self, id: &str) {
        if self.progress() && !self.show_only_failed {
            println!("  {} {}", "running".dimmed(), id);
        }
    }

    /// One line per executed stage
    pub fn stage_result(
        &self,
        id: &str,
        stage: usize,
        verdict: Verdict,
        stage_time: Duration,
        round_trip: Duration,
        reason: Option<&str>,
    ) {
        if !self.progress() || (self.show_only_failed && !verdict.is_failure()) {
            return;
        }
        let label = format!("{} stage {}", id, stage);
        let line = match verdict {
            Verdict::Success => format!(
                "    {} {} passed in {:?} (RTT {:?})",
                "✓".green(),
                label,
                stage_time,
                round_trip
            ),
            Verdict::Failed => format!(
                "    {} {} failed in {:?} (RTT {:?})",
                "✗".red(),
                label,
                stage_time,
                round_trip
            ),
            Verdict::Ignored => format!("    {} {} test ignored", "-".yellow(), label),
            Verdict::ForceFail => format!("    {} {} test forced to fail", "✗".red(), label),
            Verdict::ForcePass => format!("    {} {} test forced to pass", "✓".green(), label),
            Verdict::Skipped => format!("    {} {} skipped", "-".dimmed(), label),
        };
        match reason {
            Some(reason) if !reason.is_empty() => println!("{}: {}", line, reason.dimmed()),
            _ => println!("{}", line),
        }
    }

    pub fn retrying(&self, id: &str, stage: usize) {
        if self.progress() && !self.show_only_failed {
            println!("    {} {} stage {} failed, retrying once", "↻".yellow(), id, stage);
        }
    }

    pub fn summary(&self, stats: &RunStats) -> Result<()> {
        match self.format {
            OutputFormat::Quiet => Ok(()),
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(stats)?);
                Ok(())
            }
            OutputFormat::Normal => {
                self.print_summary(stats);
                Ok(())
            }
        }
    }

    fn print_summary(&self, stats: &RunStats) {
        println!();
        if self.show_time {
            println!("{}", "Run times:".cyan());
            for (id, time) in &stats.run_time {
                println!("  {:<24} {:?}", id, time);
            }
            println!();
        }

        let sections = [
            ("failed", &stats.failed),
            ("forced to fail", &stats.forced_fail),
            ("forced to pass", &stats.forced_pass),
            ("ignored", &stats.ignored),
        ];
        for (label, ids) in sections {
            if !ids.is_empty() {
                println!("{} {}: {}", ids.len(), label, ids.join(", "));
            }
        }

        let headline = format!(
            "{} run, {} passed, {} failed, {} skipped in {:?}",
            stats.run,
            stats.success.len() + stats.forced_pass.len(),
            stats.total_failed(),
            stats.skipped.len(),
            stats.total_time
        );
        if stats.total_failed() == 0 {
            println!("{} {}", "✓".green().bold(), headline.green().bold());
        } else {
            println!("{} {}", "✗".red().bold(), headline.red().bold());
        }
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(OutputFormat::Normal, false, false)
    }
}

//! CLI command handling
//!
//! Builds the run configuration from files, environment and flags, then
//! hands off to the test runner.

use colored::Colorize;
use std::path::PathBuf;

use crate::check::Expectation;
use crate::commands::{Commands, RunArgs};
use crate::common::{Config, Result, RunMode};
use crate::testing::{self, RunStats, RunnerOptions, TestFile};

/// Outcome of a command, used for the process exit code
#[derive(Debug)]
pub enum Outcome {
    Passed,
    Failed(usize),
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Passed => 0,
            Outcome::Failed(_) => 1,
        }
    }
}

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<Outcome> {
    match command {
        Commands::Run(args) => {
            let stats = run(args).await?;
            Ok(match stats.total_failed() {
                0 => Outcome::Passed,
                n => Outcome::Failed(n),
            })
        }

        Commands::Check { paths } => check(&paths),
    }
}

async fn run(args: RunArgs) -> Result<RunStats> {
    let config = build_config(&args)?;
    let options = RunnerOptions {
        fail_fast: args.fail_fast,
        show_time: args.time,
        show_only_failed: args.show_failures_only,
        output: args.output,
        ..RunnerOptions::default()
    }
    .with_filters(args.include.as_deref(), args.exclude.as_deref())?;

    let tests = testing::load_tests(&args.paths)?;
    tracing::info!(files = tests.len(), "Loaded test files");

    testing::run(&config, &tests, &options).await
}

/// Configuration file and environment, then command-line flags on top
pub fn build_config(args: &RunArgs) -> Result<Config> {
    let mut config = Config::load(args.config.as_deref())?;

    if args.cloud {
        config.mode = RunMode::Cloud;
    }
    if let Some(path) = &args.log_file {
        config.logfile = Some(path.clone());
    }
    if let Some(ms) = args.connect_timeout {
        config.timeouts.connect_ms = ms;
    }
    if let Some(ms) = args.read_timeout {
        config.timeouts.read_ms = ms;
    }
    if let Some(ms) = args.rate_limit {
        config.rate_limit_ms = Some(ms);
    }
    if let Some(retries) = args.max_marker_retries {
        config.max_marker_retries = retries;
    }
    if let Some(lines) = args.max_marker_log_lines {
        config.max_marker_log_lines = lines;
    }
    Ok(config)
}

/// Parse every test file and compile every stage, without network access
fn check(paths: &[PathBuf]) -> Result<Outcome> {
    let files = testing::load_tests(paths)?;
    let mut stages = 0;
    for file in &files {
        check_file(file)?;
        stages += file.tests.iter().map(|t| t.stages.len()).sum::<usize>();
    }

    println!(
        "{} {} file(s), {} stage(s) look good",
        "✓".green(),
        files.len(),
        stages
    );
    Ok(Outcome::Passed)
}

fn check_file(file: &TestFile) -> Result<()> {
    for test in &file.tests {
        let id = test.id();
        for stage in &test.stages {
            stage.input.check_sanity(&id)?;
            stage.input.destination()?;
            stage.input.request(&id)?;
            Expectation::from_output(&stage.output)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: Commands,
    }

    fn run_args(argv: &[&str]) -> RunArgs {
        let mut full = vec!["wafprobe", "run"];
        full.extend_from_slice(argv);
        match TestCli::parse_from(full).command {
            Commands::Run(args) => args,
            Commands::Check { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_flags_override_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("wafprobe.yaml");
        std::fs::write(
            &config_path,
            "logfile: /var/log/waf.log\ntimeouts:\n  connect_ms: 5000\n",
        )
        .unwrap();

        let args = run_args(&[
            "--config",
            config_path.to_str().unwrap(),
            "--read-timeout",
            "250",
            "--cloud",
            "--log-file",
            "/tmp/other.log",
        ]);
        let config = build_config(&args).unwrap();

        assert!(config.is_cloud_mode());
        assert_eq!(config.timeouts.connect_ms, 5000);
        assert_eq!(config.timeouts.read_ms, 250);
        assert_eq!(config.logfile, Some(PathBuf::from("/tmp/other.log")));
    }

    #[test]
    fn test_check_reports_definition_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("bad.yaml"),
            r#"
tests:
  - test_title: bad-1
    stages:
      - input:
          data: "a=b"
          raw_request: "GET / HTTP/1.1\r\n\r\n"
"#,
        )
        .unwrap();

        let err = check(&[dir.path().to_path_buf()]).unwrap_err();
        assert!(err.is_definition_error());
    }

    #[test]
    fn test_check_accepts_valid_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("good.yaml"),
            r#"
tests:
  - test_title: good-1
    stages:
      - input:
          uri: "/?q=1"
        output:
          log:
            expect_ids: [942100]
"#,
        )
        .unwrap();

        let outcome = check(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(outcome.exit_code(), 0);
    }
}

//! Test runner implementation
//!
//! Walks test files, their test cases and stages in order, applies the
//! include/exclude filters and records one verdict per test case.

use regex::Regex;

use super::config::{TestCase, TestFile};
use super::output::{OutputFormat, Reporter};
use super::stage::{Session, StageDecision, StageReport};
use super::stats::{RunStats, StageRecord};
use crate::check::Verdict;
use crate::common::{Config, Error, Result};

/// Selection and presentation settings of a run
#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    /// Only run tests whose id matches; wins over `exclude`
    pub include: Option<Regex>,
    /// Skip tests whose id matches
    pub exclude: Option<Regex>,
    /// Stop after the first failed test case
    pub fail_fast: bool,
    pub show_time: bool,
    pub show_only_failed: bool,
    pub output: OutputFormat,
}

impl RunnerOptions {
    /// Compile include/exclude patterns
    pub fn with_filters(mut self, include: Option<&str>, exclude: Option<&str>) -> Result<Self> {
        self.include = include.map(compile_filter).transpose()?;
        self.exclude = exclude.map(compile_filter).transpose()?;
        Ok(self)
    }

    /// Whether the test with this id is left out of the run
    ///
    /// An include match always runs the test. Otherwise the test is skipped
    /// when it matches `exclude`, or when an include filter is set and does
    /// not match.
    pub fn should_skip(&self, id: &str) -> bool {
        if let Some(include) = &self.include {
            return !include.is_match(id);
        }
        self.exclude.as_ref().is_some_and(|re| re.is_match(id))
    }
}

fn compile_filter(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::invalid_regex(pattern, &e))
}

/// Run every test in `tests`
///
/// Definition errors stop the run; the summary of what completed is still
/// printed before the error is returned. The log file and the connection
/// are released in every case.
pub async fn run(config: &Config, tests: &[TestFile], options: &RunnerOptions) -> Result<RunStats> {
    let reporter = Reporter::new(options.output, options.show_only_failed, options.show_time);
    let mut session = Session::new(config)?;
    let mut stats = RunStats::new();

    reporter.run_started(tests.len(), config.is_cloud_mode());
    let result = run_files(&mut session, tests, options, &reporter, &mut stats).await;
    session.close();

    settle(result, reporter.summary(&stats))?;
    Ok(stats)
}

/// An error that stopped the run outranks a failure to print the summary
fn settle(run: Result<()>, summary: Result<()>) -> Result<()> {
    match (run, summary) {
        (Err(e), Err(summary_error)) => {
            tracing::error!(error = %summary_error, "Failed to print summary");
            Err(e)
        }
        (run, summary) => run.and(summary),
    }
}

async fn run_files(
    session: &mut Session<'_>,
    tests: &[TestFile],
    options: &RunnerOptions,
    reporter: &Reporter,
    stats: &mut RunStats,
) -> Result<()> {
    for file in tests {
        let name = file.name();
        if !file.meta.enabled {
            tracing::debug!(file = %name, "Skipping disabled test file");
            reporter.file_disabled(&name);
            for test in &file.tests {
                stats.add_result(Verdict::Skipped, &test.id());
            }
            continue;
        }

        reporter.file_started(&name);
        for test in &file.tests {
            let id = test.id();
            if options.should_skip(&id) {
                tracing::debug!(test = %id, "Skipping filtered test");
                stats.add_result(Verdict::Skipped, &id);
                continue;
            }

            let verdict = run_test(session, test, &id, reporter, stats).await?;
            stats.add_result(verdict, &id);

            if options.fail_fast && stats.total_failed() > 0 {
                tracing::info!(test = %id, "Stopping after first failure");
                return Ok(());
            }
        }
    }
    Ok(())
}

async fn run_test(
    session: &mut Session<'_>,
    test: &TestCase,
    id: &str,
    reporter: &Reporter,
    stats: &mut RunStats,
) -> Result<Verdict> {
    reporter.test_started(id);
    if let Some(desc) = &test.desc {
        tracing::debug!(test = id, desc = %desc, "Running test");
    }

    let mut verdicts = Vec::with_capacity(test.stages.len());
    for (i, stage) in test.stages.iter().enumerate() {
        let number = i + 1;
        let report = match session.run_stage(id, stage, true).await? {
            StageDecision::Final(report) => report,
            StageDecision::RetryRequested(first) => {
                reporter.retrying(id, number);
                stats.add_stage(record(id, number, &first));
                session.run_stage(id, stage, false).await?.into_report()
            }
        };

        reporter.stage_result(
            id,
            number,
            report.verdict,
            report.duration,
            report.round_trip,
            report.reason.as_deref(),
        );
        stats.add_stage(record(id, number, &report));
        verdicts.push(report.verdict);
    }

    Ok(aggregate(&verdicts))
}

fn record(id: &str, stage: usize, report: &StageReport) -> StageRecord {
    StageRecord {
        test_id: id.to_string(),
        stage,
        verdict: report.verdict,
        duration: report.duration,
        round_trip: report.round_trip,
        reason: report.reason.clone(),
    }
}

/// Verdict of a test case from the verdicts of its stages
fn aggregate(verdicts: &[Verdict]) -> Verdict {
    const PRECEDENCE: [Verdict; 4] = [
        Verdict::Failed,
        Verdict::ForceFail,
        Verdict::Ignored,
        Verdict::ForcePass,
    ];
    if verdicts.is_empty() {
        return Verdict::Skipped;
    }
    PRECEDENCE
        .into_iter()
        .find(|v| verdicts.contains(v))
        .unwrap_or(Verdict::Success)
}

//! Verdicts for a stage
//!
//! A [`Check`] compares what happened in a stage (response, connection
//! error, log window) with what the test file expects.

mod overrides;

use regex::bytes::Regex;
use serde::Serialize;

use crate::common::{Error, Result};
use crate::http::Response;
use crate::logscan::LogWindow;
use crate::testing::{Output, StatusExpectation};

pub use overrides::OverrideRules;

/// Outcome of a stage, test case or run entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    Failed,
    Ignored,
    ForcePass,
    ForceFail,
    Skipped,
}

impl Verdict {
    pub fn is_failure(self) -> bool {
        matches!(self, Verdict::Failed | Verdict::ForceFail)
    }
}

/// Compiled expectations of one stage
#[derive(Debug, Clone, Default)]
pub struct Expectation {
    pub status: Option<StatusExpectation>,
    pub response_contains: Option<String>,
    pub expect_error: bool,
    /// Each must match at least one log line
    pub log_contains: Vec<Regex>,
    /// None may match any log line
    pub no_log_contains: Vec<Regex>,
    pub retry_once: bool,
}

impl Expectation {
    /// Compile the `output` section of a stage
    ///
    /// Invalid regular expressions are definition errors.
    pub fn from_output(output: &Output) -> Result<Self> {
        let mut positive: Vec<String> = output.log_contains.iter().cloned().collect();
        let mut negative: Vec<String> = output.no_log_contains.iter().cloned().collect();

        if let Some(log) = &output.log {
            positive.extend(log.match_regex.iter().cloned());
            positive.extend(log.expect_ids.iter().map(|id| rule_id_pattern(*id)));
            negative.extend(log.no_match_regex.iter().cloned());
            negative.extend(log.no_expect_ids.iter().map(|id| rule_id_pattern(*id)));
        }

        Ok(Self {
            status: output.status.clone(),
            response_contains: output.response_contains.clone().filter(|s| !s.is_empty()),
            expect_error: output.expects_error(),
            log_contains: compile_all(&positive)?,
            no_log_contains: compile_all(&negative)?,
            retry_once: output.retries_once(),
        })
    }
}

fn rule_id_pattern(id: u32) -> String {
    format!(r#"id "{}""#, id)
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .filter(|p| !p.is_empty())
        .map(|p| Regex::new(p).map_err(|e| Error::invalid_regex(p, &e)))
        .collect()
}

/// Evaluates one stage against its expectation
pub struct Check<'a> {
    expected: &'a Expectation,
    cloud_mode: bool,
}

impl<'a> Check<'a> {
    pub fn new(expected: &'a Expectation, cloud_mode: bool) -> Self {
        Self {
            expected,
            cloud_mode,
        }
    }

    /// `(expected, succeeded)`: whether the stage expects an error, and if
    /// so whether one happened
    pub fn assert_expect_error(&self, error: Option<&Error>) -> (bool, bool) {
        if self.expected.expect_error {
            (true, error.is_some())
        } else {
            (false, false)
        }
    }

    pub fn assert_status(&self, status: u16) -> bool {
        self.expected
            .status
            .as_ref()
            .map_or(true, |expected| expected.matches(status))
    }

    pub fn assert_response_contains(&self, text: &str) -> bool {
        self.expected
            .response_contains
            .as_deref()
            .map_or(true, |needle| text.contains(needle))
    }

    pub fn assert_log_contains(&self, window: &LogWindow) -> bool {
        self.expected.log_contains.iter().all(|re| window.contains(re))
    }

    pub fn assert_no_log_contains(&self, window: &LogWindow) -> bool {
        !self.expected.no_log_contains.iter().any(|re| window.contains(re))
    }

    /// Log assertions; not applicable in cloud mode, where there is no log
    pub fn assert_logs(&self, window: &LogWindow) -> bool {
        if self.cloud_mode {
            return true;
        }
        self.assert_log_contains(window) && self.assert_no_log_contains(window)
    }

    /// Combine all criteria into a verdict
    pub fn result(
        &self,
        response: Option<&Response>,
        error: Option<&Error>,
        window: &LogWindow,
    ) -> Verdict {
        // An error might be exactly what the stage wants
        let (expected, succeeded) = self.assert_expect_error(error);
        if expected {
            return if succeeded {
                Verdict::Success
            } else {
                tracing::debug!("Expected an error but the request succeeded");
                Verdict::Failed
            };
        }

        if let Some(e) = error {
            tracing::debug!(error = %e, "Encountered unexpected error");
            return Verdict::Failed;
        }

        let Some(response) = response else {
            tracing::error!("No response to check");
            return Verdict::Failed;
        };

        if !self.assert_status(response.status) {
            tracing::debug!(
                status = response.status,
                expected = ?self.expected.status,
                "Status mismatch"
            );
            return Verdict::Failed;
        }
        if !self.assert_response_contains(&response.full_text()) {
            tracing::debug!(
                expected = ?self.expected.response_contains,
                "Response does not contain expected text"
            );
            return Verdict::Failed;
        }
        if !self.assert_logs(window) {
            tracing::debug!(lines = window.len(), "Log expectations not met");
            return Verdict::Failed;
        }

        Verdict::Success
    }
}

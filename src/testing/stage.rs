//! Stage execution
//!
//! A stage is bracketed by two probe requests whose marker header the WAF
//! echoes into its log. The lines between the two echoes are the evidence
//! for the stage's real request.

use std::time::{Duration, Instant};

use uuid::Uuid;

use super::config::Stage;
use crate::check::{Check, Expectation, OverrideRules, Verdict};
use crate::common::{Config, Error, Result};
use crate::http::{Client, ClientConfig, Destination, Headers, Request, RequestLine};
use crate::logscan::{LogLines, LogWindow, Marker};

/// What happened in one stage
#[derive(Debug, Clone)]
pub struct StageReport {
    pub verdict: Verdict,
    /// Wall time of the whole stage, probes included
    pub duration: Duration,
    /// Round trip of the real request only
    pub round_trip: Duration,
    pub reason: Option<String>,
}

impl StageReport {
    fn new(verdict: Verdict, started: Instant, round_trip: Duration) -> Self {
        Self {
            verdict,
            duration: started.elapsed(),
            round_trip,
            reason: None,
        }
    }

    fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Result of running a stage once
#[derive(Debug, Clone)]
pub enum StageDecision {
    /// The verdict stands
    Final(StageReport),
    /// The stage failed and asked to be run one more time
    RetryRequested(StageReport),
}

impl StageDecision {
    pub fn report(&self) -> &StageReport {
        match self {
            StageDecision::Final(report) | StageDecision::RetryRequested(report) => report,
        }
    }

    pub fn into_report(self) -> StageReport {
        match self {
            StageDecision::Final(report) | StageDecision::RetryRequested(report) => report,
        }
    }
}

/// State shared by every stage of a run: the client, the log reader and
/// the compiled overrides
pub struct Session<'a> {
    config: &'a Config,
    overrides: OverrideRules,
    client: Client,
    log: Option<LogLines>,
}

impl<'a> Session<'a> {
    /// Compile overrides and prepare the log reader
    ///
    /// Outside cloud mode a log file must be configured.
    pub fn new(config: &'a Config) -> Result<Self> {
        let overrides = OverrideRules::compile(&config.testoverride)?;
        let log = if config.is_cloud_mode() {
            None
        } else {
            Some(LogLines::from_config(config)?)
        };
        Ok(Self {
            config,
            overrides,
            client: Client::new(ClientConfig::from_config(config)),
            log,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Drop the connection and release the log file
    pub fn close(&mut self) {
        self.client.close();
        tracing::debug!(
            connections = self.client.connections_opened(),
            requests = self.client.requests_sent(),
            "Session closed"
        );
        if let Some(log) = self.log.as_mut() {
            log.close();
        }
    }

    /// Run one stage of `test_id`
    ///
    /// Broken test definitions are returned as errors. Everything that goes
    /// wrong on the wire or in the log ends up in the report instead. The
    /// connection is closed when the stage ends, whatever the outcome.
    pub async fn run_stage(
        &mut self,
        test_id: &str,
        stage: &Stage,
        allow_retry: bool,
    ) -> Result<StageDecision> {
        let result = self.execute(test_id, stage, allow_retry).await;
        self.client.close();
        result
    }

    async fn execute(
        &mut self,
        test_id: &str,
        stage: &Stage,
        allow_retry: bool,
    ) -> Result<StageDecision> {
        let started = Instant::now();

        if let Some((verdict, reason)) = self.overrides.overridden(test_id) {
            tracing::info!(test = test_id, ?verdict, reason, "Result set by configuration");
            return Ok(StageDecision::Final(
                StageReport::new(verdict, started, Duration::ZERO).with_reason(reason),
            ));
        }

        let mut input = stage.input.clone();
        input.apply_overrides(&self.config.testoverride.input);
        input.check_sanity(test_id)?;
        let destination = input.destination()?;
        let request = input.request(test_id)?;
        let expectation = Expectation::from_output(&stage.output)?;

        let stage_id = Uuid::new_v4().to_string();
        tracing::debug!(test = test_id, stage_id = %stage_id, %destination, "Running stage");

        let mut start = None;
        if let Some(log) = self.log.as_mut() {
            log.set_start_marker(None);
            log.set_end_marker(None);
            match self.mark(&destination, &stage_id, None).await {
                Ok(marker) => {
                    self.set_marker(&marker, true);
                    start = Some(marker.offset);
                }
                Err(e) if expectation.expect_error => {
                    tracing::warn!(error = %e, "No start marker, continuing since an error is expected");
                }
                Err(e) => return Ok(hard_failure(started, Duration::ZERO, &e)),
            }
        }

        let mut round_trip = Duration::ZERO;
        let outcome = match self.client.connect(&destination).await {
            Ok(()) => {
                let result = self.client.send(&request).await;
                round_trip = self.client.round_trip_time();
                result
            }
            Err(e) => Err(e),
        };
        let (response, error) = match outcome {
            Ok(response) => (Some(response), None),
            Err(e) if expectation.expect_error => {
                tracing::debug!(error = %e, "Request failed as expected");
                (None, Some(e))
            }
            Err(e) => return Ok(hard_failure(started, round_trip, &e)),
        };

        if self.log.is_some() {
            match self.mark(&destination, &stage_id, start).await {
                Ok(marker) => self.set_marker(&marker, false),
                Err(e) if expectation.expect_error => {
                    tracing::warn!(error = %e, "No end marker, continuing since an error is expected");
                }
                Err(e) => return Ok(hard_failure(started, round_trip, &e)),
            }
        }

        let window = match self.log.as_mut() {
            Some(log) => match log.marked_lines() {
                Ok(window) => window,
                Err(e) => return Ok(hard_failure(started, round_trip, &e)),
            },
            None => LogWindow::default(),
        };

        let verdict = Check::new(&expectation, self.config.is_cloud_mode()).result(
            response.as_ref(),
            error.as_ref(),
            &window,
        );
        let mut report = StageReport::new(verdict, started, round_trip);
        if verdict == Verdict::Failed {
            report.reason = Some(failure_reason(&expectation, response.as_ref().map(|r| r.status)));
        }

        if verdict == Verdict::Failed && expectation.retry_once && allow_retry {
            tracing::info!(test = test_id, "Stage failed, retry requested");
            return Ok(StageDecision::RetryRequested(report));
        }
        Ok(StageDecision::Final(report))
    }

    /// Send probes until the WAF log shows the marker for `stage_id`
    ///
    /// Gives up after `max_marker_retries` probes. Only lines past byte
    /// offset `after` count. A reused connection that fails is replaced
    /// once; other connection errors end the search.
    async fn mark(
        &mut self,
        destination: &Destination,
        stage_id: &str,
        after: Option<u64>,
    ) -> Result<Marker> {
        let log = self.log.as_mut().ok_or(Error::LogFileNotConfigured)?;
        let probe = probe_request(&self.config.log_marker_header_name, stage_id);
        let attempts = self.config.max_marker_retries.max(1);

        for attempt in 1..=attempts {
            let reused = self.client.connect_or_reuse(destination).await?;
            if let Err(e) = self.client.send(&probe).await {
                if !reused {
                    return Err(e);
                }
                tracing::debug!(error = %e, "Reused connection failed, reconnecting");
                self.client.connect(destination).await?;
                self.client.send(&probe).await?;
            }
            if let Some(marker) = log.find_marker(stage_id, after)? {
                tracing::trace!(attempt, "Marker found");
                return Ok(marker);
            }
            tracing::trace!(attempt, "Marker not in log yet");
        }

        Err(Error::MarkerNotFound {
            stage_id: stage_id.to_string(),
            path: log.path().to_path_buf(),
        })
    }

    fn set_marker(&mut self, marker: &Marker, start: bool) {
        if let Some(log) = self.log.as_mut() {
            if start {
                log.set_start_marker(Some(&marker.line));
            } else {
                log.set_end_marker(Some(&marker.line));
            }
        }
    }
}

/// Request whose only purpose is to leave `stage_id` in the WAF log
pub fn probe_request(marker_header: &str, stage_id: &str) -> Request {
    let mut headers = Headers::new();
    headers.add("Accept", "*/*");
    headers.add("User-Agent", "wafprobe test agent");
    headers.add("Host", "localhost");
    headers.add(marker_header, stage_id);
    Request::structured(
        RequestLine::new("GET", "/status/200", "HTTP/1.1"),
        headers,
        Vec::new(),
        true,
    )
}

fn hard_failure(started: Instant, round_trip: Duration, error: &Error) -> StageDecision {
    tracing::error!(error = %error, "Stage failed");
    StageDecision::Final(
        StageReport::new(Verdict::Failed, started, round_trip).with_reason(error.to_string()),
    )
}

fn failure_reason(expectation: &Expectation, status: Option<u16>) -> String {
    if expectation.expect_error {
        return "expected an error, the request succeeded".to_string();
    }
    match (status, &expectation.status) {
        (None, _) => "no response".to_string(),
        (Some(status), Some(expected)) if !expected.matches(status) => {
            format!("unexpected status {}", status)
        }
        _ => "response or log expectations not met".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::TestOverride;
    use crate::common::RunMode;
    use crate::testing::{Input, Output};

    fn cloud_config() -> Config {
        Config {
            mode: RunMode::Cloud,
            ..Config::default()
        }
    }

    fn stage(input: Input) -> Stage {
        Stage {
            input,
            output: Output::default(),
        }
    }

    #[test]
    fn test_probe_request_carries_marker() {
        let probe = probe_request("X-CRS-Test", "abc-123");
        let bytes = probe.to_bytes(&Destination::new("waf", 80, crate::http::Protocol::Http));
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("GET /status/200 HTTP/1.1\r\n"));
        assert!(text.contains("X-CRS-Test: abc-123\r\n"));
        assert!(text.contains("Host: localhost\r\n"));
        assert!(!text.contains("Host: waf"));
    }

    #[test]
    fn test_session_needs_log_file_outside_cloud_mode() {
        let err = Session::new(&Config::default()).err().unwrap();
        assert!(matches!(err, Error::LogFileNotConfigured));
        assert!(Session::new(&cloud_config()).is_ok());
    }

    #[tokio::test]
    async fn test_override_sends_nothing() {
        let config = Config {
            testoverride: TestOverride {
                ignore: vec![("^920".to_string(), "known issue".to_string())],
                ..TestOverride::default()
            },
            ..cloud_config()
        };
        let mut session = Session::new(&config).unwrap();

        // Port 9 on a TEST-NET address; never contacted
        let input = Input {
            dest_addr: Some("192.0.2.1".to_string()),
            port: Some(9),
            ..Input::default()
        };
        let decision = session.run_stage("920100-1", &stage(input), true).await.unwrap();
        let StageDecision::Final(report) = decision else {
            panic!("override must be final");
        };
        assert_eq!(report.verdict, Verdict::Ignored);
        assert_eq!(report.reason.as_deref(), Some("known issue"));
        assert_eq!(session.client().connections_opened(), 0);
        assert_eq!(session.client().requests_sent(), 0);
    }

    #[tokio::test]
    async fn test_bad_input_is_an_error_before_any_traffic() {
        let config = cloud_config();
        let mut session = Session::new(&config).unwrap();
        let input = Input {
            data: Some("a=b".to_string()),
            raw_request: Some("GET / HTTP/1.1\r\n\r\n".to_string()),
            ..Input::default()
        };
        let err = session.run_stage("1-1", &stage(input), true).await.unwrap_err();
        assert!(err.is_definition_error());
        assert_eq!(session.client().connections_opened(), 0);
    }

    #[test]
    fn test_failure_reason() {
        let expectation = Expectation {
            status: Some(crate::testing::StatusExpectation::One(403)),
            ..Expectation::default()
        };
        assert_eq!(failure_reason(&expectation, Some(200)), "unexpected status 200");
        assert_eq!(failure_reason(&expectation, None), "no response");
        assert_eq!(
            failure_reason(&expectation, Some(403)),
            "response or log expectations not met"
        );
    }
}

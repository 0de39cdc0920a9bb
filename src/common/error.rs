//! Error types for wafprobe
//!
//! Errors fall into a few families that the runner treats differently:
//! definition errors abort the run, connectivity errors feed the
//! `expect_error` criterion, and marker errors fail the current stage.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for wafprobe
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Test Definition Errors ===
    #[error("Bad test input in '{test}': choose only one of data, encoded_request or raw_request")]
    BadTestInput { test: String },

    #[error("Invalid regular expression '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("Failed to parse test file '{path}': {reason}")]
    TestParse { path: String, reason: String },

    #[error("Invalid encoded_request in '{test}': {reason}")]
    BadEncodedRequest { test: String, reason: String },

    // === Connectivity Errors ===
    #[error("Can't connect to {destination}: {source}")]
    ConnectFailed {
        destination: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection to {destination} timed out after {}ms", .timeout.as_millis())]
    ConnectTimeout {
        destination: String,
        timeout: Duration,
    },

    #[error("Timed out after {}ms waiting for a response", .0.as_millis())]
    ReadTimeout(Duration),

    #[error("Failed sending request: {0}")]
    Send(#[source] io::Error),

    #[error("Malformed HTTP response: {0}")]
    MalformedResponse(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("No open connection. Connect to a destination first")]
    NotConnected,

    // === Log Scanner Errors ===
    #[error("Log file '{}' is not available: {source}", .path.display())]
    LogFileUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No log file configured. Set 'logfile' in the configuration or run in cloud mode")]
    LogFileNotConfigured,

    #[error("Can't find log marker for stage {stage_id}. Am I reading the correct log? Log file: {}", .path.display())]
    MarkerNotFound { stage_id: String, path: PathBuf },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid regex error from a pattern and the compiler's complaint
    pub fn invalid_regex(pattern: &str, err: &regex::Error) -> Self {
        Self::InvalidRegex {
            pattern: pattern.to_string(),
            reason: err.to_string(),
        }
    }

    /// Create a test parse error for a file
    pub fn test_parse<S: ToString>(path: &std::path::Path, reason: S) -> Self {
        Self::TestParse {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Errors caused by a broken test definition. These abort the run.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            Error::BadTestInput { .. }
                | Error::InvalidRegex { .. }
                | Error::TestParse { .. }
                | Error::BadEncodedRequest { .. }
        )
    }

    /// Errors raised while talking to the target
    pub fn is_connectivity_error(&self) -> bool {
        matches!(
            self,
            Error::ConnectFailed { .. }
                | Error::ConnectTimeout { .. }
                | Error::ReadTimeout(_)
                | Error::Send(_)
                | Error::MalformedResponse(_)
                | Error::Tls(_)
                | Error::NotConnected
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ConnectTimeout { .. } | Error::ReadTimeout(_))
    }
}

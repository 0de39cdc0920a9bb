//! Test file schema
//!
//! Defines the data structures for deserializing YAML test files, and
//! turns a stage input into a destination and a request.

use base64::Engine as _;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::common::config::InputOverride;
use crate::common::{Error, Result};
use crate::http::{Destination, Headers, Protocol, Request, RequestLine};

/// A test file: metadata plus a list of test cases
#[derive(Deserialize, Debug)]
pub struct TestFile {
    /// Where the file was loaded from
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(default)]
    pub meta: Meta,
    pub tests: Vec<TestCase>,
}

#[derive(Deserialize, Debug)]
pub struct Meta {
    pub author: Option<String>,
    pub description: Option<String>,
    /// Disabled files are reported as skipped
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub name: Option<String>,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            author: None,
            description: None,
            enabled: true,
            name: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// One test case: a sequence of stages run in order
#[derive(Deserialize, Debug)]
pub struct TestCase {
    /// Explicit identifier, e.g. "920100-1"
    pub test_title: Option<String>,
    /// Rule and test number, combined as "<rule_id>-<test_id>"
    pub rule_id: Option<u32>,
    pub test_id: Option<u32>,
    pub desc: Option<String>,
    pub stages: Vec<Stage>,
}

impl TestCase {
    /// Identifier that include/exclude filters and overrides match against
    pub fn id(&self) -> String {
        match (&self.test_title, self.rule_id, self.test_id) {
            (Some(title), _, _) => title.clone(),
            (None, Some(rule), Some(test)) => format!("{}-{}", rule, test),
            (None, Some(rule), None) => rule.to_string(),
            _ => "unnamed".to_string(),
        }
    }
}

/// One request/response/assertion cycle
#[derive(Deserialize, Debug)]
pub struct Stage {
    #[serde(default)]
    pub input: Input,
    #[serde(default)]
    pub output: Output,
}

/// What to send
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Input {
    pub dest_addr: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub method: Option<String>,
    pub uri: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub headers: Headers,
    /// Request body
    pub data: Option<String>,
    /// Base64 of a complete raw request
    pub encoded_request: Option<String>,
    /// Complete raw request, sent as-is
    pub raw_request: Option<String>,
    /// Add Host and Content-Length if missing (default true)
    pub autocomplete_headers: Option<bool>,
}

impl Input {
    pub fn dest_addr(&self) -> &str {
        self.dest_addr.as_deref().unwrap_or("localhost")
    }

    pub fn protocol(&self) -> Result<Protocol> {
        self.protocol.as_deref().unwrap_or("http").parse()
    }

    pub fn port(&self) -> Result<u16> {
        Ok(match self.port {
            Some(port) => port,
            None => self.protocol()?.default_port(),
        })
    }

    pub fn method(&self) -> &str {
        self.method.as_deref().unwrap_or("GET")
    }

    pub fn uri(&self) -> &str {
        self.uri.as_deref().unwrap_or("/")
    }

    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or("HTTP/1.1")
    }

    pub fn autocomplete_headers(&self) -> bool {
        self.autocomplete_headers.unwrap_or(true)
    }

    /// Replace fields with the ones forced by the configuration
    pub fn apply_overrides(&mut self, overrides: &InputOverride) {
        if let Some(addr) = &overrides.dest_addr {
            self.dest_addr = Some(addr.clone());
        }
        if let Some(port) = overrides.port {
            self.port = Some(port);
        }
        if let Some(protocol) = &overrides.protocol {
            self.protocol = Some(protocol.clone());
        }
        if let Some(method) = &overrides.method {
            self.method = Some(method.clone());
        }
        if let Some(uri) = &overrides.uri {
            self.uri = Some(uri.clone());
        }
        if let Some(version) = &overrides.version {
            self.version = Some(version.clone());
        }
        if let Some(headers) = &overrides.headers {
            self.headers.merge(headers);
        }
        if let Some(autocomplete) = overrides.autocomplete_headers {
            self.autocomplete_headers = Some(autocomplete);
        }
    }

    /// Reject inputs that name more than one request source
    pub fn check_sanity(&self, test_id: &str) -> Result<()> {
        let sources = [
            self.data.as_deref().is_some_and(|d| !d.is_empty()),
            self.encoded_request.as_deref().is_some_and(|r| !r.is_empty()),
            self.raw_request.as_deref().is_some_and(|r| !r.is_empty()),
        ];
        if sources.iter().filter(|set| **set).count() > 1 {
            return Err(Error::BadTestInput {
                test: test_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn destination(&self) -> Result<Destination> {
        Ok(Destination::new(self.dest_addr(), self.port()?, self.protocol()?))
    }

    /// Build the request; a raw or encoded request wins over the other fields
    pub fn request(&self, test_id: &str) -> Result<Request> {
        if let Some(raw) = self.raw_bytes(test_id)? {
            return Ok(Request::raw(raw));
        }
        Ok(Request::structured(
            RequestLine::new(self.method(), self.uri(), self.version()),
            self.headers.clone(),
            self.data.clone().unwrap_or_default().into_bytes(),
            self.autocomplete_headers(),
        ))
    }

    fn raw_bytes(&self, test_id: &str) -> Result<Option<Vec<u8>>> {
        if let Some(encoded) = self.encoded_request.as_deref().filter(|e| !e.is_empty()) {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| Error::BadEncodedRequest {
                    test: test_id.to_string(),
                    reason: e.to_string(),
                })?;
            return Ok(Some(decoded));
        }
        Ok(self
            .raw_request
            .as_deref()
            .filter(|r| !r.is_empty())
            .map(|r| r.as_bytes().to_vec()))
    }
}

/// What to expect
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Output {
    pub status: Option<StatusExpectation>,
    pub response_contains: Option<String>,
    /// Regex that must match a log line of the stage
    pub log_contains: Option<String>,
    /// Regex that must not match any log line of the stage
    pub no_log_contains: Option<String>,
    pub log: Option<LogExpectation>,
    /// The request is expected to fail at the connection level
    pub expect_error: Option<bool>,
    /// Run the stage a second time if it fails
    pub retry_once: Option<bool>,
}

impl Output {
    pub fn expects_error(&self) -> bool {
        self.expect_error.unwrap_or(false)
    }

    pub fn retries_once(&self) -> bool {
        self.retry_once.unwrap_or(false)
    }
}

/// Accepted status codes: one code or a list
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum StatusExpectation {
    One(u16),
    AnyOf(Vec<u16>),
}

impl StatusExpectation {
    pub fn matches(&self, status: u16) -> bool {
        match self {
            StatusExpectation::One(code) => *code == status,
            StatusExpectation::AnyOf(codes) => codes.contains(&status),
        }
    }
}

/// Structured log expectations
#[derive(Deserialize, Debug, Clone, Default)]
pub struct LogExpectation {
    /// Rule ids that must appear, as `id "<n>"`
    #[serde(default)]
    pub expect_ids: Vec<u32>,
    /// Rule ids that must not appear
    #[serde(default)]
    pub no_expect_ids: Vec<u32>,
    pub match_regex: Option<String>,
    pub no_match_regex: Option<String>,
}

impl TestFile {
    /// Load and parse one test file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let mut file = Self::from_yaml_str(path, &content)?;
        file.path = path.to_path_buf();
        Ok(file)
    }

    pub fn from_yaml_str(path: &Path, content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::test_parse(path, e))
    }

    /// Display name: `meta.name`, else the file name
    pub fn name(&self) -> String {
        match &self.meta.name {
            Some(name) => name.clone(),
            None => self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.path.display().to_string()),
        }
    }
}

/// Load test files from files and directories
///
/// Directories are searched recursively for `.yaml`/`.yml` files. Files
/// are returned sorted by path so runs are reproducible.
pub fn load_tests(paths: &[PathBuf]) -> Result<Vec<TestFile>> {
    let mut files = Vec::new();
    for path in paths {
        collect_yaml_files(path, &mut files)?;
    }
    files.sort();
    files.dedup();

    if files.is_empty() {
        return Err(Error::Config(format!(
            "No test files found in {}",
            paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    files.iter().map(|p| TestFile::load(p)).collect()
}

fn collect_yaml_files(path: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if path.is_file() {
        out.push(path.to_path_buf());
        return Ok(());
    }
    let entries = std::fs::read_dir(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    for entry in entries {
        let entry_path = entry?.path();
        if entry_path.is_dir() {
            collect_yaml_files(&entry_path, out)?;
        } else if matches!(
            entry_path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        ) {
            out.push(entry_path);
        }
    }
    Ok(())
}

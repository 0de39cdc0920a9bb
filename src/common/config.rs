//! Configuration file handling

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use super::paths::find_config;
use super::{Error, Result};
use crate::http::Headers;

/// Prefix for environment variable overrides
const ENV_PREFIX: &str = "WAFPROBE_";

/// Main configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    /// WAF log file to correlate stages against
    #[serde(default)]
    pub logfile: Option<PathBuf>,

    /// Header carrying the stage marker on probe requests
    #[serde(default = "default_marker_header")]
    pub log_marker_header_name: String,

    /// How many probe requests to send before giving up on a marker
    #[serde(default = "default_max_marker_retries")]
    pub max_marker_retries: u32,

    /// How many log lines to inspect, from the end, per marker search
    #[serde(default = "default_max_marker_log_lines")]
    pub max_marker_log_lines: usize,

    /// Run mode: "default" or "cloud"
    #[serde(default)]
    pub mode: RunMode,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Minimum spacing between requests, in milliseconds
    #[serde(default)]
    pub rate_limit_ms: Option<u64>,

    /// Accept any TLS certificate presented by the target
    #[serde(default = "default_insecure_tls")]
    pub insecure_tls: bool,

    /// Overrides applied to test inputs and results
    #[serde(default)]
    pub testoverride: TestOverride,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logfile: None,
            log_marker_header_name: default_marker_header(),
            max_marker_retries: default_max_marker_retries(),
            max_marker_log_lines: default_max_marker_log_lines(),
            mode: RunMode::default(),
            timeouts: Timeouts::default(),
            rate_limit_ms: None,
            insecure_tls: default_insecure_tls(),
            testoverride: TestOverride::default(),
        }
    }
}

fn default_marker_header() -> String {
    "X-CRS-Test".to_string()
}
fn default_max_marker_retries() -> u32 {
    20
}
fn default_max_marker_log_lines() -> usize {
    500
}
fn default_insecure_tls() -> bool {
    true
}

/// Whether the harness can read the WAF log
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Log file is local; stages are bracketed with markers
    #[default]
    Default,
    /// Managed WAF without log access; only response checks apply
    Cloud,
}

impl FromStr for RunMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "default" | "" => Ok(RunMode::Default),
            "cloud" => Ok(RunMode::Cloud),
            other => Err(Error::Config(format!(
                "Unknown run mode '{}'. Supported modes: 'default', 'cloud'",
                other
            ))),
        }
    }
}

/// Timeout settings in milliseconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,

    #[serde(default = "default_read_ms")]
    pub read_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_ms(),
            read_ms: default_read_ms(),
        }
    }
}

impl Timeouts {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }
}

fn default_connect_ms() -> u64 {
    3000
}
fn default_read_ms() -> u64 {
    1000
}

/// Overrides applied on top of every test file
#[derive(Debug, Deserialize, Default)]
pub struct TestOverride {
    /// Input fields replacing what the test files say
    #[serde(default)]
    pub input: InputOverride,

    /// Test id regex -> reason; matching tests are reported as ignored
    #[serde(default, deserialize_with = "ordered_pairs")]
    pub ignore: Vec<(String, String)>,

    /// Test id regex -> reason; matching tests are reported as passed
    #[serde(default, deserialize_with = "ordered_pairs")]
    pub forcepass: Vec<(String, String)>,

    /// Test id regex -> reason; matching tests are reported as failed
    #[serde(default, deserialize_with = "ordered_pairs")]
    pub forcefail: Vec<(String, String)>,
}

/// Stage input fields that can be forced from the configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct InputOverride {
    pub dest_addr: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub method: Option<String>,
    pub uri: Option<String>,
    pub version: Option<String>,
    /// Merged into the stage headers, replacing same-named ones
    pub headers: Option<Headers>,
    pub autocomplete_headers: Option<bool>,
}

impl Config {
    /// Load configuration from an explicit file or the default locations
    ///
    /// Returns default configuration if no file is found. Environment
    /// overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) if !p.is_file() => {
                return Err(Error::Config(format!(
                    "Configuration file '{}' does not exist",
                    p.display()
                )))
            }
            Some(p) => Some(p.to_path_buf()),
            None => find_config(),
        };

        let mut config = match path {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading configuration");
                Self::from_file(&path)?
            }
            None => Self::default(),
        };

        config.apply_env(std::env::vars())?;
        Ok(config)
    }

    /// Parse a configuration file, YAML or TOML by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Apply `WAFPROBE_*` overrides from an environment snapshot
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name.to_ascii_lowercase().as_str() {
                "logfile" => self.logfile = Some(PathBuf::from(value)),
                "log_marker_header_name" => self.log_marker_header_name = value,
                "mode" => self.mode = value.parse()?,
                "max_marker_retries" => {
                    self.max_marker_retries = parse_env_number(&key, &value)?;
                }
                "max_marker_log_lines" => {
                    self.max_marker_log_lines = parse_env_number(&key, &value)?;
                }
                _ => tracing::debug!(variable = %key, "Ignoring unknown environment override"),
            }
        }
        Ok(())
    }

    pub fn is_cloud_mode(&self) -> bool {
        self.mode == RunMode::Cloud
    }

    pub fn rate_limit(&self) -> Option<Duration> {
        self.rate_limit_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

fn parse_env_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a number, got '{}'", key, value)))
}

/// Deserialize a mapping into `(key, value)` pairs, keeping file order
pub(crate) fn ordered_pairs<'de, D>(deserializer: D) -> std::result::Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PairsVisitor;

    impl<'de> Visitor<'de> for PairsVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a mapping of strings")
        }

        fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((k, v)) = map.next_entry::<String, String>()? {
                pairs.push((k, v));
            }
            Ok(pairs)
        }
    }

    deserializer.deserialize_any(PairsVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML_CONFIG: &str = r#"
logfile: 'tests/logs/modsec2-apache/apache2/error.log'
log_marker_header_name: X-Marker
mode: cloud
timeouts:
  connect_ms: 500
testoverride:
  input:
    dest_addr: 'httpbin.org'
    port: 1234
  ignore:
    '920400-1': 'This test result must be ignored'
    '^941': 'XSS rules are broken on this engine'
  forcefail:
    '932200-2': 'Known false negative'
"#;

    #[test]
    fn test_yaml_config() {
        let config = Config::from_yaml_str(YAML_CONFIG).unwrap();
        assert_eq!(
            config.logfile,
            Some(PathBuf::from("tests/logs/modsec2-apache/apache2/error.log"))
        );
        assert_eq!(config.log_marker_header_name, "X-Marker");
        assert!(config.is_cloud_mode());
        assert_eq!(config.timeouts.connect(), Duration::from_millis(500));
        assert_eq!(config.timeouts.read(), Duration::from_millis(1000));
        assert_eq!(config.testoverride.input.dest_addr.as_deref(), Some("httpbin.org"));
        assert_eq!(config.testoverride.input.port, Some(1234));
    }

    #[test]
    fn test_override_order_is_preserved() {
        let config = Config::from_yaml_str(YAML_CONFIG).unwrap();
        let ignore = &config.testoverride.ignore;
        assert_eq!(ignore.len(), 2);
        assert_eq!(ignore[0].0, "920400-1");
        assert_eq!(ignore[0].1, "This test result must be ignored");
        assert_eq!(ignore[1].0, "^941");
        assert_eq!(config.testoverride.forcefail.len(), 1);
        assert!(config.testoverride.forcepass.is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml_str("{}").unwrap();
        assert_eq!(config.log_marker_header_name, "X-CRS-Test");
        assert_eq!(config.max_marker_retries, 20);
        assert_eq!(config.max_marker_log_lines, 500);
        assert_eq!(config.mode, RunMode::Default);
        assert!(config.insecure_tls);
        assert_eq!(config.rate_limit(), None);
    }

    #[test]
    fn test_toml_config() {
        let config = Config::from_toml_str(
            r#"
logfile = "/var/log/nginx/error.log"
rate_limit_ms = 250

[testoverride.forcepass]
"920100-1" = "flaky upstream"
"#,
        )
        .unwrap();
        assert_eq!(config.rate_limit(), Some(Duration::from_millis(250)));
        assert_eq!(config.testoverride.forcepass[0].0, "920100-1");
    }

    #[test]
    fn test_bad_config_is_rejected() {
        let err = Config::from_yaml_str("mode: [1, 2]").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(vec![
                ("WAFPROBE_LOGFILE".to_string(), "/tmp/error.log".to_string()),
                ("WAFPROBE_MODE".to_string(), "Cloud".to_string()),
                ("WAFPROBE_MAX_MARKER_LOG_LINES".to_string(), "42".to_string()),
                ("HOME".to_string(), "/root".to_string()),
            ])
            .unwrap();
        assert_eq!(config.logfile, Some(PathBuf::from("/tmp/error.log")));
        assert!(config.is_cloud_mode());
        assert_eq!(config.max_marker_log_lines, 42);

        let err = config
            .apply_env(vec![("WAFPROBE_MAX_MARKER_RETRIES".to_string(), "lots".to_string())])
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/wafprobe.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}

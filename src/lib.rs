//! wafprobe - a WAF compliance test harness
//!
//! Runs YAML-described HTTP test cases against a web application firewall
//! and decides pass/fail from the response and from the WAF's log lines
//! attributed to each request.

pub mod check;
pub mod cli;
pub mod commands;
pub mod common;
pub mod http;
pub mod logscan;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};

//! Configuration file locations
//!
//! A `.wafprobe.yaml` next to the test suite wins; otherwise the
//! platform config directory is searched:
//! - Linux: `~/.config/wafprobe/`
//! - macOS: `~/Library/Application Support/wafprobe/`
//! - Windows: `%APPDATA%\wafprobe\`

use std::path::PathBuf;

const APP_NAME: &str = "wafprobe";

/// Name of the per-project configuration file
pub const LOCAL_CONFIG_FILE: &str = ".wafprobe.yaml";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Candidate configuration files, in lookup order
pub fn config_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
    if let Some(dir) = config_dir() {
        candidates.push(dir.join("config.yaml"));
        candidates.push(dir.join("config.toml"));
    }
    candidates
}

/// First configuration file that exists on disk
pub fn find_config() -> Option<PathBuf> {
    config_candidates().into_iter().find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_config_is_searched_first() {
        let candidates = config_candidates();
        assert_eq!(candidates[0], PathBuf::from(LOCAL_CONFIG_FILE));
    }
}

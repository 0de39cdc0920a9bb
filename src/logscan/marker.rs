//! Marker search and evidence windows over the WAF log
//!
//! Every stage is bracketed by two probe requests carrying the marker
//! header. The WAF echoes the header into its log, so the log lines
//! between the two echoes belong to the stage's real request.

use std::fs::File;
use std::path::{Path, PathBuf};

use regex::bytes::Regex;

use super::backscan::BackScanner;
use crate::common::{Config, Error, Result};

/// Log lines attributed to one stage, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogWindow {
    lines: Vec<Vec<u8>>,
}

impl LogWindow {
    pub fn new(lines: Vec<Vec<u8>>) -> Self {
        Self { lines }
    }

    /// Whether any line matches `pattern`
    pub fn contains(&self, pattern: &Regex) -> bool {
        self.lines.iter().any(|line| pattern.is_match(line))
    }

    pub fn lines(&self) -> &[Vec<u8>] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// A marker line located in the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    /// The line, lowercased
    pub line: Vec<u8>,
    /// Byte offset of the start of the line
    pub offset: u64,
}

/// Reader for the WAF log file, owned by the run
///
/// The file is opened on first use and kept open until [`LogLines::close`].
pub struct LogLines {
    path: PathBuf,
    file: Option<File>,
    marker_header: Vec<u8>,
    max_marker_lines: usize,
    start_marker: Option<Vec<u8>>,
    end_marker: Option<Vec<u8>>,
}

impl LogLines {
    pub fn new(path: impl Into<PathBuf>, marker_header: &str, max_marker_lines: usize) -> Self {
        Self {
            path: path.into(),
            file: None,
            marker_header: marker_header.to_ascii_lowercase().into_bytes(),
            max_marker_lines,
            start_marker: None,
            end_marker: None,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let path = config.logfile.as_ref().ok_or(Error::LogFileNotConfigured)?;
        Ok(Self::new(
            path,
            &config.log_marker_header_name,
            config.max_marker_log_lines,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> Result<&mut File> {
        if self.file.is_none() {
            let file = File::open(&self.path).map_err(|source| Error::LogFileUnavailable {
                path: self.path.clone(),
                source,
            })?;
            tracing::debug!(path = %self.path.display(), "Opened log file");
            self.file = Some(file);
        }
        self.file.as_mut().ok_or(Error::LogFileNotConfigured)
    }

    /// Find the newest log line echoing the marker for `stage_id`
    ///
    /// At most `max_marker_lines` lines are inspected, counting back from
    /// the end of the file. With `after` set, only lines starting past that
    /// byte offset qualify, so the end-of-stage search cannot return the
    /// start marker even when the WAF logged both probes identically.
    pub fn find_marker(&mut self, stage_id: &str, after: Option<u64>) -> Result<Option<Marker>> {
        let max_lines = self.max_marker_lines;
        let header = self.marker_header.clone();
        let stage_id = stage_id.to_ascii_lowercase().into_bytes();

        let file = self.file()?;
        let mut scanner = BackScanner::from_end(file)?;

        let mut inspected = 0;
        while let Some((offset, line)) = scanner.next_line_at()? {
            if inspected >= max_lines {
                tracing::debug!(max_lines, "Marker search limit reached");
                break;
            }
            inspected += 1;
            if after.is_some_and(|after| offset <= after) {
                break;
            }
            let line = line.to_ascii_lowercase();
            if contains(&line, &header) && contains(&line, &stage_id) {
                tracing::trace!(offset, line = %String::from_utf8_lossy(&line), "Found marker");
                return Ok(Some(Marker { line, offset }));
            }
        }
        Ok(None)
    }

    /// Marker line preceding the stage's evidence
    pub fn set_start_marker(&mut self, marker: Option<&[u8]>) {
        self.start_marker = marker.map(<[u8]>::to_ascii_lowercase);
    }

    /// Marker line following the stage's evidence
    pub fn set_end_marker(&mut self, marker: Option<&[u8]>) {
        self.end_marker = marker.map(<[u8]>::to_ascii_lowercase);
    }

    pub fn start_marker(&self) -> Option<&[u8]> {
        self.start_marker.as_deref()
    }

    pub fn end_marker(&self) -> Option<&[u8]> {
        self.end_marker.as_deref()
    }

    /// Collect the lines strictly between the start and end markers
    ///
    /// Scanning runs backwards, so the end marker is met first; lines are
    /// collected from there until the start marker. A missing start marker
    /// extends the window to the beginning of the file. Without an end
    /// marker, or if it is not in the file, the window is empty.
    pub fn marked_lines(&mut self) -> Result<LogWindow> {
        let Some(end) = self.end_marker.clone() else {
            return Ok(LogWindow::default());
        };
        let start = self.start_marker.clone();

        let file = self.file()?;
        let scanner = BackScanner::from_end(file)?;

        let mut found = Vec::new();
        let mut end_found = false;
        for line in scanner {
            let line = line?;
            let lower = line.to_ascii_lowercase();
            if !end_found {
                end_found = lower == end;
                continue;
            }
            if start.as_deref() == Some(lower.as_slice()) {
                break;
            }
            found.push(line);
        }

        if !end_found {
            tracing::warn!(path = %self.path.display(), "End marker not found in log file");
        }
        found.reverse();
        tracing::trace!(lines = found.len(), "Collected marked log lines");
        Ok(LogWindow::new(found))
    }

    /// Whether any line between the markers matches `pattern`
    ///
    /// A pattern that does not compile is a broken test definition and is
    /// reported as an error, never as "no match".
    pub fn contains(&mut self, pattern: &str) -> Result<bool> {
        let regex = Regex::new(pattern).map_err(|e| Error::invalid_regex(pattern, &e))?;
        Ok(self.marked_lines()?.contains(&regex))
    }

    /// Release the file handle. Safe to call more than once.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            tracing::debug!(path = %self.path.display(), "Closed log file");
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HEADER: &str = "X-CRS-Test";

    fn log_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn marker(n: u32, stage: &str) -> String {
        format!(
            "2021/03/16 12:40:{:02} [info] ModSecurity: Warning. [id \"999999\"] X-CRS-Test: {} [uri \"/status/200\"]",
            n, stage
        )
    }

    #[test]
    fn test_find_marker_is_case_insensitive() {
        let content = format!("noise\n{}\nmore noise\n", marker(1, "ABC-123"));
        let file = log_file(&content);
        let mut log = LogLines::new(file.path(), "x-crs-test", 10);

        let found = log.find_marker("abc-123", None).unwrap().unwrap();
        assert_eq!(found.line, marker(1, "ABC-123").to_ascii_lowercase().into_bytes());
        assert_eq!(found.offset, "noise\n".len() as u64);
        assert!(log.find_marker("other", None).unwrap().is_none());
    }

    #[test]
    fn test_find_marker_respects_line_limit() {
        let mut content = format!("{}\n", marker(1, "stage"));
        for i in 0..20 {
            content.push_str(&format!("filler line {}\n", i));
        }
        let file = log_file(&content);

        let mut log = LogLines::new(file.path(), HEADER, 20);
        assert!(log.find_marker("stage", None).unwrap().is_none());

        let mut log = LogLines::new(file.path(), HEADER, 21);
        assert!(log.find_marker("stage", None).unwrap().is_some());
    }

    #[test]
    fn test_find_marker_ignores_lines_before_offset() {
        let start = marker(1, "stage");
        let content = format!("{}\nevidence\n", start);
        let file = log_file(&content);
        let mut log = LogLines::new(file.path(), HEADER, 100);

        let found = log.find_marker("stage", None).unwrap().unwrap();
        assert_eq!(found.offset, 0);
        assert!(log.find_marker("stage", Some(found.offset)).unwrap().is_none());
    }

    #[test]
    fn test_identical_marker_lines_are_told_apart_by_position() {
        // Second-resolution logs write the same line for both markers
        let line = "127.0.0.1 - - [16/Mar/2021:12:40:01] \"GET /status/200\" x-crs-test: s1";
        let mut file = log_file(&format!("older traffic\n{}\n", line));
        let mut log = LogLines::new(file.path(), HEADER, 100);

        let start = log.find_marker("s1", None).unwrap().unwrap();
        assert_eq!(start.offset, "older traffic\n".len() as u64);

        write!(file, "[id \"942100\"] evidence\n{}\n", line).unwrap();
        file.flush().unwrap();

        let end = log
            .find_marker("s1", Some(start.offset))
            .unwrap()
            .expect("end marker");
        assert!(end.offset > start.offset);
        assert_eq!(end.line, start.line);

        log.set_start_marker(Some(&start.line));
        log.set_end_marker(Some(&end.line));
        assert_eq!(log.start_marker(), log.end_marker());
        let window = log.marked_lines().unwrap();
        assert_eq!(window.lines(), &[b"[id \"942100\"] evidence".to_vec()]);
    }

    #[test]
    fn test_marked_lines_between_markers() {
        let content = format!(
            "old evidence\n{}\n[id \"911100\"] first\n[id \"920300\"] second\n{}\nlater traffic\n",
            marker(1, "s1"),
            marker(2, "s1")
        );
        let file = log_file(&content);
        let mut log = LogLines::new(file.path(), HEADER, 100);
        let end = log.find_marker("s1", None).unwrap().unwrap();
        log.set_end_marker(Some(&end.line));
        log.set_start_marker(Some(marker(1, "s1").as_bytes()));

        let window = log.marked_lines().unwrap();
        assert_eq!(
            window.lines(),
            &[b"[id \"911100\"] first".to_vec(), b"[id \"920300\"] second".to_vec()]
        );
        assert!(log.contains(r#"id "911100""#).unwrap());
        assert!(!log.contains("later traffic").unwrap());
        assert!(!log.contains("old evidence").unwrap());
    }

    #[test]
    fn test_missing_start_marker_reads_to_beginning() {
        let content = format!("first\nsecond\n{}\n", marker(2, "s1"));
        let file = log_file(&content);
        let mut log = LogLines::new(file.path(), HEADER, 100);
        log.set_end_marker(Some(marker(2, "s1").as_bytes()));

        let window = log.marked_lines().unwrap();
        assert_eq!(window.lines(), &[b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn test_no_end_marker_means_empty_window() {
        let file = log_file("a\nb\n");
        let mut log = LogLines::new(file.path(), HEADER, 100);
        assert!(log.marked_lines().unwrap().is_empty());

        log.set_end_marker(Some(b"not in the file"));
        assert!(log.marked_lines().unwrap().is_empty());
    }

    #[test]
    fn test_window_is_stable_for_unchanged_file() {
        let content = format!("{}\nx\ny\n{}\n", marker(1, "s"), marker(2, "s"));
        let file = log_file(&content);
        let mut log = LogLines::new(file.path(), HEADER, 100);
        log.set_start_marker(Some(marker(1, "s").as_bytes()));
        log.set_end_marker(Some(marker(2, "s").as_bytes()));

        let first = log.marked_lines().unwrap();
        let second = log.marked_lines().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_bad_regex_is_an_error() {
        let file = log_file("a\n");
        let mut log = LogLines::new(file.path(), HEADER, 100);
        let err = log.contains("([").unwrap_err();
        assert!(err.is_definition_error());
    }

    #[test]
    fn test_missing_log_file() {
        let mut log = LogLines::new("/nonexistent/waf/error.log", HEADER, 100);
        let err = log.find_marker("x", None).unwrap_err();
        assert!(matches!(err, Error::LogFileUnavailable { .. }));
    }

    #[test]
    fn test_close_is_idempotent() {
        let file = log_file("a\n");
        let mut log = LogLines::new(file.path(), HEADER, 100);
        log.find_marker("x", None).unwrap();
        log.close();
        log.close();
        // Reopens lazily
        assert!(log.find_marker("x", None).unwrap().is_none());
    }
}

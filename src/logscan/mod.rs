//! WAF log correlation
//!
//! Locates the marker lines that bracket a stage and extracts the log
//! lines between them, reading the file backwards from its end.

mod backscan;
mod marker;

pub use backscan::{BackScanner, DEFAULT_CHUNK_SIZE};
pub use marker::{LogLines, LogWindow, Marker};

//! Run statistics

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::check::Verdict;

/// Timing and outcome of one executed stage
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub test_id: String,
    /// 1-based position in the test case
    pub stage: usize,
    pub verdict: Verdict,
    #[serde(serialize_with = "as_millis")]
    pub duration: Duration,
    #[serde(serialize_with = "as_millis")]
    pub round_trip: Duration,
    /// Why the stage ended the way it did, when there is more to say
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Aggregated results of a run
#[derive(Debug, Default, Serialize)]
pub struct RunStats {
    /// Test cases executed (not skipped)
    pub run: usize,
    pub success: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    pub ignored: Vec<String>,
    pub forced_pass: Vec<String>,
    pub forced_fail: Vec<String>,
    pub stages: Vec<StageRecord>,
    #[serde(serialize_with = "map_as_millis")]
    pub run_time: BTreeMap<String, Duration>,
    #[serde(serialize_with = "as_millis")]
    pub total_time: Duration,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the final verdict of a test case
    pub fn add_result(&mut self, verdict: Verdict, test_id: &str) {
        let id = test_id.to_string();
        match verdict {
            Verdict::Success => self.success.push(id),
            Verdict::Failed => self.failed.push(id),
            Verdict::Skipped => {
                self.skipped.push(id);
                return;
            }
            Verdict::Ignored => self.ignored.push(id),
            Verdict::ForcePass => self.forced_pass.push(id),
            Verdict::ForceFail => self.forced_fail.push(id),
        }
        self.run += 1;
    }

    pub fn add_stage(&mut self, record: StageRecord) {
        *self.run_time.entry(record.test_id.clone()).or_default() += record.duration;
        self.total_time += record.duration;
        self.stages.push(record);
    }

    pub fn total_failed(&self) -> usize {
        self.failed.len() + self.forced_fail.len()
    }

    pub fn count(&self, verdict: Verdict) -> usize {
        match verdict {
            Verdict::Success => self.success.len(),
            Verdict::Failed => self.failed.len(),
            Verdict::Skipped => self.skipped.len(),
            Verdict::Ignored => self.ignored.len(),
            Verdict::ForcePass => self.forced_pass.len(),
            Verdict::ForceFail => self.forced_fail.len(),
        }
    }
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

fn map_as_millis<S: Serializer>(
    map: &BTreeMap<String, Duration>,
    s: S,
) -> Result<S::Ok, S::Error> {
    s.collect_map(map.iter().map(|(k, v)| (k, v.as_millis() as u64)))
}

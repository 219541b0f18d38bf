use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Queue a job currently sits in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    New,
    Waiting,
    Active,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub state: JobState,
    /// Seconds between runs; absent for one-shot jobs.
    pub interval_secs: Option<u64>,
    /// Cleared once the job was removed; it will not be queued again.
    pub active: bool,
    pub executed: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub parent: Option<JobId>,
    pub children: Vec<JobId>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub new: usize,
    pub waiting: usize,
    pub active: usize,
    /// Ticks deferred because of pause, the concurrency cap or memory.
    pub reschedules: u64,
}

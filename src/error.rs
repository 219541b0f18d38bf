use crate::jobs::JobId;
use crate::toc::Index;

/// Failure and anomaly taxonomy shared by the scheduler and the TOC engine.
///
/// Parsing anomalies are never returned from the engine; they are recorded on
/// the scrape state and logged so a single malformed row cannot abort a TOC.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScrapeError {
    #[error("toc format changed: {detail}")]
    FormatChanged { detail: String },

    #[error("ambiguous index for {title:?}: kept {kept}, rejected {rejected}")]
    AmbiguousIndex {
        title: String,
        kept: String,
        rejected: String,
    },

    #[error("invalid index sentinel {number:?} in {title:?}")]
    InvalidIndexSentinel { title: String, number: String },

    #[error("job {job_id} failed: {message}")]
    JobFailure { job_id: JobId, message: String },

    #[error("scheduler deferred {stalls} consecutive ticks ({reason})")]
    BackpressureStall { stalls: u64, reason: &'static str },

    #[error("hook {name:?} is already registered")]
    DuplicateHook { name: String },

    #[error("hook {name:?} is invalid: {reason}")]
    InvalidHook { name: String, reason: String },

    #[error("invalid pattern: {0}")]
    Pattern(String),
}

impl ScrapeError {
    pub(crate) fn ambiguous(title: &str, kept: Index, rejected: Index) -> Self {
        Self::AmbiguousIndex {
            title: title.to_owned(),
            kept: kept.to_string(),
            rejected: rejected.to_string(),
        }
    }
}

impl From<regex::Error> for ScrapeError {
    fn from(err: regex::Error) -> Self {
        Self::Pattern(err.to_string())
    }
}

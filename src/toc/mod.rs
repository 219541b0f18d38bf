//! Normalization of raw table-of-contents rows into indexed parts and episodes.
//!
//! A [`TocNormalizer`] holds the compiled title patterns. Each TOC stream is
//! folded into a fresh [`ScrapeState`] one row at a time and finished with a
//! post pass that decides the listing order, places unclassified rows and
//! resolves index conflicts.

mod adjust;
mod index;
mod patterns;
mod state;

pub use adjust::NormalizedToc;
pub use index::{Index, combi_index};
pub use patterns::{MatchKind, TitleMatch, TocPatterns};
pub use state::{InternalEpisode, InternalPart, Marked, ScrapeState, UnusedPiece};

use crate::error::ScrapeError;
use crate::formats::TocInput;

#[derive(Debug, Clone)]
pub struct TocNormalizer {
    patterns: TocPatterns,
}

impl TocNormalizer {
    pub fn new() -> Result<Self, ScrapeError> {
        Ok(Self {
            patterns: TocPatterns::compile()?,
        })
    }

    pub fn state(&self) -> ScrapeState<'_> {
        ScrapeState::new(&self.patterns)
    }

    /// Consumes a single-pass stream of rows (and at most one meta row).
    pub fn normalize<I>(&self, inputs: I) -> NormalizedToc
    where
        I: IntoIterator<Item = TocInput>,
    {
        let mut state = self.state();
        for input in inputs {
            state.push(input);
        }
        state.finish()
    }
}

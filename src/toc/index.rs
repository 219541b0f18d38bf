use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordering position of a part or episode.
///
/// Ordering compares `total` first and then `partial`, with a missing partial
/// sorting before any present one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Index {
    pub total: i64,
    pub partial: Option<u32>,
}

impl Index {
    /// Reserved bucket for episodes that belong to no volume.
    pub const UNINDEXED: Index = Index {
        total: -1,
        partial: None,
    };

    pub fn new(total: i64, partial: Option<u32>) -> Self {
        Self { total, partial }
    }

    pub fn combi(&self) -> f64 {
        combi_index(self.total, self.partial)
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.partial {
            Some(partial) => write!(f, "{}.{partial}", self.total),
            None => write!(f, "{}", self.total),
        }
    }
}

/// Sortable index combining the total and partial position.
///
/// The partial index becomes the decimal fraction as written: `(12, 5)` is
/// `12.5` and `(12, 15)` is `12.15`.
pub fn combi_index(total: i64, partial: Option<u32>) -> f64 {
    let Some(partial) = partial else {
        return total as f64;
    };
    let digits = partial.checked_ilog10().map_or(1, |d| d + 1);
    let fraction = f64::from(partial) / 10f64.powi(digits as i32);
    if total < 0 {
        total as f64 - fraction
    } else {
        total as f64 + fraction
    }
}

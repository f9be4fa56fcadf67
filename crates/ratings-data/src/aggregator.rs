//! Temporal aggregation of rating histories.
//!
//! Pure functions: a history plus a year window in, per-year maxima out.
//! Nothing here mutates stored history.

use std::collections::BTreeMap;

use ratings_core::models::{ContestantRecord, RatingEvent, NO_DATA};
use ratings_core::time_utils::{year_of, YearWindow};

/// Per-year summary derived from a rating history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearlySummary {
    /// Every year in the window, mapped to its maximum rating or [`NO_DATA`].
    pub yearly_max: BTreeMap<i32, i32>,
    /// Rating of the latest event in the whole history, or [`NO_DATA`].
    pub most_recent_rating: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct TemporalAggregator {
    window: YearWindow,
}

impl TemporalAggregator {
    pub fn new(window: YearWindow) -> Self {
        Self { window }
    }

    pub fn window(&self) -> YearWindow {
        self.window
    }

    /// Summarize `history`. Input order does not matter.
    pub fn summarize(&self, history: &[RatingEvent]) -> YearlySummary {
        YearlySummary {
            yearly_max: yearly_max(history, self.window),
            most_recent_rating: most_recent(history),
        }
    }

    /// Recompute the derived fields of `record` from its history.
    pub fn refresh(&self, record: &mut ContestantRecord) {
        let summary = self.summarize(&record.rating_history);
        record.yearly_max = summary.yearly_max;
        record.most_recent_rating = summary.most_recent_rating;
    }
}

/// Maximum rating per calendar year for every year in `window`.
///
/// Years without an event map to [`NO_DATA`]; events outside the window are
/// ignored.
pub fn yearly_max(history: &[RatingEvent], window: YearWindow) -> BTreeMap<i32, i32> {
    let mut out: BTreeMap<i32, i32> = window.years().map(|y| (y, NO_DATA)).collect();
    for event in history {
        let year = year_of(event.timestamp);
        if let Some(slot) = out.get_mut(&year) {
            *slot = (*slot).max(event.rating);
        }
    }
    out
}

/// Rating of the event with the greatest timestamp, or [`NO_DATA`].
pub fn most_recent(history: &[RatingEvent]) -> i32 {
    history
        .iter()
        .max_by_key(|e| e.timestamp)
        .map(|e| e.rating)
        .unwrap_or(NO_DATA)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

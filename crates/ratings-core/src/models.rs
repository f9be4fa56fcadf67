use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Fixed out-of-range rating meaning "no observation".
///
/// Real ratings on the external service are never negative, so any value
/// compares as below every attainable rating and below every sensible floor.
pub const NO_DATA: i32 = -1000;

/// One rating change published by the external rating service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingEvent {
    /// UTC instant the new rating took effect.
    pub timestamp: DateTime<Utc>,
    /// Rating after the event.
    pub rating: i32,
}

impl RatingEvent {
    pub fn new(timestamp: DateTime<Utc>, rating: i32) -> Self {
        Self { timestamp, rating }
    }
}

/// A normalized row of a contest result sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Contestant name as printed on the sheet (or an external handle for
    /// handle competitions).
    pub contestant: String,
    /// Canonical country name.
    pub country: String,
    /// Competition key, e.g. `"IOI 2024"` or `"COCI 2024 CONTEST_#1"`.
    pub competition: String,
    /// Calendar year of the competition.
    pub year: i32,
    /// Recognized placement columns (`Rank`, `Total`, `medal`) passed through
    /// verbatim.
    #[serde(default)]
    pub placement: BTreeMap<String, String>,
}

/// How a [`CandidateMatch`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    /// Found in the contestant database without any external call.
    Cache,
    /// Scored from the profile directory's search results.
    Search,
    /// Looked up directly by handle.
    Handle,
}

/// A scored external identity for a (name, country) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMatch {
    pub external_id: String,
    pub matched_name: String,
    pub matched_country: String,
    /// Combined name/country confidence in `[0, 1]`.
    pub confidence: f64,
    pub source: MatchSource,
}

/// Outcome of resolving one contestant.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Matched(CandidateMatch),
    Unresolved { reason: String },
}

impl Resolution {
    pub fn unresolved(reason: impl Into<String>) -> Self {
        Resolution::Unresolved {
            reason: reason.into(),
        }
    }

    pub fn matched(&self) -> Option<&CandidateMatch> {
        match self {
            Resolution::Matched(m) => Some(m),
            Resolution::Unresolved { .. } => None,
        }
    }
}

/// The canonical persisted entity, keyed by `external_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestantRecord {
    pub external_id: String,
    /// First-seen name; changed only through an explicit override.
    pub display_name: String,
    /// First-seen country; changed only through an explicit override.
    pub country: String,
    /// Competition keys the contestant was recorded in.
    #[serde(default)]
    pub competitions: BTreeSet<String>,
    /// Normalized `name|country` keys this identity has been reached under.
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    /// Rating events, strictly increasing in timestamp.
    #[serde(default)]
    pub rating_history: Vec<RatingEvent>,
    /// Per-year maximum rating (or [`NO_DATA`]); derived from `rating_history`.
    #[serde(default)]
    pub yearly_max: BTreeMap<i32, i32>,
    /// Rating of the latest event (or [`NO_DATA`]); derived from `rating_history`.
    #[serde(default = "no_data")]
    pub most_recent_rating: i32,
    /// Confidence of the match that created the record.
    pub confidence: f64,
    /// Set while the creating match is below the provisional threshold.
    #[serde(default)]
    pub provisional: bool,
}

fn no_data() -> i32 {
    NO_DATA
}

impl ContestantRecord {
    /// A fresh record with empty history.
    pub fn new(
        external_id: impl Into<String>,
        display_name: impl Into<String>,
        country: impl Into<String>,
        confidence: f64,
        provisional: bool,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            display_name: display_name.into(),
            country: country.into(),
            competitions: BTreeSet::new(),
            aliases: BTreeSet::new(),
            rating_history: Vec::new(),
            yearly_max: BTreeMap::new(),
            most_recent_rating: NO_DATA,
            confidence,
            provisional,
        }
    }

    /// Maximum rating for `year`, or [`NO_DATA`] when the year is outside the
    /// summarised window or had no events.
    pub fn rating_for(&self, year: i32) -> i32 {
        self.yearly_max.get(&year).copied().unwrap_or(NO_DATA)
    }

    /// Rating for `year`, falling back to the nearest earlier year with data
    /// when `carry_forward` is set.
    pub fn effective_rating(&self, year: i32, carry_forward: bool) -> i32 {
        let direct = self.rating_for(year);
        if direct != NO_DATA || !carry_forward {
            return direct;
        }
        self.yearly_max
            .range(..year)
            .rev()
            .map(|(_, &r)| r)
            .find(|&r| r != NO_DATA)
            .unwrap_or(NO_DATA)
    }
}

/// Incoming data for one [`ContestantRecord`] merge.
#[derive(Debug, Clone, PartialEq)]
pub struct ContestantUpdate {
    pub external_id: String,
    /// Name as seen on the result sheet.
    pub name: String,
    /// Canonical country as seen on the result sheet.
    pub country: String,
    pub competition: String,
    /// Newly fetched events; may overlap with the stored history.
    pub events: Vec<RatingEvent>,
    /// Confidence of a fresh resolution; `None` when the update came through
    /// the cache and carries no new evidence.
    pub match_confidence: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_years(years: &[(i32, i32)]) -> ContestantRecord {
        let mut r = ContestantRecord::new("id", "Name", "Country", 1.0, false);
        r.yearly_max = years.iter().copied().collect();
        r
    }

    #[test]
    fn test_rating_for_missing_year_is_no_data() {
        let r = record_with_years(&[(2023, 1600)]);
        assert_eq!(r.rating_for(2023), 1600);
        assert_eq!(r.rating_for(2024), NO_DATA);
    }

    #[test]
    fn test_effective_rating_carries_forward() {
        let r = record_with_years(&[(2022, 1400), (2023, 1600), (2024, NO_DATA), (2025, NO_DATA)]);
        assert_eq!(r.effective_rating(2025, true), 1600);
        assert_eq!(r.effective_rating(2025, false), NO_DATA);
        assert_eq!(r.effective_rating(2023, true), 1600);
    }

    #[test]
    fn test_effective_rating_no_earlier_data() {
        let r = record_with_years(&[(2022, NO_DATA), (2023, NO_DATA)]);
        assert_eq!(r.effective_rating(2023, true), NO_DATA);
    }

    #[test]
    fn test_record_serde_defaults() {
        let json = r#"{"external_id":"x","display_name":"X","country":"Y","confidence":0.8}"#;
        let r: ContestantRecord = serde_json::from_str(json).unwrap();
        assert!(r.competitions.is_empty());
        assert_eq!(r.most_recent_rating, NO_DATA);
        assert!(!r.provisional);
    }

    #[test]
    fn test_yearly_max_integer_keys_survive_json() {
        let r = record_with_years(&[(2022, 1400), (2023, 1600)]);
        let json = serde_json::to_string(&r).unwrap();
        let back: ContestantRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.yearly_max, r.yearly_max);
    }

    #[test]
    fn test_resolution_matched_accessor() {
        let m = CandidateMatch {
            external_id: "id".into(),
            matched_name: "Name".into(),
            matched_country: "Country".into(),
            confidence: 0.9,
            source: MatchSource::Search,
        };
        assert_eq!(Resolution::Matched(m.clone()).matched(), Some(&m));
        assert!(Resolution::unresolved("none").matched().is_none());
    }
}

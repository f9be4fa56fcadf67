use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

// ── Year helpers ──────────────────────────────────────────────────────────────

/// Calendar year (UTC) of a timestamp.
pub fn year_of(ts: DateTime<Utc>) -> i32 {
    ts.year()
}

// ── YearWindow ────────────────────────────────────────────────────────────────

/// Inclusive range of calendar years that rating summaries are produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearWindow {
    pub first: i32,
    pub last: i32,
}

impl YearWindow {
    pub fn new(first: i32, last: i32) -> Self {
        if first <= last {
            Self { first, last }
        } else {
            Self {
                first: last,
                last: first,
            }
        }
    }

    pub fn contains(&self, year: i32) -> bool {
        (self.first..=self.last).contains(&year)
    }

    /// Years in ascending order.
    pub fn years(&self) -> std::ops::RangeInclusive<i32> {
        self.first..=self.last
    }
}

impl Default for YearWindow {
    fn default() -> Self {
        Self {
            first: 2022,
            last: 2025,
        }
    }
}

// ── Timestamp parsing ─────────────────────────────────────────────────────────

/// Parse a JSON value holding a rating-event timestamp.
///
/// Accepts integer Unix seconds (the rating service's native form), float
/// seconds, or an RFC 3339 string with either `Z` or an explicit offset.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            if let Some(secs) = n.as_i64() {
                DateTime::from_timestamp(secs, 0)
            } else {
                n.as_f64()
                    .and_then(|f| DateTime::from_timestamp(f.trunc() as i64, 0))
            }
        }
        Value::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(secs) = trimmed.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }

    let normalised = match trimmed.strip_suffix('Z') {
        Some(stripped) => format!("{}+00:00", stripped),
        None => trimmed.to_string(),
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalised) {
        return Some(dt.with_timezone(&Utc));
    }

    const FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];
    for fmt in FORMATS {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    warn!("could not parse timestamp \"{}\"", s);
    None
}

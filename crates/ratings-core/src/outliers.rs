//! Two-stage outlier filter over an enriched population.
//!
//! Stage one drops every row rated below an absolute floor. Stage two
//! computes a robust spread over the survivors and drops rows outside
//! `median ± k × spread`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::stats;

// ── Configuration ─────────────────────────────────────────────────────────────

/// Dispersion statistic used for the distribution-based bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpreadStatistic {
    /// Interquartile range from Tukey hinges.
    #[default]
    Iqr,
    /// Median absolute deviation.
    Mad,
    /// Population standard deviation.
    Std,
}

impl SpreadStatistic {
    /// Spread of a **sorted** sample.
    pub fn compute(&self, sorted: &[f64]) -> f64 {
        match self {
            SpreadStatistic::Iqr => stats::iqr(sorted),
            SpreadStatistic::Mad => stats::mad(sorted),
            SpreadStatistic::Std => stats::std_dev(sorted),
        }
    }
}

/// Tunables for [`OutlierFilter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    /// Ratings strictly below this are dropped unconditionally.
    pub floor: f64,
    /// `k` in `median ± k × spread`.
    pub multiplier: f64,
    pub spread: SpreadStatistic,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            floor: 500.0,
            multiplier: 1.5,
            spread: SpreadStatistic::Iqr,
        }
    }
}

// ── Outcome ───────────────────────────────────────────────────────────────────

/// Audit counts for one filter pass.
///
/// `input == dropped_missing + dropped_floor + dropped_spread + retained`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSummary {
    pub input: usize,
    /// Rows without a usable rating value.
    pub dropped_missing: usize,
    pub dropped_floor: usize,
    pub dropped_spread: usize,
    pub retained: usize,
    /// Bounds used by stage two, absent when no row survived the floor.
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
}

/// Retained rows plus the summary counts.
#[derive(Debug, Clone)]
pub struct FilterOutcome<T> {
    pub rows: Vec<T>,
    pub summary: FilterSummary,
}

// ── Filter ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct OutlierFilter {
    config: OutlierConfig,
}

impl OutlierFilter {
    pub fn new(config: OutlierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OutlierConfig {
        &self.config
    }

    /// Filter `rows`, reading each row's rating through `rating_of`.
    ///
    /// Rows for which `rating_of` yields `None` or NaN count as
    /// `dropped_missing`. Relative order of retained rows is preserved.
    pub fn apply<T, F>(&self, rows: Vec<T>, rating_of: F) -> FilterOutcome<T>
    where
        F: Fn(&T) -> Option<f64>,
    {
        let mut summary = FilterSummary {
            input: rows.len(),
            ..FilterSummary::default()
        };

        let mut above_floor: Vec<(T, f64)> = Vec::with_capacity(rows.len());
        for row in rows {
            match rating_of(&row) {
                Some(r) if !r.is_nan() => {
                    if r < self.config.floor {
                        summary.dropped_floor += 1;
                    } else {
                        above_floor.push((row, r));
                    }
                }
                _ => summary.dropped_missing += 1,
            }
        }

        if above_floor.is_empty() {
            return FilterOutcome {
                rows: Vec::new(),
                summary,
            };
        }

        let ratings: Vec<f64> = above_floor.iter().map(|(_, r)| *r).collect();
        let sorted = stats::sorted(&ratings);
        let center = stats::median(&sorted);
        let spread = self.config.spread.compute(&sorted);
        let lower = center - self.config.multiplier * spread;
        let upper = center + self.config.multiplier * spread;
        summary.lower_bound = Some(lower);
        summary.upper_bound = Some(upper);

        debug!(
            center,
            spread,
            lower,
            upper,
            statistic = ?self.config.spread,
            "outlier bounds computed"
        );

        let mut kept = Vec::with_capacity(above_floor.len());
        for (row, r) in above_floor {
            if r < lower || r > upper {
                summary.dropped_spread += 1;
            } else {
                kept.push(row);
            }
        }
        summary.retained = kept.len();

        FilterOutcome {
            rows: kept,
            summary,
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ratings(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    #[test]
    fn test_floor_then_iqr() {
        let rows = ratings(&[200.0, 900.0, 950.0, 1000.0, 1050.0, 1100.0, 9999.0]);
        let out = OutlierFilter::default().apply(rows, |r| *r);

        assert_eq!(out.summary.input, 7);
        assert_eq!(out.summary.dropped_floor, 1);
        assert_eq!(out.summary.dropped_spread, 1);
        assert_eq!(out.summary.retained, 5);
        assert_eq!(out.summary.dropped_missing, 0);

        let kept: Vec<f64> = out.rows.into_iter().flatten().collect();
        assert_eq!(kept, vec![900.0, 950.0, 1000.0, 1050.0, 1100.0]);
        assert_eq!(out.summary.lower_bound, Some(800.0));
        assert_eq!(out.summary.upper_bound, Some(1250.0));
    }

    #[test]
    fn test_floor_is_independent_of_distribution() {
        let config = OutlierConfig {
            floor: 1000.0,
            multiplier: 100.0,
            spread: SpreadStatistic::Iqr,
        };
        let rows = ratings(&[999.0, 1000.0, 1001.0]);
        let out = OutlierFilter::new(config).apply(rows, |r| *r);
        assert_eq!(out.summary.dropped_floor, 1);
        assert_eq!(out.summary.retained, 2);
    }

    #[test]
    fn test_missing_ratings_counted_separately() {
        let rows = vec![Some(1000.0), None, Some(f64::NAN), Some(1010.0)];
        let out = OutlierFilter::default().apply(rows, |r| *r);
        assert_eq!(out.summary.dropped_missing, 2);
        assert_eq!(out.summary.retained, 2);
        let s = &out.summary;
        assert_eq!(
            s.input,
            s.dropped_missing + s.dropped_floor + s.dropped_spread + s.retained
        );
    }

    #[test]
    fn test_all_below_floor() {
        let rows = ratings(&[100.0, 200.0]);
        let out = OutlierFilter::default().apply(rows, |r| *r);
        assert!(out.rows.is_empty());
        assert_eq!(out.summary.dropped_floor, 2);
        assert!(out.summary.lower_bound.is_none());
    }

    #[test]
    fn test_identical_ratings_all_retained() {
        let rows = ratings(&[1500.0; 6]);
        let out = OutlierFilter::default().apply(rows, |r| *r);
        assert_eq!(out.summary.retained, 6);
    }

    #[test]
    fn test_multiplier_is_configurable() {
        let rows = ratings(&[900.0, 950.0, 1000.0, 1050.0, 1100.0, 1300.0]);
        // hinges (950, 1100), IQR 150, median 1025.
        let tight = OutlierFilter::new(OutlierConfig {
            multiplier: 0.5,
            ..OutlierConfig::default()
        })
        .apply(rows.clone(), |r| *r);
        // bounds [950, 1100]
        assert_eq!(tight.summary.retained, 4);

        let loose = OutlierFilter::new(OutlierConfig {
            multiplier: 3.0,
            ..OutlierConfig::default()
        })
        .apply(rows, |r| *r);
        assert_eq!(loose.summary.retained, 6);
    }

    #[test]
    fn test_mad_statistic() {
        let rows = ratings(&[1000.0, 1010.0, 1020.0, 1030.0, 1040.0, 5000.0]);
        let out = OutlierFilter::new(OutlierConfig {
            spread: SpreadStatistic::Mad,
            multiplier: 3.0,
            ..OutlierConfig::default()
        })
        .apply(rows, |r| *r);
        assert_eq!(out.summary.dropped_spread, 1);
        assert_eq!(out.summary.retained, 5);
    }

    #[test]
    fn test_spread_statistic_serde_names() {
        let s: SpreadStatistic = serde_json::from_str("\"mad\"").unwrap();
        assert_eq!(s, SpreadStatistic::Mad);
        assert_eq!(serde_json::to_string(&SpreadStatistic::Iqr).unwrap(), "\"iqr\"");
    }
}

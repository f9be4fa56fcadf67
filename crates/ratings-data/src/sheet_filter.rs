//! Outlier filtering of enriched result sheets.
//!
//! Each sheet is filtered independently: rows without a numeric rating or
//! total are dropped, the remaining population goes through the
//! [`OutlierFilter`], and survivors are written sorted by total, best first.

use std::path::{Path, PathBuf};

use ratings_core::error::{RatingsError, Result};
use ratings_core::normalize::{canonical_column, COL_TOTAL};
use ratings_core::outliers::{FilterSummary, OutlierFilter};
use ratings_core::settings::FilterConfig;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::enrichment::RATING_COLUMN;
use crate::reader::{find_result_sheets, mirror_path, read_sheet, write_sheet, RawSheet};

/// Per-sheet outcome of a tree run.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetReport {
    pub path: PathBuf,
    pub summary: FilterSummary,
    /// Fewer rows than the configured minimum survived.
    pub undersized: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterTreeSummary {
    pub reports: Vec<SheetReport>,
    pub excluded: usize,
    /// Sheets without the rating or total column.
    pub skipped: usize,
}

pub struct SheetFilter {
    filter: OutlierFilter,
    min_population: usize,
    excludes: Vec<Regex>,
}

impl SheetFilter {
    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        let excludes = config
            .exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    RatingsError::Config(format!("invalid exclude pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            filter: OutlierFilter::new(config.outliers.clone()),
            min_population: config.min_population,
            excludes,
        })
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        self.excludes.iter().any(|re| re.is_match(&text))
    }

    /// Filter one sheet. `None` when it lacks the rating or total column.
    pub fn filter_sheet(&self, sheet: &RawSheet) -> Option<(RawSheet, FilterSummary)> {
        let rating_idx = sheet.column_index(|h| h == RATING_COLUMN)?;
        let total_idx = sheet.column_index(|h| canonical_column(h) == Some(COL_TOTAL))?;

        let parse = |record: &Vec<String>, idx: usize| -> Option<f64> {
            record.get(idx).and_then(|v| v.trim().parse::<f64>().ok())
        };

        let outcome = self.filter.apply(sheet.records.clone(), |record| {
            // A row needs both values to be ranked.
            parse(record, total_idx)?;
            parse(record, rating_idx)
        });

        let mut rows = outcome.rows;
        rows.sort_by(|a, b| {
            let ta = parse(a, total_idx).unwrap_or(f64::NEG_INFINITY);
            let tb = parse(b, total_idx).unwrap_or(f64::NEG_INFINITY);
            tb.total_cmp(&ta)
        });

        Some((
            RawSheet {
                headers: sheet.headers.clone(),
                records: rows,
            },
            outcome.summary,
        ))
    }

    /// Filter every sheet under `input`, writing results under `output`.
    pub fn filter_tree(&self, input: &Path, output: &Path) -> Result<FilterTreeSummary> {
        let mut tree = FilterTreeSummary::default();

        for path in find_result_sheets(input) {
            if self.is_excluded(&path) {
                debug!("Excluded {}", path.display());
                tree.excluded += 1;
                continue;
            }
            let sheet = match read_sheet(&path) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    tree.skipped += 1;
                    continue;
                }
            };
            let Some((filtered, summary)) = self.filter_sheet(&sheet) else {
                warn!(
                    "Skipping {}: needs '{}' and '{}' columns",
                    path.display(),
                    RATING_COLUMN,
                    COL_TOTAL
                );
                tree.skipped += 1;
                continue;
            };

            let undersized = summary.retained < self.min_population;
            if undersized {
                warn!(
                    "{}: only {} rows retained (minimum {})",
                    path.display(),
                    summary.retained,
                    self.min_population
                );
            }
            info!(
                "{}: {} in, {} missing, {} below floor, {} outside bounds, {} kept",
                path.display(),
                summary.input,
                summary.dropped_missing,
                summary.dropped_floor,
                summary.dropped_spread,
                summary.retained
            );

            let target = mirror_path(&path, input, output);
            write_sheet(&target, &filtered)?;
            tree.reports.push(SheetReport {
                path: target,
                summary,
                undersized,
            });
        }

        Ok(tree)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Result-sheet enrichment.
//!
//! Every row of every sheet under a results tree gets a rating column holding
//! the contestant's maximum rating for the competition year. Sheets are
//! written to a mirrored tree; all original columns are kept.

use std::path::{Path, PathBuf};

use ratings_core::error::Result;
use ratings_core::models::{ContestantRecord, ResultRow};
use ratings_core::normalize::Normalizer;
use ratings_core::settings::{PipelineConfig, ResolverConfig};
use tracing::{debug, info, warn};

use crate::database::ContestantDatabase;
use crate::reader::{
    competition_info, find_result_sheets, mirror_path, normalizer_from_config, read_sheet,
    write_sheet, RawSheet,
};

/// Column appended to enriched sheets.
pub const RATING_COLUMN: &str = "CF_Rating";

/// Counts for one enrichment run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichSummary {
    pub sheets: usize,
    pub sheets_skipped: usize,
    pub rows: usize,
    /// Rows that matched a database record.
    pub matched: usize,
    pub written: Vec<PathBuf>,
}

pub struct Enricher<'a> {
    db: &'a ContestantDatabase,
    normalizer: Normalizer,
    resolver: &'a ResolverConfig,
    carry_forward: bool,
}

impl<'a> Enricher<'a> {
    pub fn new(db: &'a ContestantDatabase, config: &'a PipelineConfig) -> Self {
        Self {
            db,
            normalizer: normalizer_from_config(&config.normalizer),
            resolver: &config.resolver,
            carry_forward: config.years.carry_forward,
        }
    }

    /// Database record for a normalized row.
    ///
    /// Handle competitions match the contestant column against external ids.
    /// Otherwise the (name, country) alias must belong to a record that took
    /// part in this competition (or another stage of it in the same year),
    /// with a fallback to an external id equal to the contestant field.
    pub fn record_for(&self, row: &ResultRow) -> Option<&'a ContestantRecord> {
        if self.resolver.is_handle_competition(&row.competition) {
            return self.db.find_by_handle(&row.contestant);
        }
        self.db
            .find_by_key(&row.contestant, &row.country)
            .filter(|r| took_part(r, &row.competition, row.year))
            .or_else(|| self.db.find_by_handle(&row.contestant))
    }

    /// Rating for a row's competition year; `None` when the row matches no record.
    pub fn rating_for(&self, row: &ResultRow) -> Option<i32> {
        self.record_for(row)
            .map(|r| r.effective_rating(row.year, self.carry_forward))
    }

    /// Enrich one sheet in memory. Returns the new sheet and the matched row count.
    ///
    /// An existing rating column is overwritten in place. Rows that cannot be
    /// normalized or matched get an empty rating cell.
    pub fn enrich_sheet(&self, sheet: &RawSheet, competition: &str, year: i32) -> (RawSheet, usize) {
        let mut out = sheet.clone();
        let column = match out.column_index(|h| h == RATING_COLUMN) {
            Some(i) => i,
            None => {
                out.headers.push(RATING_COLUMN.to_string());
                for record in &mut out.records {
                    record.push(String::new());
                }
                out.headers.len() - 1
            }
        };

        let mut matched = 0;
        for (raw, record) in sheet.rows().zip(out.records.iter_mut()) {
            let rating = self
                .normalizer
                .normalize(&raw, competition, year)
                .ok()
                .and_then(|row| self.rating_for(&row));
            record[column] = match rating {
                Some(r) => {
                    matched += 1;
                    r.to_string()
                }
                None => String::new(),
            };
        }
        (out, matched)
    }

    /// Enrich every sheet under `root`, writing results under `out_root`.
    pub fn enrich_tree(&self, root: &Path, out_root: &Path) -> Result<EnrichSummary> {
        let mut summary = EnrichSummary::default();

        for path in find_result_sheets(root) {
            let Some((competition, year)) = competition_info(&path, root) else {
                summary.sheets_skipped += 1;
                continue;
            };
            let sheet = match read_sheet(&path) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    summary.sheets_skipped += 1;
                    continue;
                }
            };

            let (enriched, matched) = self.enrich_sheet(&sheet, &competition, year);
            let target = mirror_path(&path, root, out_root);
            write_sheet(&target, &enriched)?;

            debug!(
                "{}: {}/{} rows matched",
                target.display(),
                matched,
                enriched.records.len()
            );
            summary.sheets += 1;
            summary.rows += enriched.records.len();
            summary.matched += matched;
            summary.written.push(target);
        }

        info!(
            "Enriched {} sheets ({} rows, {} matched) into {}",
            summary.sheets,
            summary.rows,
            summary.matched,
            out_root.display()
        );
        Ok(summary)
    }
}

/// Competition key up to and including its year, e.g. `"COCI 2024"` for
/// `"COCI 2024 CONTEST_#1"`.
pub fn competition_edition(competition: &str, year: i32) -> String {
    let year = year.to_string();
    let mut parts = Vec::new();
    for token in competition.split_whitespace() {
        parts.push(token);
        if token == year {
            return parts.join(" ");
        }
    }
    competition.to_string()
}

fn took_part(record: &ContestantRecord, competition: &str, year: i32) -> bool {
    if record.competitions.contains(competition) {
        return true;
    }
    let edition = competition_edition(competition, year);
    record
        .competitions
        .iter()
        .any(|c| competition_edition(c, year) == edition)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

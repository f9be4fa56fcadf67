//! Result-sheet discovery and loading.
//!
//! Sheets live at `<root>/<Competition…>/<YYYY>/<Stage…>/results.csv`; the
//! path below the root determines the competition key and year.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use ratings_core::error::{RatingsError, Result};
use ratings_core::models::ResultRow;
use ratings_core::normalize::{CountryTable, Normalizer};
use ratings_core::settings::NormalizerConfig;
use regex::Regex;
use tracing::{debug, warn};

/// File name every normalized result sheet carries.
pub const SHEET_FILE_NAME: &str = "results.csv";

// ── Public API ────────────────────────────────────────────────────────────────

/// A sheet as read from disk: header row plus string records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSheet {
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
}

impl RawSheet {
    /// Records as ordered `(header, value)` pairs for the normalizer.
    pub fn rows(&self) -> impl Iterator<Item = Vec<(String, String)>> + '_ {
        self.records.iter().map(move |record| {
            self.headers
                .iter()
                .cloned()
                .zip(record.iter().cloned())
                .collect()
        })
    }

    /// Index of the first header satisfying `pred`.
    pub fn column_index(&self, pred: impl Fn(&str) -> bool) -> Option<usize> {
        self.headers.iter().position(|h| pred(h))
    }
}

/// Rows loaded from one sheet plus the rows that failed normalization.
#[derive(Debug, Clone)]
pub struct SheetLoad {
    pub path: PathBuf,
    pub competition: String,
    pub year: i32,
    pub rows: Vec<ResultRow>,
    /// One entry per rejected row: (1-based record number, error).
    pub schema_errors: Vec<(usize, String)>,
}

/// Find all `results.csv` files recursively under `root`, sorted by path.
///
/// `root` may also name a single sheet file, which is returned as-is.
pub fn find_result_sheets(root: &Path) -> Vec<PathBuf> {
    if !root.exists() {
        warn!("Results path does not exist: {}", root.display());
        return Vec::new();
    }
    if root.is_file() {
        return vec![root.to_path_buf()];
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == SHEET_FILE_NAME)
        .map(|entry| entry.into_path())
        .collect();

    files.sort();
    files
}

/// Derive `(competition_key, year)` from a sheet path relative to `root`.
///
/// The first four-digit path component is the year; components before it
/// name the competition and components after it (excluding the file name)
/// name the stage. `Results/JOI/2024/JOI_honsen/results.csv` yields
/// `("JOI 2024 JOI_honsen", 2024)`.
pub fn competition_info(path: &Path, root: &Path) -> Option<(String, i32)> {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    // Need at least Competition/Year/file.
    if parts.len() < 3 {
        warn!("Unexpected sheet path structure: {}", path.display());
        return None;
    }
    let dirs = &parts[..parts.len() - 1];

    let year_index = dirs.iter().position(|p| year_regex().is_match(p))?;
    if year_index == 0 {
        warn!("Sheet path has no competition before the year: {}", path.display());
        return None;
    }
    let year: i32 = dirs[year_index].parse().ok()?;

    let key = dirs.join(" ");
    Some((key, year))
}

/// Read a CSV sheet. Rows shorter than the header are padded with empty
/// values; longer rows are truncated.
pub fn read_sheet(path: &Path) -> Result<RawSheet> {
    let file = std::fs::File::open(path).map_err(|source| RatingsError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(std::io::BufReader::new(file));

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut records = Vec::new();
    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                debug!("Skipping unreadable record in {}: {}", path.display(), e);
                continue;
            }
        };
        let mut values: Vec<String> = record.iter().map(str::to_string).collect();
        values.resize(headers.len(), String::new());
        if values.iter().all(|v| v.is_empty()) {
            continue;
        }
        records.push(values);
    }

    Ok(RawSheet { headers, records })
}

/// Write a sheet to `path`, creating parent directories.
pub fn write_sheet(path: &Path, sheet: &RawSheet) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&sheet.headers)?;
    for record in &sheet.records {
        writer.write_record(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read and normalize one sheet.
///
/// Fails only when the file cannot be read or its path carries no year;
/// individual rows that fail normalization are collected in
/// [`SheetLoad::schema_errors`].
pub fn load_result_rows(path: &Path, root: &Path, normalizer: &Normalizer) -> Result<SheetLoad> {
    let (competition, year) = competition_info(path, root).ok_or_else(|| {
        RatingsError::Config(format!(
            "cannot derive competition and year from {}",
            path.display()
        ))
    })?;

    let sheet = read_sheet(path)?;
    let mut rows = Vec::with_capacity(sheet.records.len());
    let mut schema_errors = Vec::new();

    for (index, raw) in sheet.rows().enumerate() {
        match normalizer.normalize(&raw, &competition, year) {
            Ok(row) if row.contestant.is_empty() => {
                schema_errors.push((index + 1, "empty contestant".to_string()));
            }
            Ok(row) => rows.push(row),
            Err(e) => {
                warn!("{}: record {}: {}", path.display(), index + 1, e);
                schema_errors.push((index + 1, e.to_string()));
            }
        }
    }

    debug!(
        "Sheet {}: {} rows, {} rejected ({} {})",
        path.display(),
        rows.len(),
        schema_errors.len(),
        competition,
        year
    );

    Ok(SheetLoad {
        path: path.to_path_buf(),
        competition,
        year,
        rows,
        schema_errors,
    })
}

/// Build the row normalizer from configured alias and default-country tables.
pub fn normalizer_from_config(config: &NormalizerConfig) -> Normalizer {
    Normalizer::new(
        CountryTable::new(&config.country_aliases),
        &config.default_countries,
    )
}

/// Path of `path` under `out_root`, mirroring its position below `root`.
pub fn mirror_path(path: &Path, root: &Path, out_root: &Path) -> PathBuf {
    match path.strip_prefix(root) {
        Ok(rel) if !rel.as_os_str().is_empty() => out_root.join(rel),
        _ => out_root.join(path.file_name().unwrap_or(path.as_os_str())),
    }
}

fn year_regex() -> &'static Regex {
    static YEAR: OnceLock<Regex> = OnceLock::new();
    YEAR.get_or_init(|| Regex::new(r"^\d{4}$").unwrap_or_else(|_| unreachable!()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{RatingsError, Result};
use crate::outliers::OutlierConfig;
use crate::time_utils::YearWindow;

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Resolve contest results to rating-service identities and enrich them with
/// historical ratings
#[derive(Parser, Debug, Clone)]
#[command(
    name = "contest-ratings",
    about = "Resolve contest results to rating-service identities and enrich them with historical ratings",
    version
)]
pub struct Settings {
    #[command(subcommand)]
    pub command: Command,

    /// Pipeline configuration file (JSON); defaults apply when absent
    #[arg(long, global = true, env = "CONTEST_RATINGS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level
    #[arg(long, global = true, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"])]
    pub log_level: String,

    /// Append log output to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Resolve contestants from result sheets and merge them into the database
    Ingest {
        /// Result sheets or directories containing `results.csv` files
        #[arg(required = true)]
        sheets: Vec<PathBuf>,
        /// Root that competition keys are derived relative to
        #[arg(long, default_value = "Results")]
        results_root: PathBuf,
        /// Contestant database snapshot
        #[arg(long, default_value = "database.json")]
        database: PathBuf,
        /// Profile directory (JSON) used for search and rating history
        #[arg(long)]
        directory: PathBuf,
    },
    /// Append the rating column to every result sheet under a root
    Enrich {
        #[arg(long, default_value = "Results")]
        results_root: PathBuf,
        #[arg(long, default_value = "Results_enriched")]
        output: PathBuf,
        #[arg(long, default_value = "database.json")]
        database: PathBuf,
    },
    /// Drop unrated rows and rating outliers from enriched sheets
    Filter {
        #[arg(long, default_value = "Results_enriched")]
        input: PathBuf,
        #[arg(long, default_value = "Results_filtered")]
        output: PathBuf,
    },
    /// Write the database as a flat CSV table
    Export {
        #[arg(long, default_value = "database.json")]
        database: PathBuf,
        #[arg(long, default_value = "database.csv")]
        output: PathBuf,
    },
    /// Explicitly set a contestant's display name and/or country
    Override {
        external_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        country: Option<String>,
        #[arg(long, default_value = "database.json")]
        database: PathBuf,
    },
}

impl Settings {
    /// Effective tracing filter directive, honouring `--debug`.
    pub fn tracing_level(&self) -> &'static str {
        if self.debug {
            return "debug";
        }
        match self.log_level.to_uppercase().as_str() {
            "DEBUG" => "debug",
            "WARNING" => "warn",
            "ERROR" => "error",
            _ => "info",
        }
    }

    /// Load the pipeline configuration named by `--config`, or defaults.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        match &self.config {
            Some(path) => PipelineConfig::load_from(path),
            None => Ok(PipelineConfig::default()),
        }
    }
}

// ── PipelineConfig ─────────────────────────────────────────────────────────────

/// Identity-resolution tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Minimum confidence for a candidate to be accepted (inclusive).
    pub accept_threshold: f64,
    /// Weight of name similarity in the combined confidence.
    pub name_weight: f64,
    /// Weight of country agreement in the combined confidence.
    pub country_weight: f64,
    /// Records created below this confidence are provisional.
    pub provisional_threshold: f64,
    /// Competition-key prefixes whose contestant column holds the external handle.
    pub handle_competitions: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 0.75,
            name_weight: 0.75,
            country_weight: 0.25,
            provisional_threshold: 0.9,
            handle_competitions: vec![
                "JOI".to_string(),
                "TOKI".to_string(),
                "OOI".to_string(),
                "APIO 2024".to_string(),
            ],
        }
    }
}

impl ResolverConfig {
    pub fn is_handle_competition(&self, competition: &str) -> bool {
        self.handle_competitions
            .iter()
            .any(|prefix| competition.starts_with(prefix.as_str()))
    }
}

/// External-service call policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    /// Back-off before the second attempt; doubles on each further attempt.
    pub base_backoff_ms: u64,
    /// Per-call timeout.
    pub call_timeout_ms: u64,
    /// Token-bucket refill rate shared by all outbound calls.
    pub requests_per_second: u32,
    /// Contestants processed concurrently.
    pub workers: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 100,
            call_timeout_ms: 10_000,
            requests_per_second: 4,
            workers: 8,
        }
    }
}

/// Rating summary window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YearsConfig {
    pub window: YearWindow,
    /// Borrow the nearest earlier year's maximum when a year has no data.
    pub carry_forward: bool,
}

impl Default for YearsConfig {
    fn default() -> Self {
        Self {
            window: YearWindow::default(),
            carry_forward: true,
        }
    }
}

/// Sheet filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    #[serde(flatten)]
    pub outliers: OutlierConfig,
    /// Warn when fewer rows than this survive filtering.
    pub min_population: usize,
    /// Regexes matched against sheet paths; matching sheets are skipped.
    pub exclude_patterns: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            outliers: OutlierConfig::default(),
            min_population: 15,
            exclude_patterns: Vec::new(),
        }
    }
}

/// Extra normalization tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Alias → canonical country, merged over the built-in table.
    pub country_aliases: BTreeMap<String, String>,
    /// Competition-key prefix → country for sheets without a country column.
    pub default_countries: BTreeMap<String, String>,
}

/// Complete pipeline configuration, loaded from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub resolver: ResolverConfig,
    pub service: ServiceConfig,
    pub years: YearsConfig,
    pub filter: FilterConfig,
    pub normalizer: NormalizerConfig,
    /// Save a database snapshot after every N merged contestants.
    pub checkpoint_every: Option<usize>,
}

impl PipelineConfig {
    /// Load and validate a configuration file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| RatingsError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Atomically write the configuration, creating parent directories if needed.
    pub fn save_to(&self, path: &Path) -> std::result::Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;

        Ok(())
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let r = &self.resolver;
        if !(0.0..=1.0).contains(&r.accept_threshold) {
            return Err(RatingsError::Config(format!(
                "resolver.accept_threshold must be within [0, 1], got {}",
                r.accept_threshold
            )));
        }
        if r.name_weight < 0.0 || r.country_weight < 0.0 || r.name_weight + r.country_weight <= 0.0
        {
            return Err(RatingsError::Config(
                "resolver weights must be non-negative and not both zero".to_string(),
            ));
        }
        let s = &self.service;
        if s.max_attempts == 0 {
            return Err(RatingsError::Config("service.max_attempts must be >= 1".into()));
        }
        if s.requests_per_second == 0 {
            return Err(RatingsError::Config(
                "service.requests_per_second must be >= 1".into(),
            ));
        }
        if s.workers == 0 {
            return Err(RatingsError::Config("service.workers must be >= 1".into()));
        }
        if self.filter.outliers.multiplier < 0.0 {
            return Err(RatingsError::Config("filter.multiplier must be >= 0".into()));
        }
        if self.checkpoint_every == Some(0) {
            return Err(RatingsError::Config("checkpoint_every must be >= 1".into()));
        }
        for pattern in &self.filter.exclude_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                RatingsError::Config(format!("invalid exclude pattern '{pattern}': {e}"))
            })?;
        }
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

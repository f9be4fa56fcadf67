use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the contest-ratings crates.
#[derive(Error, Debug)]
pub enum RatingsError {
    /// A result row is missing a required column.
    #[error("Schema error: missing required column '{column}'{}", describe_source(.source_hint))]
    Schema {
        column: String,
        source_hint: Option<String>,
    },

    /// No candidate met the acceptance threshold for a contestant.
    #[error("Unresolved identity: {name} ({country}): {reason}")]
    UnresolvedIdentity {
        name: String,
        country: String,
        reason: String,
    },

    /// Network, timeout or service-unavailable failure from an external service.
    #[error("Transient service error: {0}")]
    TransientService(String),

    /// An external service answered with a payload that could not be understood.
    #[error("Malformed service payload: {0}")]
    MalformedPayload(String),

    /// Two rating events share a timestamp but disagree on the rating.
    #[error(
        "Merge conflict for {external_id} at {timestamp}: kept {kept}, rejected {rejected}"
    )]
    MergeConflict {
        external_id: String,
        timestamp: i64,
        kept: i32,
        rejected: i32,
    },

    /// The database could not be written atomically.
    #[error("Failed to persist {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// A CSV document could not be read or written.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// No record exists for the requested external identity.
    #[error("Unknown contestant: {0}")]
    UnknownContestant(String),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RatingsError {
    /// Whether a retry of the failed call may succeed.
    ///
    /// Timeouts, unreachable services and malformed payloads are retried;
    /// everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RatingsError::TransientService(_) | RatingsError::MalformedPayload(_)
        )
    }

    /// Shorthand for a [`RatingsError::Schema`] without file context.
    pub fn schema(column: impl Into<String>) -> Self {
        RatingsError::Schema {
            column: column.into(),
            source_hint: None,
        }
    }
}

fn describe_source(hint: &Option<String>) -> String {
    match hint {
        Some(h) => format!(" in {h}"),
        None => String::new(),
    }
}

/// Convenience alias used throughout the ratings crates.
pub type Result<T> = std::result::Result<T, RatingsError>;

//! Concurrent ingestion pipeline.
//!
//! Drives every normalized result row through resolve → fetch → merge with a
//! bounded number of rows in flight. Rows for the same contestant are
//! serialized by a per-key lock, and fetch/merge for the same identity by a
//! per-identity lock, so a contestant appearing in several competitions is
//! searched for once and fetched once per run.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::stream::{self, StreamExt};
use ratings_core::error::{RatingsError, Result};
use ratings_core::models::{ContestantUpdate, MatchSource, Resolution, ResultRow};
use ratings_core::normalize::CountryTable;
use ratings_core::settings::PipelineConfig;
use ratings_core::time_utils::YearWindow;
use serde::Serialize;

use crate::fetcher::RatingFetcher;
use crate::locks::KeyedLocks;
use crate::resolver::{lock_db, IdentityResolver, SharedDatabase};
use crate::retry::CallPolicy;
use crate::services::{ProfileDirectory, RatingService};

// ── Public types ──────────────────────────────────────────────────────────────

/// A contestant that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedContestant {
    pub name: String,
    pub country: String,
    pub competition: String,
    pub reason: String,
}

/// End-of-run audit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub rows_read: usize,
    /// Rows rejected before the pipeline (filled in by the caller).
    pub schema_errors: usize,
    pub resolved: usize,
    pub cache_hits: usize,
    pub records_created: usize,
    pub events_added: usize,
    pub merge_conflicts: usize,
    /// External ids whose history could not be fetched.
    pub fetch_failures: Vec<String>,
    pub unresolved: Vec<UnresolvedContestant>,
    pub checkpoints: usize,
}

#[derive(Debug, Default)]
struct RowOutcome {
    source: Option<MatchSource>,
    created: bool,
    events_added: usize,
    conflicts: usize,
    fetch_failure: Option<String>,
    unresolved: Option<UnresolvedContestant>,
    checkpointed: bool,
}

// ── IngestPipeline ────────────────────────────────────────────────────────────

pub struct IngestPipeline {
    resolver: IdentityResolver,
    fetcher: RatingFetcher,
    db: SharedDatabase,
    workers: usize,
    key_locks: KeyedLocks,
    id_locks: KeyedLocks,
    /// Identities whose history was already fetched during this run.
    fetched: Mutex<HashSet<String>>,
    window: YearWindow,
    merged: AtomicUsize,
    checkpoint: Option<(usize, PathBuf)>,
    /// Serializes snapshot writes so checkpoints land in merge order.
    snapshot_lock: tokio::sync::Mutex<()>,
}

impl IngestPipeline {
    pub fn new(
        config: &PipelineConfig,
        db: SharedDatabase,
        directory: Arc<dyn ProfileDirectory>,
        ratings: Arc<dyn RatingService>,
    ) -> Self {
        let policy = Arc::new(CallPolicy::from_config(&config.service));
        Self {
            resolver: IdentityResolver::new(
                directory,
                db.clone(),
                policy.clone(),
                config.resolver.clone(),
                CountryTable::new(&config.normalizer.country_aliases),
            ),
            fetcher: RatingFetcher::new(ratings, policy),
            db,
            workers: config.service.workers.max(1),
            key_locks: KeyedLocks::new(),
            id_locks: KeyedLocks::new(),
            fetched: Mutex::new(HashSet::new()),
            window: config.years.window,
            merged: AtomicUsize::new(0),
            checkpoint: None,
            snapshot_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Save a snapshot to `path` after every `every` merged rows.
    pub fn with_checkpoints(mut self, every: usize, path: PathBuf) -> Self {
        if every > 0 {
            self.checkpoint = Some((every, path));
        }
        self
    }

    pub fn database(&self) -> &SharedDatabase {
        &self.db
    }

    /// Process all rows. Individual failures are recorded in the summary;
    /// only the caller's final save can fail the run.
    pub async fn run(&self, rows: Vec<ResultRow>) -> RunSummary {
        let mut summary = RunSummary {
            rows_read: rows.len(),
            ..RunSummary::default()
        };
        tracing::info!(rows = rows.len(), workers = self.workers, "ingestion started");

        let outcomes: Vec<RowOutcome> = stream::iter(rows)
            .map(|row| self.process(row))
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut failed_ids = HashSet::new();
        for outcome in outcomes {
            if let Some(source) = outcome.source {
                summary.resolved += 1;
                if source == MatchSource::Cache {
                    summary.cache_hits += 1;
                }
            }
            summary.records_created += usize::from(outcome.created);
            summary.events_added += outcome.events_added;
            summary.merge_conflicts += outcome.conflicts;
            summary.checkpoints += usize::from(outcome.checkpointed);
            if let Some(id) = outcome.fetch_failure {
                if failed_ids.insert(id.clone()) {
                    summary.fetch_failures.push(id);
                }
            }
            if let Some(u) = outcome.unresolved {
                summary.unresolved.push(u);
            }
        }
        summary.fetch_failures.sort();
        summary.unresolved.sort_by(|a, b| {
            (&a.competition, &a.name).cmp(&(&b.competition, &b.name))
        });

        tracing::info!(
            resolved = summary.resolved,
            cache_hits = summary.cache_hits,
            created = summary.records_created,
            unresolved = summary.unresolved.len(),
            fetch_failures = summary.fetch_failures.len(),
            conflicts = summary.merge_conflicts,
            "ingestion finished"
        );
        summary
    }

    async fn process(&self, row: ResultRow) -> RowOutcome {
        let mut outcome = RowOutcome::default();

        let key = self.resolver.resolution_key(&row);
        let _key_guard = self.key_locks.lock(&key).await;

        let matched = match self.resolver.resolve(&row).await {
            Resolution::Matched(m) => m,
            Resolution::Unresolved { reason } => {
                tracing::warn!(
                    name = %row.contestant,
                    country = %row.country,
                    competition = %row.competition,
                    %reason,
                    "contestant unresolved"
                );
                outcome.unresolved = Some(UnresolvedContestant {
                    name: row.contestant,
                    country: row.country,
                    competition: row.competition,
                    reason,
                });
                return outcome;
            }
        };

        let _id_guard = self.id_locks.lock(&matched.external_id).await;

        let first_fetch = self
            .fetched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(matched.external_id.clone());
        let events = if first_fetch {
            match self.fetcher.fetch_history(&matched.external_id, self.window).await {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!(external_id = %matched.external_id, error = %e, "rating fetch skipped");
                    outcome.fetch_failure = Some(matched.external_id.clone());
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let update = ContestantUpdate {
            external_id: matched.external_id.clone(),
            name: row.contestant.clone(),
            country: row.country.clone(),
            competition: row.competition.clone(),
            events,
            match_confidence: match matched.source {
                MatchSource::Cache => None,
                MatchSource::Search | MatchSource::Handle => Some(matched.confidence),
            },
        };

        let merged = lock_db(&self.db).merge(&update);
        match merged {
            Ok(m) => {
                outcome.source = Some(matched.source);
                outcome.created = m.created;
                outcome.events_added = m.events_added;
                outcome.conflicts = m.conflicts.len();
            }
            Err(e) => {
                tracing::warn!(external_id = %matched.external_id, error = %e, "merge rejected");
                outcome.unresolved = Some(UnresolvedContestant {
                    name: row.contestant,
                    country: row.country,
                    competition: row.competition,
                    reason: e.to_string(),
                });
                return outcome;
            }
        }

        let count = self.merged.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((every, path)) = &self.checkpoint {
            if count % every == 0 {
                match self.save_snapshot(path.clone()).await {
                    Ok(()) => {
                        tracing::info!(merged = count, path = %path.display(), "checkpoint saved");
                        outcome.checkpointed = true;
                    }
                    Err(e) => tracing::warn!(error = %e, "checkpoint failed"),
                }
            }
        }

        outcome
    }

    /// Write the current database state off the async workers.
    pub async fn save_snapshot(&self, path: PathBuf) -> Result<()> {
        let _writer = self.snapshot_lock.lock().await;
        let snapshot = lock_db(&self.db).clone();
        tokio::task::spawn_blocking(move || snapshot.save(&path))
            .await
            .map_err(|e| RatingsError::Other(e.into()))?
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

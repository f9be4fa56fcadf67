//! Persistent contestant database.
//!
//! Records are keyed by external identity. Every write goes through
//! [`ContestantDatabase::merge`], which is idempotent and commutative over
//! updates for distinct timestamps, so re-running ingestion over the same
//! sheets never changes the stored state.
//!
//! The JSON snapshot is the source of truth; the CSV export is a derived view.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use ratings_core::error::{RatingsError, Result};
use ratings_core::models::{ContestantRecord, ContestantUpdate, RatingEvent};
use ratings_core::normalize::contestant_key;
use ratings_core::settings::PipelineConfig;
use ratings_core::time_utils::YearWindow;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregator::TemporalAggregator;

const SNAPSHOT_VERSION: u32 = 1;

// ── Policy / outcomes ─────────────────────────────────────────────────────────

/// Thresholds applied when records are created or upgraded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergePolicy {
    pub window: YearWindow,
    /// A new record is never created below this confidence.
    pub accept_threshold: f64,
    /// New records below this confidence are flagged provisional.
    pub provisional_threshold: f64,
}

impl MergePolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            window: config.years.window,
            accept_threshold: config.resolver.accept_threshold,
            provisional_threshold: config.resolver.provisional_threshold,
        }
    }
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// An incoming event that disagreed with a stored one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventConflict {
    pub timestamp: DateTime<Utc>,
    pub kept: i32,
    pub rejected: i32,
}

/// What a single merge changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub created: bool,
    pub competition_added: bool,
    pub events_added: usize,
    pub conflicts: Vec<EventConflict>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    records: Vec<ContestantRecord>,
}

// ── Database ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ContestantDatabase {
    records: BTreeMap<String, ContestantRecord>,
    /// Normalized `name|country` key → external id.
    alias_index: HashMap<String, String>,
    /// Lowercased external id → external id.
    handle_index: HashMap<String, String>,
    aggregator: TemporalAggregator,
    policy: MergePolicy,
}

impl ContestantDatabase {
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            records: BTreeMap::new(),
            alias_index: HashMap::new(),
            handle_index: HashMap::new(),
            aggregator: TemporalAggregator::new(policy.window),
            policy,
        }
    }

    pub fn policy(&self) -> &MergePolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, external_id: &str) -> Option<&ContestantRecord> {
        self.records.get(external_id)
    }

    /// Records in external-id order.
    pub fn records(&self) -> impl Iterator<Item = &ContestantRecord> {
        self.records.values()
    }

    /// Record previously reached under this (name, country), if any.
    pub fn find_by_key(&self, name: &str, country: &str) -> Option<&ContestantRecord> {
        self.alias_index
            .get(&contestant_key(name, country))
            .and_then(|id| self.records.get(id))
    }

    /// Record whose external id equals `handle`, ignoring ASCII case.
    pub fn find_by_handle(&self, handle: &str) -> Option<&ContestantRecord> {
        self.handle_index
            .get(&handle.trim().to_lowercase())
            .and_then(|id| self.records.get(id))
    }

    /// Fold `update` into the database.
    ///
    /// Creates the record on first sight. Competitions and aliases are set
    /// unions; events are inserted in timestamp order, and an event whose
    /// timestamp already exists with a different rating is rejected and
    /// reported. Derived yearly values are recomputed afterwards.
    pub fn merge(&mut self, update: &ContestantUpdate) -> Result<MergeOutcome> {
        let key = contestant_key(&update.name, &update.country);
        let created = !self.records.contains_key(&update.external_id);

        if created {
            let confidence = update.match_confidence.unwrap_or(1.0);
            if confidence < self.policy.accept_threshold {
                return Err(RatingsError::UnresolvedIdentity {
                    name: update.name.clone(),
                    country: update.country.clone(),
                    reason: format!(
                        "confidence {:.3} below acceptance threshold {:.3}",
                        confidence, self.policy.accept_threshold
                    ),
                });
            }
            let provisional = confidence < self.policy.provisional_threshold;
            let record = ContestantRecord::new(
                update.external_id.clone(),
                update.name.clone(),
                update.country.clone(),
                confidence,
                provisional,
            );
            self.records.insert(update.external_id.clone(), record);
            self.handle_index
                .insert(update.external_id.to_lowercase(), update.external_id.clone());
            debug!(external_id = %update.external_id, confidence, provisional, "record created");
        }

        let record = self
            .records
            .get_mut(&update.external_id)
            .ok_or_else(|| RatingsError::UnknownContestant(update.external_id.clone()))?;

        let competition_added = record.competitions.insert(update.competition.clone());
        record.aliases.insert(key.clone());

        let (events_added, conflicts) = insert_events(&mut record.rating_history, &update.events);
        for c in &conflicts {
            let err = RatingsError::MergeConflict {
                external_id: update.external_id.clone(),
                timestamp: c.timestamp.timestamp(),
                kept: c.kept,
                rejected: c.rejected,
            };
            warn!("{}", err);
        }

        if !created {
            if let Some(fresh) = update.match_confidence {
                if record.provisional && fresh > record.confidence {
                    record.confidence = fresh;
                    if fresh >= self.policy.provisional_threshold {
                        record.provisional = false;
                    }
                    debug!(external_id = %update.external_id, fresh, "confidence raised");
                }
            }
        }

        self.aggregator.refresh(record);
        self.index_alias(key, &update.external_id);

        Ok(MergeOutcome {
            created,
            competition_added,
            events_added,
            conflicts,
        })
    }

    /// Explicitly change the display name and/or country of a record.
    ///
    /// The new (name, country) pair becomes an alias of the record; existing
    /// aliases keep resolving to it.
    pub fn override_identity(
        &mut self,
        external_id: &str,
        name: Option<&str>,
        country: Option<&str>,
    ) -> Result<()> {
        let record = self
            .records
            .get_mut(external_id)
            .ok_or_else(|| RatingsError::UnknownContestant(external_id.to_string()))?;

        if let Some(n) = name {
            record.display_name = n.trim().to_string();
        }
        if let Some(c) = country {
            record.country = c.trim().to_string();
        }
        let key = contestant_key(&record.display_name, &record.country);
        record.aliases.insert(key.clone());
        info!(
            external_id,
            name = %record.display_name,
            country = %record.country,
            "identity overridden"
        );

        // An override is authoritative: re-point the key even if it was taken.
        self.alias_index.insert(key, external_id.to_string());
        Ok(())
    }

    fn index_alias(&mut self, key: String, external_id: &str) {
        match self.alias_index.get(&key) {
            Some(existing) if existing != external_id => {
                warn!(
                    key = %key,
                    existing = %existing,
                    other = %external_id,
                    "alias already maps to a different identity; keeping first"
                );
            }
            Some(_) => {}
            None => {
                self.alias_index.insert(key, external_id.to_string());
            }
        }
    }

    fn rebuild_indexes(&mut self) {
        self.alias_index.clear();
        self.handle_index.clear();
        let ids: Vec<(String, Vec<String>)> = self
            .records
            .values()
            .map(|r| (r.external_id.clone(), r.aliases.iter().cloned().collect()))
            .collect();
        for (id, aliases) in ids {
            self.handle_index.insert(id.to_lowercase(), id.clone());
            for key in aliases {
                self.index_alias(key, &id);
            }
        }
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    /// Load a snapshot. A missing file yields an empty database.
    ///
    /// Derived yearly values are recomputed for the current window, so a
    /// snapshot written under a different window is still consistent.
    pub fn load(path: &Path, policy: MergePolicy) -> Result<Self> {
        let mut db = Self::new(policy);
        if !path.exists() {
            info!("No database at {}, starting empty", path.display());
            return Ok(db);
        }

        let content = std::fs::read_to_string(path).map_err(|source| RatingsError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        if snapshot.version != SNAPSHOT_VERSION {
            warn!(
                "Database {} has version {}, expected {}",
                path.display(),
                snapshot.version,
                SNAPSHOT_VERSION
            );
        }

        for mut record in snapshot.records {
            record.rating_history.sort_by_key(|e| e.timestamp);
            record.rating_history.dedup_by_key(|e| e.timestamp);
            db.aggregator.refresh(&mut record);
            if db.records.contains_key(&record.external_id) {
                warn!(external_id = %record.external_id, "duplicate record in snapshot; keeping first");
                continue;
            }
            db.records.insert(record.external_id.clone(), record);
        }
        db.rebuild_indexes();

        info!("Loaded {} contestants from {}", db.len(), path.display());
        Ok(db)
    }

    /// Atomically write a snapshot: the previous file stays intact until the
    /// new one is fully on disk.
    pub fn save(&self, path: &Path) -> Result<()> {
        let persist = |source: std::io::Error| RatingsError::Persistence {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(persist)?;

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            records: self.records.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;

        // Unique temp file per writer; it is removed on drop if persisting fails.
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(persist)?;
        tmp.write_all(json.as_bytes()).map_err(persist)?;
        tmp.as_file().sync_all().map_err(persist)?;
        tmp.persist(path).map_err(|e| persist(e.error))?;

        debug!("Saved {} contestants to {}", self.len(), path.display());
        Ok(())
    }

    /// Write the tabular view: one row per record with a rating column per
    /// window year, newest first.
    pub fn export_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let years: Vec<i32> = self.policy.window.years().rev().collect();

        let mut header = vec![
            "external_id".to_string(),
            "display_name".to_string(),
            "country".to_string(),
            "competitions".to_string(),
        ];
        header.extend(years.iter().map(|y| rating_column(*y)));
        header.extend(
            ["most_recent_rating", "confidence", "provisional"]
                .iter()
                .map(|s| s.to_string()),
        );

        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&header)?;
        for record in self.records.values() {
            let competitions: Vec<&String> = record.competitions.iter().collect();
            let mut row = vec![
                record.external_id.clone(),
                record.display_name.clone(),
                record.country.clone(),
                serde_json::to_string(&competitions)?,
            ];
            row.extend(years.iter().map(|y| record.rating_for(*y).to_string()));
            row.push(record.most_recent_rating.to_string());
            row.push(format!("{:.3}", record.confidence));
            row.push(record.provisional.to_string());
            writer.write_record(&row)?;
        }
        writer.flush()?;

        info!("Exported {} contestants to {}", self.len(), path.display());
        Ok(())
    }
}

/// Column name for a year's maximum rating in the CSV export.
pub fn rating_column(year: i32) -> String {
    format!("Codeforces_rating_{}", year)
}

/// Insert `incoming` into a timestamp-sorted history.
///
/// Returns the number of events added and the rejected conflicting ones.
fn insert_events(
    history: &mut Vec<RatingEvent>,
    incoming: &[RatingEvent],
) -> (usize, Vec<EventConflict>) {
    let mut sorted: Vec<&RatingEvent> = incoming.iter().collect();
    sorted.sort_by_key(|e| e.timestamp);

    let mut added = 0;
    let mut conflicts = Vec::new();
    for event in sorted {
        match history.binary_search_by_key(&event.timestamp, |e| e.timestamp) {
            Ok(i) => {
                let kept = history[i].rating;
                if kept != event.rating {
                    conflicts.push(EventConflict {
                        timestamp: event.timestamp,
                        kept,
                        rejected: event.rating,
                    });
                }
            }
            Err(pos) => {
                history.insert(pos, event.clone());
                added += 1;
            }
        }
    }
    (added, conflicts)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use ratings_core::models::NO_DATA;
    use tempfile::TempDir;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap()
    }

    fn update(id: &str, comp: &str, events: Vec<RatingEvent>, conf: Option<f64>) -> ContestantUpdate {
        ContestantUpdate {
            external_id: id.to_string(),
            name: "A. Ioana".to_string(),
            country: "Romania".to_string(),
            competition: comp.to_string(),
            events,
            match_confidence: conf,
        }
    }

    fn db() -> ContestantDatabase {
        ContestantDatabase::new(MergePolicy::default())
    }

    // ── merge ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_merge_creates_record() {
        let mut db = db();
        let out = db
            .merge(&update(
                "ioana_a",
                "IOI 2024",
                vec![RatingEvent::new(ts(2023, 5, 1), 1600)],
                Some(0.95),
            ))
            .unwrap();

        assert!(out.created);
        assert!(out.competition_added);
        assert_eq!(out.events_added, 1);
        let r = db.get("ioana_a").unwrap();
        assert_eq!(r.display_name, "A. Ioana");
        assert_eq!(r.rating_for(2023), 1600);
        assert_eq!(r.rating_for(2024), NO_DATA);
        assert_eq!(r.most_recent_rating, 1600);
        assert!(!r.provisional);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut db = db();
        let u = update(
            "ioana_a",
            "IOI 2024",
            vec![
                RatingEvent::new(ts(2022, 3, 1), 1400),
                RatingEvent::new(ts(2023, 2, 1), 1600),
            ],
            Some(0.95),
        );
        db.merge(&u).unwrap();
        let before = db.get("ioana_a").unwrap().clone();

        let out = db.merge(&u).unwrap();
        assert!(!out.created);
        assert!(!out.competition_added);
        assert_eq!(out.events_added, 0);
        assert!(out.conflicts.is_empty());
        assert_eq!(db.get("ioana_a").unwrap(), &before);
    }

    #[test]
    fn test_merge_unions_competitions() {
        let mut db = db();
        db.merge(&update("ioana_a", "IOI 2024", vec![], Some(0.95))).unwrap();
        db.merge(&update("ioana_a", "EJOI 2023", vec![], None)).unwrap();
        let comps: Vec<&str> = db
            .get("ioana_a")
            .unwrap()
            .competitions
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(comps, vec!["EJOI 2023", "IOI 2024"]);
    }

    #[test]
    fn test_merge_conflict_keeps_first_seen() {
        let mut db = db();
        let t = ts(2023, 6, 1);
        db.merge(&update("x", "IOI 2024", vec![RatingEvent::new(t, 1500)], Some(0.95)))
            .unwrap();
        let out = db
            .merge(&update("x", "IOI 2024", vec![RatingEvent::new(t, 1700)], None))
            .unwrap();

        assert_eq!(
            out.conflicts,
            vec![EventConflict {
                timestamp: t,
                kept: 1500,
                rejected: 1700
            }]
        );
        let r = db.get("x").unwrap();
        assert_eq!(r.rating_history.len(), 1);
        assert_eq!(r.rating_for(2023), 1500);
    }

    #[test]
    fn test_merge_keeps_history_sorted() {
        let mut db = db();
        db.merge(&update(
            "x",
            "IOI 2024",
            vec![RatingEvent::new(ts(2024, 1, 1), 1800)],
            Some(0.95),
        ))
        .unwrap();
        db.merge(&update(
            "x",
            "IOI 2024",
            vec![
                RatingEvent::new(ts(2022, 1, 1), 1200),
                RatingEvent::new(ts(2023, 1, 1), 1500),
            ],
            None,
        ))
        .unwrap();
        let history = &db.get("x").unwrap().rating_history;
        assert!(history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(db.get("x").unwrap().most_recent_rating, 1800);
    }

    #[test]
    fn test_merge_rejects_low_confidence_creation() {
        let mut db = db();
        let err = db
            .merge(&update("x", "IOI 2024", vec![], Some(0.74)))
            .unwrap_err();
        assert!(matches!(err, RatingsError::UnresolvedIdentity { .. }));
        assert!(db.is_empty());
    }

    #[test]
    fn test_provisional_upgrade() {
        let mut db = db();
        db.merge(&update("x", "IOI 2024", vec![], Some(0.8))).unwrap();
        assert!(db.get("x").unwrap().provisional);

        // Lower evidence never lowers confidence.
        db.merge(&update("x", "BOI 2024", vec![], Some(0.78))).unwrap();
        assert_eq!(db.get("x").unwrap().confidence, 0.8);

        db.merge(&update("x", "CEOI 2024", vec![], Some(0.85))).unwrap();
        let r = db.get("x").unwrap();
        assert_eq!(r.confidence, 0.85);
        assert!(r.provisional);

        db.merge(&update("x", "EJOI 2024", vec![], Some(0.93))).unwrap();
        let r = db.get("x").unwrap();
        assert_eq!(r.confidence, 0.93);
        assert!(!r.provisional);
    }

    #[test]
    fn test_confirmed_record_confidence_is_stable() {
        let mut db = db();
        db.merge(&update("x", "IOI 2024", vec![], Some(0.92))).unwrap();
        db.merge(&update("x", "BOI 2024", vec![], Some(0.99))).unwrap();
        assert_eq!(db.get("x").unwrap().confidence, 0.92);
    }

    // ── lookups / override ────────────────────────────────────────────────────

    #[test]
    fn test_find_by_key_uses_normalized_alias() {
        let mut db = db();
        db.merge(&update("ioana_a", "IOI 2024", vec![], Some(0.95))).unwrap();
        assert!(db.find_by_key("a ioana", "ROMANIA").is_some());
        assert!(db.find_by_key("A. Ioana", "Poland").is_none());
    }

    #[test]
    fn test_find_by_handle_case_insensitive() {
        let mut db = db();
        db.merge(&update("Ioana_A", "JOI 2024", vec![], Some(1.0))).unwrap();
        assert_eq!(db.find_by_handle("ioana_a").unwrap().external_id, "Ioana_A");
        assert!(db.find_by_handle("someone").is_none());
    }

    #[test]
    fn test_override_identity() {
        let mut db = db();
        db.merge(&update("x", "IOI 2024", vec![], Some(0.95))).unwrap();
        db.override_identity("x", Some("Ana Ioana"), None).unwrap();

        let r = db.get("x").unwrap();
        assert_eq!(r.display_name, "Ana Ioana");
        assert_eq!(r.country, "Romania");
        assert!(db.find_by_key("Ana Ioana", "Romania").is_some());
        assert!(db.find_by_key("A. Ioana", "Romania").is_some());

        let err = db.override_identity("nobody", Some("N"), None).unwrap_err();
        assert!(matches!(err, RatingsError::UnknownContestant(_)));
    }

    // ── persistence ───────────────────────────────────────────────────────────

    #[test]
    fn test_load_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let db = ContestantDatabase::load(&dir.path().join("none.json"), MergePolicy::default())
            .unwrap();
        assert!(db.is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/database.json");

        let mut original = db();
        original
            .merge(&update(
                "ioana_a",
                "IOI 2024",
                vec![RatingEvent::new(ts(2023, 5, 1), 1600)],
                Some(0.8),
            ))
            .unwrap();
        original.save(&path).unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec!["database.json"]);

        let loaded = ContestantDatabase::load(&path, MergePolicy::default()).unwrap();
        assert_eq!(loaded.get("ioana_a"), original.get("ioana_a"));
        assert!(loaded.find_by_key("A. Ioana", "Romania").is_some());
        assert!(loaded.find_by_handle("IOANA_A").is_some());
    }

    #[test]
    fn test_load_recomputes_for_new_window() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("database.json");
        let mut original = db();
        original
            .merge(&update(
                "x",
                "IOI 2024",
                vec![RatingEvent::new(ts(2021, 5, 1), 1300)],
                Some(0.95),
            ))
            .unwrap();
        original.save(&path).unwrap();

        let policy = MergePolicy {
            window: YearWindow::new(2021, 2021),
            ..MergePolicy::default()
        };
        let loaded = ContestantDatabase::load(&path, policy).unwrap();
        let r = loaded.get("x").unwrap();
        assert_eq!(r.yearly_max.len(), 1);
        assert_eq!(r.rating_for(2021), 1300);
    }

    #[test]
    fn test_load_corrupt_file_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("database.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = ContestantDatabase::load(&path, MergePolicy::default()).unwrap_err();
        assert!(matches!(err, RatingsError::JsonParse(_)));
    }

    #[test]
    fn test_failed_save_keeps_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        // A non-empty directory squatting on the target makes the final rename fail.
        let path = dir.path().join("database.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep.txt"), "previous").unwrap();

        let mut db = db();
        db.merge(&update("x", "IOI 2024", vec![], Some(0.95))).unwrap();
        let err = db.save(&path).unwrap_err();
        assert!(matches!(err, RatingsError::Persistence { .. }));

        assert_eq!(std::fs::read_to_string(path.join("keep.txt")).unwrap(), "previous");
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1, "temp file must not outlive a failed save");
    }

    #[test]
    fn test_concurrent_saves_to_same_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("database.json");
        let mut db = db();
        for i in 0..500 {
            db.merge(&update(
                &format!("user_{i}"),
                "IOI 2024",
                vec![RatingEvent::new(ts(2023, 5, 1), 1500 + i)],
                Some(0.95),
            ))
            .unwrap();
        }

        for _ in 0..10 {
            std::thread::scope(|scope| {
                let handles: Vec<_> = (0..4).map(|_| scope.spawn(|| db.save(&path))).collect();
                for handle in handles {
                    handle.join().unwrap().unwrap();
                }
            });
            let loaded = ContestantDatabase::load(&path, MergePolicy::default()).unwrap();
            assert_eq!(loaded.len(), 500);
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_export_csv_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("database.csv");
        let mut db = db();
        db.merge(&update(
            "ioana_a",
            "IOI 2024",
            vec![RatingEvent::new(ts(2023, 5, 1), 1600)],
            Some(0.95),
        ))
        .unwrap();
        db.export_csv(&path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(
            headers,
            vec![
                "external_id",
                "display_name",
                "country",
                "competitions",
                "Codeforces_rating_2025",
                "Codeforces_rating_2024",
                "Codeforces_rating_2023",
                "Codeforces_rating_2022",
                "most_recent_rating",
                "confidence",
                "provisional",
            ]
        );
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[0], "ioana_a");
        assert_eq!(&row[3], "[\"IOI 2024\"]");
        assert_eq!(&row[6], "1600");
        assert_eq!(&row[7], "-1000");
    }

    // ── properties ────────────────────────────────────────────────────────────

    fn arb_update() -> impl Strategy<Value = ContestantUpdate> {
        (0usize..4, 0usize..3, prop::collection::vec(0i64..1500, 0..6)).prop_map(
            |(id, comp, days)| {
                let base = ts(2022, 1, 1).timestamp();
                ContestantUpdate {
                    external_id: format!("user{}", id),
                    name: format!("Contestant {}", id),
                    country: "Poland".to_string(),
                    competition: format!("BOI {}", 2022 + comp),
                    events: days
                        .into_iter()
                        .map(|d| {
                            // Rating is a function of the timestamp so no conflicts arise.
                            RatingEvent::new(
                                DateTime::from_timestamp(base + d * 86_400, 0).unwrap(),
                                1000 + (d as i32 % 700),
                            )
                        })
                        .collect(),
                    match_confidence: Some(0.8 + id as f64 * 0.05),
                }
            },
        )
    }

    proptest! {
        #[test]
        fn prop_merge_order_independent(
            (updates, shuffled) in prop::collection::vec(arb_update(), 1..12)
                .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
        ) {
            let mut a = db();
            let mut b = db();
            for u in &updates { a.merge(u).unwrap(); }
            for u in &shuffled { b.merge(u).unwrap(); }

            let ra: Vec<&ContestantRecord> = a.records().collect();
            let rb: Vec<&ContestantRecord> = b.records().collect();
            prop_assert_eq!(ra, rb);
        }

        #[test]
        fn prop_merge_twice_is_merge_once(
            updates in prop::collection::vec(arb_update(), 1..8)
        ) {
            let mut once = db();
            for u in &updates { once.merge(u).unwrap(); }
            let mut twice = once.clone();
            for u in &updates { twice.merge(u).unwrap(); }

            let r1: Vec<&ContestantRecord> = once.records().collect();
            let r2: Vec<&ContestantRecord> = twice.records().collect();
            prop_assert_eq!(r1, r2);
        }
    }
}

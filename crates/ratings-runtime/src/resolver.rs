//! Identity resolution.
//!
//! Maps a (name, country) pair from a result sheet to an external identity:
//! the contestant database is consulted first, then the profile directory.
//! Directory candidates are scored and the best one is accepted only if it
//! reaches the configured threshold. Service failures never abort the run;
//! they surface as [`Resolution::Unresolved`].

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ratings_core::models::{CandidateMatch, MatchSource, Resolution, ResultRow};
use ratings_core::normalize::{contestant_key, normalize_name, CountryTable};
use ratings_core::settings::ResolverConfig;
use ratings_data::database::ContestantDatabase;

use crate::retry::CallPolicy;
use crate::services::{ProfileCandidate, ProfileDirectory};

/// Database shared between workers. Held only for synchronous lookups and merges.
pub type SharedDatabase = Arc<Mutex<ContestantDatabase>>;

pub(crate) fn lock_db(db: &SharedDatabase) -> MutexGuard<'_, ContestantDatabase> {
    db.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Scoring ───────────────────────────────────────────────────────────────────

/// Combines name similarity and country agreement into a confidence in `[0, 1]`.
///
/// Both countries go through the same [`CountryTable`] as result rows, so
/// directory spellings such as `USA` or `South Korea` meet their canonical
/// forms.
#[derive(Debug, Clone)]
pub struct MatchScorer {
    name_weight: f64,
    country_weight: f64,
    countries: CountryTable,
}

impl MatchScorer {
    pub fn new(name_weight: f64, country_weight: f64, countries: CountryTable) -> Self {
        Self {
            name_weight,
            country_weight,
            countries,
        }
    }

    pub fn from_config(config: &ResolverConfig, countries: CountryTable) -> Self {
        Self::new(config.name_weight, config.country_weight, countries)
    }

    /// Similarity of two person names in `[0, 1]`.
    ///
    /// Best of Jaro-Winkler on the normalized names, Jaro-Winkler with tokens
    /// sorted (so "Ioana Ana" meets "Ana Ioana"), and token overlap where a
    /// single-letter initial counts as a partial match.
    pub fn name_similarity(a: &str, b: &str) -> f64 {
        let na = normalize_name(a);
        let nb = normalize_name(b);
        if na.is_empty() || nb.is_empty() {
            return 0.0;
        }
        if na == nb {
            return 1.0;
        }

        let ta: BTreeSet<&str> = na.split_whitespace().collect();
        let tb: BTreeSet<&str> = nb.split_whitespace().collect();
        let sorted_a = ta.iter().copied().collect::<Vec<_>>().join(" ");
        let sorted_b = tb.iter().copied().collect::<Vec<_>>().join(" ");

        let direct = strsim::jaro_winkler(&na, &nb);
        let reordered = strsim::jaro_winkler(&sorted_a, &sorted_b);
        let overlap = token_overlap(&ta, &tb);

        direct.max(reordered).max(overlap)
    }

    /// 1 when countries agree, 0 when they differ, 0.5 when either is unknown.
    pub fn country_agreement(&self, a: &str, b: &str) -> f64 {
        let na = normalize_name(&self.countries.canonicalize(a));
        let nb = normalize_name(&self.countries.canonicalize(b));
        if na.is_empty() || nb.is_empty() {
            0.5
        } else if na == nb {
            1.0
        } else {
            0.0
        }
    }

    pub fn score(&self, name: &str, country: &str, candidate: &ProfileCandidate) -> f64 {
        let total = self.name_weight + self.country_weight;
        if total <= 0.0 {
            return 0.0;
        }
        let combined = self.name_weight * Self::name_similarity(name, &candidate.name)
            + self.country_weight * self.country_agreement(country, &candidate.country);
        (combined / total).clamp(0.0, 1.0)
    }
}

const INITIAL_MATCH: f64 = 0.8;

fn token_overlap(a: &BTreeSet<&str>, b: &BTreeSet<&str>) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let matched: f64 = small
        .iter()
        .map(|t| {
            if large.contains(t) {
                1.0
            } else if large.iter().any(|o| is_initial_of(t, o) || is_initial_of(o, t)) {
                INITIAL_MATCH
            } else {
                0.0
            }
        })
        .sum();
    matched / large.len().max(1) as f64
}

fn is_initial_of(initial: &str, token: &str) -> bool {
    initial.chars().count() == 1 && token.len() > 1 && token.starts_with(initial)
}

/// Higher confidence first, then higher reputation, then smaller external id.
fn rank(a: &(f64, &ProfileCandidate), b: &(f64, &ProfileCandidate)) -> Ordering {
    b.0.total_cmp(&a.0)
        .then_with(|| {
            let ra = a.1.reputation.unwrap_or(f64::NEG_INFINITY);
            let rb = b.1.reputation.unwrap_or(f64::NEG_INFINITY);
            rb.total_cmp(&ra)
        })
        .then_with(|| a.1.external_id.cmp(&b.1.external_id))
}

// ── Resolver ──────────────────────────────────────────────────────────────────

pub struct IdentityResolver {
    directory: Arc<dyn ProfileDirectory>,
    db: SharedDatabase,
    policy: Arc<CallPolicy>,
    scorer: MatchScorer,
    config: ResolverConfig,
}

impl IdentityResolver {
    pub fn new(
        directory: Arc<dyn ProfileDirectory>,
        db: SharedDatabase,
        policy: Arc<CallPolicy>,
        config: ResolverConfig,
        countries: CountryTable,
    ) -> Self {
        Self {
            directory,
            db,
            policy,
            scorer: MatchScorer::from_config(&config, countries),
            config,
        }
    }

    /// Key under which concurrent resolutions of the same contestant are
    /// serialized.
    pub fn resolution_key(&self, row: &ResultRow) -> String {
        if self.config.is_handle_competition(&row.competition) {
            format!("handle:{}", row.contestant.trim().to_lowercase())
        } else {
            contestant_key(&row.contestant, &row.country)
        }
    }

    pub async fn resolve(&self, row: &ResultRow) -> Resolution {
        if let Some(hit) = self.cached(row) {
            tracing::debug!(name = %row.contestant, external_id = %hit.external_id, "cache hit");
            return Resolution::Matched(hit);
        }

        if self.config.is_handle_competition(&row.competition) {
            self.resolve_handle(row).await
        } else {
            self.resolve_search(row).await
        }
    }

    /// A database hit is authoritative and reported with confidence 1.0.
    fn cached(&self, row: &ResultRow) -> Option<CandidateMatch> {
        let db = lock_db(&self.db);
        let record = (if self.config.is_handle_competition(&row.competition) {
            db.find_by_handle(&row.contestant)
        } else {
            db.find_by_key(&row.contestant, &row.country)
        })?;
        Some(CandidateMatch {
            external_id: record.external_id.clone(),
            matched_name: record.display_name.clone(),
            matched_country: record.country.clone(),
            confidence: 1.0,
            source: MatchSource::Cache,
        })
    }

    async fn resolve_handle(&self, row: &ResultRow) -> Resolution {
        let handle = row.contestant.trim();
        let found = self
            .policy
            .call("profile lookup", || self.directory.lookup(handle))
            .await;

        match found {
            Ok(Some(profile)) => Resolution::Matched(CandidateMatch {
                external_id: profile.external_id,
                matched_name: profile.name,
                matched_country: profile.country,
                confidence: 1.0,
                source: MatchSource::Handle,
            }),
            Ok(None) => Resolution::unresolved(format!("no profile with handle '{handle}'")),
            Err(e) => Resolution::unresolved(format!("profile lookup failed: {e}")),
        }
    }

    async fn resolve_search(&self, row: &ResultRow) -> Resolution {
        let name = row.contestant.as_str();
        let country = row.country.as_str();
        let candidates = match self
            .policy
            .call("profile search", || self.directory.search(name, country))
            .await
        {
            Ok(c) => c,
            Err(e) => return Resolution::unresolved(format!("profile search failed: {e}")),
        };

        match self.select(name, country, &candidates) {
            Some(m) => Resolution::Matched(m),
            None if candidates.is_empty() => Resolution::unresolved("no candidates"),
            None => {
                let best = candidates
                    .iter()
                    .map(|c| self.scorer.score(name, country, c))
                    .fold(0.0_f64, f64::max);
                Resolution::unresolved(format!(
                    "best of {} candidates scored {:.3}, below threshold {:.3}",
                    candidates.len(),
                    best,
                    self.config.accept_threshold
                ))
            }
        }
    }

    /// Best-scoring candidate if it reaches the acceptance threshold.
    pub fn select(
        &self,
        name: &str,
        country: &str,
        candidates: &[ProfileCandidate],
    ) -> Option<CandidateMatch> {
        let mut scored: Vec<(f64, &ProfileCandidate)> = candidates
            .iter()
            .map(|c| (self.scorer.score(name, country, c), c))
            .collect();
        scored.sort_by(rank);

        let (confidence, best) = scored.into_iter().next()?;
        if confidence < self.config.accept_threshold {
            return None;
        }
        Some(CandidateMatch {
            external_id: best.external_id.clone(),
            matched_name: best.name.clone(),
            matched_country: best.country.clone(),
            confidence,
            source: MatchSource::Search,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

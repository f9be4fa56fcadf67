//! External service interfaces.
//!
//! The pipeline only talks to the outside world through [`ProfileDirectory`]
//! and [`RatingService`]. [`LocalDirectory`] implements both over a JSON file
//! so runs can be reproduced offline.

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use ratings_core::error::{RatingsError, Result};
use ratings_core::models::RatingEvent;
use ratings_core::normalize::normalize_name;
use ratings_core::time_utils::parse_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A profile returned by a directory search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileCandidate {
    pub external_id: String,
    pub name: String,
    #[serde(default)]
    pub country: String,
    /// Popularity/standing signal used to break confidence ties.
    #[serde(default)]
    pub reputation: Option<f64>,
}

/// Searchable directory of external profiles.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// Candidates plausibly matching a (name, country) pair. May be empty.
    async fn search(&self, name: &str, country: &str) -> Result<Vec<ProfileCandidate>>;

    /// Profile with exactly this handle, if it exists.
    async fn lookup(&self, handle: &str) -> Result<Option<ProfileCandidate>>;
}

/// Source of rating histories.
#[async_trait]
pub trait RatingService: Send + Sync {
    /// Full rating history for an identity. An empty history is valid.
    async fn fetch(&self, external_id: &str) -> Result<Vec<RatingEvent>>;
}

// ── LocalDirectory ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct LocalProfile {
    #[serde(flatten)]
    profile: ProfileCandidate,
    #[serde(default)]
    ratings: Vec<LocalRating>,
}

#[derive(Debug, Clone, Deserialize)]
struct LocalRating {
    timestamp: Value,
    rating: i32,
}

#[derive(Debug, Clone, Deserialize)]
struct LocalFile {
    profiles: Vec<LocalProfile>,
}

/// Profiles and rating histories loaded from a JSON document of the form
/// `{"profiles": [{"external_id", "name", "country", "reputation", "ratings": [{"timestamp", "rating"}]}]}`.
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    profiles: Vec<LocalProfile>,
}

impl LocalDirectory {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| RatingsError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file: LocalFile = serde_json::from_str(content)?;
        tracing::debug!(profiles = file.profiles.len(), "local directory loaded");
        Ok(Self {
            profiles: file.profiles,
        })
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    fn find(&self, handle: &str) -> Option<&LocalProfile> {
        let wanted = handle.trim().to_lowercase();
        self.profiles
            .iter()
            .find(|p| p.profile.external_id.to_lowercase() == wanted)
    }
}

fn tokens(name: &str) -> BTreeSet<String> {
    normalize_name(name)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl ProfileDirectory for LocalDirectory {
    /// Profiles sharing at least one name token with the query, or whose
    /// handle equals it. Country is left to the scorer.
    async fn search(&self, name: &str, _country: &str) -> Result<Vec<ProfileCandidate>> {
        let query = tokens(name);
        let handle = name.trim().to_lowercase();
        Ok(self
            .profiles
            .iter()
            .filter(|p| {
                p.profile.external_id.to_lowercase() == handle
                    || !tokens(&p.profile.name).is_disjoint(&query)
            })
            .map(|p| p.profile.clone())
            .collect())
    }

    async fn lookup(&self, handle: &str) -> Result<Option<ProfileCandidate>> {
        Ok(self.find(handle).map(|p| p.profile.clone()))
    }
}

#[async_trait]
impl RatingService for LocalDirectory {
    async fn fetch(&self, external_id: &str) -> Result<Vec<RatingEvent>> {
        let Some(profile) = self.find(external_id) else {
            return Ok(Vec::new());
        };
        profile
            .ratings
            .iter()
            .map(|r| {
                parse_timestamp(&r.timestamp)
                    .map(|ts| RatingEvent::new(ts, r.rating))
                    .ok_or_else(|| {
                        RatingsError::MalformedPayload(format!(
                            "bad timestamp {} for {}",
                            r.timestamp, external_id
                        ))
                    })
            })
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

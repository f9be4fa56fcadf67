//! Result-row normalization.
//!
//! Canonicalizes country spellings, restricts sheet columns to the recognized
//! schema and builds the comparison keys used to match contestants across
//! sheets and against the contestant database.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::{RatingsError, Result};
use crate::models::ResultRow;

// ── Country canonicalization ──────────────────────────────────────────────────

/// ISO 3166-1 alpha-3 codes seen on result sheets, mapped to the canonical
/// country names used by the rating service.
const COUNTRY_CODES: &[(&str, &str)] = &[
    ("POL", "Poland"),
    ("LVA", "Latvia"),
    ("FIN", "Finland"),
    ("SWE", "Sweden"),
    ("ISL", "Iceland"),
    ("LTU", "Lithuania"),
    ("DNK", "Denmark"),
    ("PRT", "Portugal"),
    ("AZE", "Azerbaijan"),
    ("SVN", "Slovenia"),
    ("BEL", "Belgium"),
    ("NLD", "Netherlands"),
    ("EST", "Estonia"),
    ("NOR", "Norway"),
    ("USA", "United States of America"),
    ("HKG", "Hong Kong, China"),
    ("CHN", "China"),
    ("JPN", "Japan"),
    ("KOR", "Republic of Korea"),
    ("IRN", "Iran"),
    ("ISR", "Israel"),
    ("VNM", "Vietnam"),
    ("THA", "Thailand"),
    ("SGP", "Singapore"),
    ("MYS", "Malaysia"),
    ("IDN", "Indonesia"),
    ("TWN", "Taiwan"),
    ("IND", "India"),
    ("BGD", "Bangladesh"),
    ("ROU", "Romania"),
    ("HUN", "Hungary"),
    ("BGR", "Bulgaria"),
    ("SRB", "Serbia"),
    ("HRV", "Croatia"),
    ("SVK", "Slovakia"),
    ("CZE", "Czech Republic"),
    ("GBR", "United Kingdom"),
    ("FRA", "France"),
    ("DEU", "Germany"),
    ("ESP", "Spain"),
    ("ITA", "Italy"),
    ("CHE", "Switzerland"),
    ("AUT", "Austria"),
    ("TUR", "Türkiye"),
    ("BRA", "Brazil"),
    ("EGY", "Egypt"),
    ("GEO", "Georgia"),
    ("BIH", "Bosnia and Herzegovina"),
    ("CYP", "Cyprus"),
    ("AUS", "Australia"),
    ("ARM", "Armenia"),
    ("MKD", "North Macedonia"),
    ("KGZ", "Kyrgyzstan"),
    ("UZB", "Uzbekistan"),
    ("MEX", "Mexico"),
    ("PER", "Peru"),
    ("MNG", "Mongolia"),
    ("KAZ", "Kazakhstan"),
    ("IRL", "Ireland"),
    ("SAU", "Saudi Arabia"),
    ("GRC", "Greece"),
    ("NZL", "New Zealand"),
    ("LUX", "Luxembourg"),
    ("ARE", "United Arab Emirates"),
    ("DZA", "Algeria"),
    ("UKR", "Ukraine"),
    ("TUN", "Tunisia"),
    ("BOL", "Bolivia"),
    ("MDA", "Moldova"),
    ("ECU", "Ecuador"),
];

/// Free-text spellings that differ from the canonical name.
const COUNTRY_ALIASES: &[(&str, &str)] = &[
    ("UK", "United Kingdom"),
    ("HONG KONG", "Hong Kong, China"),
    ("KOREA", "Republic of Korea"),
    ("SOUTH KOREA", "Republic of Korea"),
    ("UNITED STATES", "United States of America"),
    ("TURKEY", "Türkiye"),
];

/// Alias → canonical country lookup.
///
/// Keys are matched case-insensitively on the trimmed input. Values with no
/// entry pass through trimmed.
#[derive(Debug, Clone)]
pub struct CountryTable {
    aliases: HashMap<String, String>,
}

impl CountryTable {
    /// Built-in table extended with `extra` (which wins on collision).
    pub fn new(extra: &BTreeMap<String, String>) -> Self {
        let mut aliases: HashMap<String, String> = COUNTRY_CODES
            .iter()
            .chain(COUNTRY_ALIASES.iter())
            .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
            .collect();
        for (alias, canonical) in extra {
            aliases.insert(alias.trim().to_uppercase(), canonical.clone());
        }
        Self { aliases }
    }

    pub fn canonicalize(&self, country: &str) -> String {
        let trimmed = country.trim();
        if trimmed.is_empty() {
            return String::new();
        }
        self.aliases
            .get(&trimmed.to_uppercase())
            .cloned()
            .unwrap_or_else(|| trimmed.to_string())
    }
}

impl Default for CountryTable {
    fn default() -> Self {
        Self::new(&BTreeMap::new())
    }
}

// ── Column schema ─────────────────────────────────────────────────────────────

pub const COL_RANK: &str = "Rank";
pub const COL_CONTESTANT: &str = "Contestant";
pub const COL_COUNTRY: &str = "Country";
pub const COL_TOTAL: &str = "Total";
pub const COL_MEDAL: &str = "medal";

/// Placement columns passed through in [`ResultRow::placement`].
pub const PLACEMENT_COLUMNS: &[&str] = &[COL_RANK, COL_TOTAL, COL_MEDAL];

/// Lower-cased source header → recognized column.
const COLUMN_ALIASES: &[(&str, &str)] = &[
    ("contestant", COL_CONTESTANT),
    ("name", COL_CONTESTANT),
    ("contestant_contestant", COL_CONTESTANT),
    ("english name", COL_CONTESTANT),
    ("country", COL_COUNTRY),
    ("country_country", COL_COUNTRY),
    ("location", COL_COUNTRY),
    ("rank", COL_RANK),
    ("rank_rank", COL_RANK),
    ("ranking", COL_RANK),
    ("total", COL_TOTAL),
    ("total score", COL_TOTAL),
    ("total_score", COL_TOTAL),
    ("score", COL_TOTAL),
    ("score_score", COL_TOTAL),
    ("points", COL_TOTAL),
    ("score▼_abs.", COL_TOTAL),
    ("ukupno", COL_TOTAL),
    ("medal", COL_MEDAL),
    ("award", COL_MEDAL),
    ("award_award", COL_MEDAL),
    ("prize", COL_MEDAL),
    ("mention", COL_MEDAL),
    ("medal english", COL_MEDAL),
];

/// Map a raw header to its recognized column, or `None` when the column is
/// not part of the schema and should be dropped.
pub fn canonical_column(header: &str) -> Option<&'static str> {
    let lower = header.trim().to_lowercase();
    COLUMN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, target)| *target)
}

// ── Name keys ─────────────────────────────────────────────────────────────────

/// Latin letters that carry no decomposable accent and need an explicit
/// base form.
fn fold_letter(c: char) -> Option<&'static str> {
    let folded = match c {
        'æ' => "ae",
        'đ' | 'ð' => "d",
        'ħ' => "h",
        'ı' => "i",
        'ł' | 'ŀ' => "l",
        'ø' => "o",
        'œ' => "oe",
        'ß' => "ss",
        'ŧ' => "t",
        'þ' => "th",
        _ => return None,
    };
    Some(folded)
}

/// Comparison form of a person's name.
///
/// Applies compatibility decomposition (NFKD), drops combining marks,
/// lower-cases, folds the remaining Latin special letters (`Kalniņš` →
/// `kalnins`, `Đức` → `duc`), turns punctuation into spaces and collapses
/// whitespace.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let chars = name
        .nfkd()
        .flat_map(char::to_lowercase)
        .filter(|c| !is_combining_mark(*c));
    for c in chars {
        if let Some(folded) = fold_letter(c) {
            out.push_str(folded);
        } else if c.is_alphanumeric() {
            out.push(c);
        } else {
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cache key for a (name, country) pair: `"<normalized name>|<normalized country>"`.
pub fn contestant_key(name: &str, country: &str) -> String {
    format!("{}|{}", normalize_name(name), normalize_name(country))
}

// ── Normalizer ────────────────────────────────────────────────────────────────

/// Converts raw sheet rows into [`ResultRow`]s.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    countries: CountryTable,
    /// Competition-key prefix → country used when a sheet has no country column.
    default_countries: Vec<(String, String)>,
}

impl Normalizer {
    pub fn new(countries: CountryTable, default_countries: &BTreeMap<String, String>) -> Self {
        // Longest prefix first so "JOI Open" wins over "JOI".
        let mut defaults: Vec<(String, String)> = default_countries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        defaults.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self {
            countries,
            default_countries: defaults,
        }
    }

    /// Normalize one raw row given as ordered `(header, value)` pairs.
    ///
    /// Unrecognized columns are dropped; when two source columns map to the
    /// same target the first one wins. Fails with [`RatingsError::Schema`]
    /// when no contestant column exists, or when no country column exists and
    /// no default country is configured for `competition`.
    pub fn normalize(
        &self,
        raw: &[(String, String)],
        competition: &str,
        year: i32,
    ) -> Result<ResultRow> {
        let mut recognized: BTreeMap<&'static str, String> = BTreeMap::new();
        for (header, value) in raw {
            match canonical_column(header) {
                Some(target) => {
                    recognized
                        .entry(target)
                        .or_insert_with(|| value.trim().to_string());
                }
                None => debug!(column = %header, "dropping unrecognized column"),
            }
        }

        let contestant = recognized
            .remove(COL_CONTESTANT)
            .ok_or_else(|| RatingsError::schema(COL_CONTESTANT))?;

        let country = match recognized.remove(COL_COUNTRY) {
            Some(c) => self.countries.canonicalize(&c),
            None => self
                .default_country(competition)
                .ok_or_else(|| RatingsError::schema(COL_COUNTRY))?,
        };

        let placement = recognized
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        Ok(ResultRow {
            contestant,
            country,
            competition: competition.to_string(),
            year,
            placement,
        })
    }

    fn default_country(&self, competition: &str) -> Option<String> {
        self.default_countries
            .iter()
            .find(|(prefix, _)| competition.starts_with(prefix.as_str()))
            .map(|(_, country)| country.clone())
    }
}

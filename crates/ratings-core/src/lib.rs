//! Domain layer for the contest-ratings pipeline.
//!
//! Holds the error taxonomy, the persisted and transient data model, the
//! result-row normalizer, robust statistics and the outlier filter, plus the
//! CLI and pipeline configuration types shared by the other crates.

pub mod error;
pub mod models;
pub mod normalize;
pub mod outliers;
pub mod settings;
pub mod stats;
pub mod time_utils;

pub use error::{RatingsError, Result};

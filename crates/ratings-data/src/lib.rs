//! Data layer for the contest-ratings pipeline.
//!
//! Discovers and reads contest result sheets, reduces rating histories into
//! per-year summaries, owns the persistent contestant database and its merge
//! discipline, and writes enriched and filtered result sheets.

pub mod aggregator;
pub mod database;
pub mod enrichment;
pub mod reader;
pub mod sheet_filter;

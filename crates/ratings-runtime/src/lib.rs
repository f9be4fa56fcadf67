//! Async runtime for the contest-ratings pipeline.
//!
//! Resolves contestants against an external profile directory, fetches their
//! rating histories, and merges the results into the shared database through
//! a bounded pool of concurrent workers.

pub mod fetcher;
pub mod locks;
pub mod pipeline;
pub mod resolver;
pub mod retry;
pub mod services;

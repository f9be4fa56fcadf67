//! Rating-history retrieval.

use std::sync::Arc;

use ratings_core::error::Result;
use ratings_core::models::RatingEvent;
use ratings_core::time_utils::{year_of, YearWindow};

use crate::retry::CallPolicy;
use crate::services::RatingService;

pub struct RatingFetcher {
    service: Arc<dyn RatingService>,
    policy: Arc<CallPolicy>,
}

impl RatingFetcher {
    pub fn new(service: Arc<dyn RatingService>, policy: Arc<CallPolicy>) -> Self {
        Self { service, policy }
    }

    /// Fetch the history for `external_id` between `window.first` and
    /// `window.last` inclusive, sorted by timestamp.
    ///
    /// Events repeating a timestamp within one payload keep the first value.
    /// An `Err` means every attempt failed; the caller records the failure
    /// and carries on.
    pub async fn fetch_history(
        &self,
        external_id: &str,
        window: YearWindow,
    ) -> Result<Vec<RatingEvent>> {
        let mut events = self
            .policy
            .call("rating fetch", || self.service.fetch(external_id))
            .await?;
        events.retain(|e| window.contains(year_of(e.timestamp)));

        events.sort_by_key(|e| e.timestamp);
        let before = events.len();
        events.dedup_by_key(|e| e.timestamp);
        if events.len() != before {
            tracing::warn!(
                external_id,
                dropped = before - events.len(),
                "payload repeated timestamps"
            );
        }

        tracing::debug!(external_id, events = events.len(), "rating history fetched");
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use ratings_core::error::RatingsError;
    use ratings_core::settings::ServiceConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyService {
        failures_before_success: usize,
        calls: AtomicUsize,
        events: Vec<RatingEvent>,
    }

    #[async_trait]
    impl RatingService for FlakyService {
        async fn fetch(&self, _external_id: &str) -> Result<Vec<RatingEvent>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                Err(RatingsError::TransientService("timeout".into()))
            } else {
                Ok(self.events.clone())
            }
        }
    }

    fn fetcher(service: Arc<FlakyService>) -> RatingFetcher {
        let policy = CallPolicy::from_config(&ServiceConfig {
            base_backoff_ms: 1,
            requests_per_second: 1000,
            ..ServiceConfig::default()
        });
        RatingFetcher::new(service, Arc::new(policy))
    }

    fn ev(day: u32, rating: i32) -> RatingEvent {
        RatingEvent::new(Utc.with_ymd_and_hms(2023, 3, day, 0, 0, 0).unwrap(), rating)
    }

    #[tokio::test]
    async fn test_fetch_sorts_and_dedups() {
        let service = Arc::new(FlakyService {
            failures_before_success: 0,
            calls: AtomicUsize::new(0),
            events: vec![ev(5, 1500), ev(1, 1400), ev(5, 1600)],
        });
        let events = fetcher(service).fetch_history("x", YearWindow::default()).await.unwrap();
        assert_eq!(events, vec![ev(1, 1400), ev(5, 1500)]);
    }

    #[tokio::test]
    async fn test_fetch_retries_transient() {
        let service = Arc::new(FlakyService {
            failures_before_success: 2,
            calls: AtomicUsize::new(0),
            events: vec![ev(1, 1400)],
        });
        let events = fetcher(service.clone()).fetch_history("x", YearWindow::default()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fetch_exhausted() {
        let service = Arc::new(FlakyService {
            failures_before_success: 10,
            calls: AtomicUsize::new(0),
            events: vec![],
        });
        let err = fetcher(service.clone()).fetch_history("x", YearWindow::default()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fetch_limited_to_window() {
        let service = Arc::new(FlakyService {
            failures_before_success: 0,
            calls: AtomicUsize::new(0),
            events: vec![
                RatingEvent::new(Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap(), 2400),
                ev(1, 1400),
                RatingEvent::new(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(), 1700),
            ],
        });
        let events = fetcher(service)
            .fetch_history("x", YearWindow::new(2022, 2023))
            .await
            .unwrap();
        assert_eq!(events, vec![ev(1, 1400)]);
    }

    #[tokio::test]
    async fn test_empty_history_is_valid() {
        let service = Arc::new(FlakyService {
            failures_before_success: 0,
            calls: AtomicUsize::new(0),
            events: vec![],
        });
        assert!(fetcher(service).fetch_history("x", YearWindow::default()).await.unwrap().is_empty());
    }
}

use std::{fmt::Debug, hash::Hash, sync::Arc};

use chrono::NaiveDate;
use infrastructure::meter;
use moka::future::Cache;

use super::source::FetchError;

//drops entries no asset asks for anymore, e.g. of a position a sunbutton moved away from
const IDLE_EXPIRY: std::time::Duration = std::time::Duration::from_secs(2 * 24 * 60 * 60);

/// Identifies one fetchable record. A key is only valid on a single day.
pub trait RefreshKey: Debug + Clone + Hash + Eq + Send + Sync + 'static {
    fn valid_on(&self) -> NaiveDate;

    /// Whether a cached entry for `other` is stale once `self` is requested.
    fn supersedes(&self, other: &Self) -> bool {
        other.valid_on() < self.valid_on()
    }
}

/// Performs the outbound call for a key. Called at most once per key and flight by the cache.
pub trait ExternalSource: Send + Sync + 'static {
    type Key: RefreshKey;
    type Record: Debug + Clone + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    fn fetch(&self, key: &Self::Key) -> impl Future<Output = Result<Self::Record, FetchError>> + Send;
}

pub struct ExternalDataCache<S: ExternalSource> {
    source: Arc<S>,
    entries: Cache<S::Key, S::Record>,
}

impl<S: ExternalSource> Clone for ExternalDataCache<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            entries: self.entries.clone(),
        }
    }
}

impl<S: ExternalSource> ExternalDataCache<S> {
    pub fn new(source: S) -> Self {
        Self {
            source: Arc::new(source),
            entries: Cache::builder()
                .max_capacity(256)
                .time_to_idle(IDLE_EXPIRY)
                .build(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns the record for `key`, fetching it if absent. Concurrent callers of the same
    /// missing key share one fetch and its outcome. Failures are handed to all waiters but
    /// never stored.
    pub async fn fetch(&self, key: S::Key) -> Result<S::Record, Arc<FetchError>> {
        self.evict_stale(&key).await;

        let source = self.source.clone();
        let fetch_key = key.clone();

        self.entries
            .try_get_with(key, async move {
                tracing::debug!("No cached {} data for {:?}, fetching", source.name(), fetch_key);

                let result = source.fetch(&fetch_key).await;

                match &result {
                    Ok(_) => meter::increment("external_fetch", &[("source", source.name()), ("result", "ok")]),
                    Err(e) => {
                        tracing::warn!("Fetching {} data for {:?} failed: {}", source.name(), fetch_key, e);
                        meter::increment("external_fetch", &[("source", source.name()), ("result", e.kind())])
                    }
                }

                result
            })
            .await
    }

    pub fn contains(&self, key: &S::Key) -> bool {
        self.entries.contains_key(key)
    }

    //Entries of an earlier day are replaced lazily on access
    async fn evict_stale(&self, requested: &S::Key) {
        let stale: Vec<Arc<S::Key>> = self
            .entries
            .iter()
            .filter(|(key, _)| requested.supersedes(key))
            .map(|(key, _)| key)
            .collect();

        for key in stale {
            tracing::debug!("Evicting stale {} data for {:?}", self.source.name(), key);
            self.entries.invalidate(key.as_ref()).await;
        }
    }
}

#[cfg(test)]
pub mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use tokio::sync::Notify;

    use super::*;

    #[derive(Debug, Clone, Hash, PartialEq, Eq)]
    pub struct TestKey {
        pub date: NaiveDate,
        pub name: &'static str,
    }

    impl TestKey {
        pub fn new(day: u32, name: &'static str) -> Self {
            Self {
                date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
                name,
            }
        }
    }

    impl RefreshKey for TestKey {
        fn valid_on(&self) -> NaiveDate {
            self.date
        }
    }

    /// Source whose records are the key name plus a fetch counter.
    #[derive(Default)]
    pub struct CountingSource {
        pub calls: AtomicUsize,
        pub delay: Duration,
        pub failures_left: AtomicUsize,
        pub gate: Option<Arc<Notify>>,
    }

    impl CountingSource {
        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        pub fn failing_once() -> Self {
            Self {
                failures_left: AtomicUsize::new(1),
                ..Default::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ExternalSource for CountingSource {
        type Key = TestKey;
        type Record = String;

        fn name(&self) -> &'static str {
            "counting"
        }

        async fn fetch(&self, key: &TestKey) -> Result<String, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

            if key.name == "gated" {
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
            }

            tokio::time::sleep(self.delay).await;

            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
            {
                return Err(FetchError::BadStatus {
                    url: format!("https://example.com/{}", key.name),
                    status: 503,
                });
            }

            Ok(format!("{}#{}", key.name, n))
        }
    }

    fn failed_status(result: &Result<String, Arc<FetchError>>) -> Option<u16> {
        match result.as_ref().map_err(|e| e.as_ref()) {
            Err(FetchError::BadStatus { status, .. }) => Some(*status),
            _ => None,
        }
    }

    async fn fetch_concurrently(cache: &ExternalDataCache<CountingSource>, n: usize) -> Vec<String> {
        let calls = (0..n).map(|_| cache.fetch(TestKey::new(1, "se3")));

        futures::future::join_all(calls)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect()
    }

    #[tokio::test]
    async fn single_caller_fetches_once() {
        let cache = ExternalDataCache::new(CountingSource::with_delay(Duration::from_millis(20)));

        let records = fetch_concurrently(&cache, 1).await;
        let again = cache.fetch(TestKey::new(1, "se3")).await.unwrap();

        assert_eq!(records, vec!["se3#1".to_string()]);
        assert_eq!(again, "se3#1");
        assert_eq!(cache.source().calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let cache = ExternalDataCache::new(CountingSource::with_delay(Duration::from_millis(50)));

        let records = fetch_concurrently(&cache, 10).await;

        assert_eq!(cache.source().calls(), 1);
        assert!(records.iter().all(|r| r == "se3#1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_tasks_share_one_fetch() {
        let cache = ExternalDataCache::new(CountingSource::with_delay(Duration::from_millis(50)));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.fetch(TestKey::new(1, "se3")).await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "se3#1");
        }
        assert_eq!(cache.source().calls(), 1);
    }

    #[tokio::test]
    async fn failure_is_shared_but_not_cached() {
        let source = CountingSource {
            delay: Duration::from_millis(30),
            failures_left: AtomicUsize::new(1),
            ..Default::default()
        };
        let cache = ExternalDataCache::new(source);

        let (a, b) = tokio::join!(cache.fetch(TestKey::new(1, "se3")), cache.fetch(TestKey::new(1, "se3")));

        assert_eq!(failed_status(&a), Some(503));
        assert_eq!(failed_status(&b), Some(503));
        assert_eq!(cache.source().calls(), 1);
        assert!(!cache.contains(&TestKey::new(1, "se3")));

        let retried = cache.fetch(TestKey::new(1, "se3")).await.unwrap();

        assert_eq!(retried, "se3#2");
        assert_eq!(cache.source().calls(), 2);
    }

    #[tokio::test]
    async fn failed_fetch_is_retried_by_next_caller() {
        let cache = ExternalDataCache::new(CountingSource::failing_once());

        assert!(cache.fetch(TestKey::new(1, "se3")).await.is_err());
        assert_eq!(cache.fetch(TestKey::new(1, "se3")).await.unwrap(), "se3#2");
    }

    #[tokio::test]
    async fn different_keys_do_not_wait_for_each_other() {
        let gate = Arc::new(Notify::new());
        let cache = ExternalDataCache::new(CountingSource {
            gate: Some(gate.clone()),
            ..Default::default()
        });

        let blocked = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.fetch(TestKey::new(1, "gated")).await })
        };

        let other = tokio::time::timeout(Duration::from_secs(1), cache.fetch(TestKey::new(1, "se4")))
            .await
            .expect("fetch of another key must not wait for the gated fetch");

        assert!(other.is_ok());
        assert!(!blocked.is_finished());

        gate.notify_one();
        assert!(blocked.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn entries_of_previous_day_are_replaced() {
        let cache = ExternalDataCache::new(CountingSource::default());

        cache.fetch(TestKey::new(1, "se3")).await.unwrap();
        cache.fetch(TestKey::new(1, "se4")).await.unwrap();
        cache.fetch(TestKey::new(2, "se3")).await.unwrap();

        assert!(!cache.contains(&TestKey::new(1, "se3")));
        assert!(!cache.contains(&TestKey::new(1, "se4")));
        assert!(cache.contains(&TestKey::new(2, "se3")));
        assert_eq!(cache.source().calls(), 3);
    }

    #[tokio::test]
    async fn earlier_day_does_not_evict_later_one() {
        let cache = ExternalDataCache::new(CountingSource::default());

        cache.fetch(TestKey::new(2, "se3")).await.unwrap();
        cache.fetch(TestKey::new(1, "se4")).await.unwrap();

        assert!(cache.contains(&TestKey::new(2, "se3")));
        assert!(cache.contains(&TestKey::new(1, "se4")));
    }
}

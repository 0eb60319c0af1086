//! Helpers shared between the integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use crate::{FetchError, Fetcher, QueryCache, QueryKey, QuerySnapshot};

/// Setup the test environment.
///
/// - Initializes logs: all console output is captured by the test runner.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("query_cache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A fetcher producing `"{key}#{call}"` strings, counting its calls.
///
/// Each fetch takes [`Self::DELAY`] of (paused) tokio time, giving tests a
/// deterministic in-flight window. Keys containing the string `"fail"`
/// produce a [`FetchError`] instead.
pub struct TestFetcher {
    calls: AtomicUsize,
}

impl TestFetcher {
    pub const DELAY: Duration = Duration::from_millis(100);

    pub fn new() -> Self {
        TestFetcher {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Fetcher for Arc<TestFetcher> {
    type Value = String;

    fn fetch(&self, key: &QueryKey) -> BoxFuture<'static, Result<String, FetchError>> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        let key = key.to_string();
        Box::pin(async move {
            tokio::time::sleep(TestFetcher::DELAY).await;
            if key.contains("fail") {
                Err(FetchError::new(format!("no such resource: {key}")))
            } else {
                Ok(format!("{key}#{call}"))
            }
        })
    }
}

/// Creates a cache over a fresh [`TestFetcher`].
pub fn test_cache() -> (QueryCache<Arc<TestFetcher>>, Arc<TestFetcher>) {
    let fetcher = Arc::new(TestFetcher::new());
    (QueryCache::new(Arc::clone(&fetcher)), fetcher)
}

/// Records every snapshot delivered to one observer.
#[derive(Clone, Default)]
pub struct Recorder {
    snapshots: Arc<Mutex<Vec<QuerySnapshot<String>>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The callback to register with [`QueryCache::subscribe`].
    pub fn callback(&self) -> impl Fn(QuerySnapshot<String>) + Send + Sync + 'static {
        let snapshots = Arc::clone(&self.snapshots);
        move |snapshot| snapshots.lock().unwrap().push(snapshot)
    }

    pub fn snapshots(&self) -> Vec<QuerySnapshot<String>> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn last(&self) -> QuerySnapshot<String> {
        self.snapshots
            .lock()
            .unwrap()
            .last()
            .expect("no snapshot delivered")
            .clone()
    }
}

/// Advances the paused tokio clock past `duration` and lets spawned fetch and
/// GC tasks run to completion.
pub async fn settle(duration: Duration) {
    // let freshly spawned tasks register their timers before advancing
    tokio::task::yield_now().await;
    // sleep deadlines are rounded up to millisecond granularity, so a timer
    // due at exactly `duration` is still pending after `advance(duration)`;
    // overshoot to wake it
    tokio::time::advance(duration + Duration::from_millis(2)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

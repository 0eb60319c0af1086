//! A scripted walk through the query cache.
//!
//! This binary plays the role of the UI in front of the cache: it mounts and
//! unmounts "components" (observers), toggles their `enabled` policy, and
//! logs every snapshot they receive. Watch the `fetching` log lines to see
//! when the fetcher actually runs: observers sharing a key share one fetch
//! and one cached result.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use clap::Parser;
use futures::future::BoxFuture;
use tracing::info;

use query_cache::{
    FetchResult, Fetcher, QueryCache, QueryKey, QueryPolicy, QuerySnapshot, SubscriptionHandle,
};

#[derive(Debug, Parser)]
#[command(about = "Scripted demonstration of the query-cache coordinator")]
struct Cli {
    /// Minimum age after which cached data is refetched on re-subscription.
    #[arg(long, default_value = "0s")]
    stale_time: humantime::Duration,
    /// Grace period before an unobserved cache entry is evicted.
    #[arg(long, default_value = "5m")]
    gc_time: humantime::Duration,
    /// Simulated latency of one fetch.
    #[arg(long, default_value = "2s")]
    fetch_delay: humantime::Duration,
}

/// Simulates a slow remote lookup, returning a fresh value on every call.
struct SimulatedFetch {
    delay: Duration,
    calls: AtomicUsize,
}

/// Shares one [`SimulatedFetch`] between the cache and the script; the
/// orphan rule forbids implementing [`Fetcher`] on `Arc<SimulatedFetch>`
/// directly.
struct SharedFetch(Arc<SimulatedFetch>);

impl Fetcher for SharedFetch {
    type Value = String;

    fn fetch(&self, key: &QueryKey) -> BoxFuture<'static, FetchResult<String>> {
        let call = self.0.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let delay = self.0.delay;
        let key = key.to_string();
        info!(%key, call, "fetching");
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(format!("{key} (fetch #{call})"))
        })
    }
}

/// One mounted "component": a named observer on a key.
struct Component {
    name: &'static str,
    handle: SubscriptionHandle,
}

impl Component {
    fn mount(
        cache: &QueryCache<SharedFetch>,
        name: &'static str,
        id: &str,
        policy: QueryPolicy,
    ) -> Self {
        let key = QueryKey::new(["data", id]);
        let handle = cache.subscribe(key, policy, move |snapshot| log_snapshot(name, &snapshot));
        info!(name, %id, "mounted");
        Component { name, handle }
    }

    fn unmount(self, cache: &QueryCache<SharedFetch>) {
        info!(name = self.name, key = %self.handle.key(), "unmounted");
        cache.unsubscribe(self.handle);
    }
}

fn log_snapshot(name: &str, snapshot: &QuerySnapshot<String>) {
    info!(
        name,
        is_loading = snapshot.is_loading,
        is_fetching = snapshot.is_fetching,
        data = snapshot.data.as_deref().unwrap_or("<none>"),
        error = %snapshot.error.as_ref().map(ToString::to_string).unwrap_or_default(),
        "snapshot",
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt::init();

    let fetcher = Arc::new(SimulatedFetch {
        delay: cli.fetch_delay.into(),
        calls: AtomicUsize::new(0),
    });
    let cache = QueryCache::new(SharedFetch(Arc::clone(&fetcher)));
    let policy = QueryPolicy::default()
        .with_stale_time(cli.stale_time.into())
        .with_gc_time(cli.gc_time.into());
    let settle = Duration::from(cli.fetch_delay) + Duration::from_millis(100);

    info!("mounting A and B, both observing the shared key 'common'");
    let a = Component::mount(&cache, "A", "A1", policy);
    let a_common = Component::mount(&cache, "A/common", "common", policy);
    let b = Component::mount(&cache, "B", "B1", policy);
    let b_common = Component::mount(&cache, "B/common", "common", policy);
    tokio::time::sleep(settle).await;
    info!(
        calls = fetcher.calls.load(Ordering::Relaxed),
        entries = cache.entry_count(),
        "three distinct keys, three fetches: 'common' was shared"
    );

    info!("unmounting B; its entries stay cached for the gc grace period");
    b.unmount(&cache);
    b_common.unmount(&cache);
    tokio::time::sleep(Duration::from_millis(200)).await;

    info!("remounting B/common; served from cache unless stale_time says otherwise");
    let b_common = Component::mount(&cache, "B/common", "common", policy);
    tokio::time::sleep(settle).await;

    info!("toggling A's 'enabled' off and on; cached data is retained either way");
    cache.set_policy(
        &a_common.handle,
        QueryPolicy {
            enabled: false,
            ..policy
        },
    );
    cache.set_policy(&a_common.handle, policy);
    tokio::time::sleep(settle).await;

    info!("invalidating 'common'; all of its observers see the refetch");
    cache.invalidate(&QueryKey::new(["data", "common"]));
    tokio::time::sleep(settle).await;

    info!("changing A's id; the new key is an independent entry");
    let a2 = Component::mount(&cache, "A", "A2", policy);
    a.unmount(&cache);
    tokio::time::sleep(settle).await;

    for component in [a2, a_common, b_common] {
        component.unmount(&cache);
    }
    info!(
        calls = fetcher.calls.load(Ordering::Relaxed),
        entries = cache.entry_count(),
        "done"
    );

    Ok(())
}

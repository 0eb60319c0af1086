use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::time::Instant;

use crate::config::QueryPolicy;
use crate::entry::{Entry, FetchStatus, Notification, OnChange, QuerySnapshot};
use crate::error::FetchResult;
use crate::fetcher::Fetcher;
use crate::key::QueryKey;

/// A handle to one subscription, returned by [`QueryCache::subscribe`].
///
/// The handle does not detach on drop; consumers must explicitly pass it to
/// [`QueryCache::unsubscribe`] on teardown.
#[derive(Debug)]
#[must_use = "subscriptions must be explicitly detached via `unsubscribe`"]
pub struct SubscriptionHandle {
    key: QueryKey,
    id: u64,
}

impl SubscriptionHandle {
    /// The key this subscription is attached to.
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

/// A fetch that was started under the store lock and still needs its
/// notification fan-out and task spawn once the lock is released.
struct StartedFetch<T> {
    sequence: u64,
    notification: Notification<T>,
}

struct Shared<F: Fetcher> {
    fetcher: F,
    entries: Mutex<FxHashMap<QueryKey, Entry<F::Value>>>,
    /// Store-wide sequence for fetches. Sequence numbers never repeat, so a
    /// completion can never be attributed to an entry of a later generation.
    fetch_sequence: AtomicU64,
    subscription_sequence: AtomicU64,
}

/// The top-level cache: a map from [`QueryKey`] to its cached entry,
/// coordinating fetch deduplication, staleness, observer notification and
/// garbage collection.
///
/// The cache is a cheaply cloneable handle; all clones share the same store.
/// It must be used within a tokio runtime, as fetches and GC timers are
/// spawned onto it.
pub struct QueryCache<F: Fetcher> {
    shared: Arc<Shared<F>>,
}

// https://github.com/rust-lang/rust/issues/26925
impl<F: Fetcher> Clone for QueryCache<F> {
    fn clone(&self) -> Self {
        QueryCache {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: Fetcher> QueryCache<F> {
    /// Creates a new cache on top of the given fetcher.
    pub fn new(fetcher: F) -> Self {
        QueryCache {
            shared: Arc::new(Shared {
                fetcher,
                entries: Mutex::new(FxHashMap::default()),
                fetch_sequence: AtomicU64::new(0),
                subscription_sequence: AtomicU64::new(0),
            }),
        }
    }

    /// Attaches an observer to `key`.
    ///
    /// This resolves or creates the cache entry for the key, disarms any
    /// pending GC timer, registers `on_change` for status snapshots, and then
    /// decides whether a fetch needs to be initiated: a cold or stale entry
    /// triggers one (if `policy.enabled`), an outstanding fetch is joined,
    /// and fresh data is served as-is. The observer receives one snapshot
    /// synchronously before this returns.
    pub fn subscribe(
        &self,
        key: QueryKey,
        policy: QueryPolicy,
        on_change: impl Fn(QuerySnapshot<F::Value>) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let on_change: OnChange<F::Value> = Arc::new(on_change);
        let id = self
            .shared
            .subscription_sequence
            .fetch_add(1, Ordering::Relaxed);

        let (started, initial) = {
            let mut entries = self.shared.entries.lock().unwrap();
            let entry = entries.entry(key.clone()).or_insert_with(|| {
                tracing::trace!(%key, "creating cache entry");
                Entry::new()
            });

            if entry.observer_count() == 0 {
                // a pending GC timer task will find a newer generation and
                // leave the entry alone
                entry.gc.disarm();
            }
            entry.push_observer(id, policy, Arc::clone(&on_change));

            match self.evaluate_fetch(&key, entry, policy.enabled) {
                // the transition to Pending notifies everyone, including the
                // new observer; that is its initial snapshot
                Some(started) => (Some(started), None),
                None => (None, Some(entry.notification_for(Arc::clone(&on_change)))),
            }
        };

        if let Some(notification) = initial {
            notification.deliver();
        }
        if let Some(started) = started {
            self.dispatch(&key, started);
        }

        SubscriptionHandle { key, id }
    }

    /// Detaches the observer behind `handle`.
    ///
    /// If this was the last observer, the GC timer is armed with the entry's
    /// effective `gc_time` (immediately evicting for a zero `gc_time`). An
    /// in-flight fetch is never cancelled by this; its completion still
    /// updates the entry for the benefit of any future re-subscriber.
    /// Unsubscribing an unknown or already-detached handle is a no-op.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let SubscriptionHandle { key, id } = handle;
        let mut entries = self.shared.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(&key) else {
            return;
        };

        // the departing observer's gc_time participates in the merge
        let gc_time = entry.min_gc_time().unwrap_or_default();
        if !entry.remove_observer(id) {
            return;
        }
        if entry.observer_count() > 0 {
            return;
        }

        if gc_time.is_zero() {
            entries.remove(&key);
            tracing::debug!(%key, "evicted cache entry (zero gc_time)");
        } else {
            self.arm_gc(&key, entries.get_mut(&key).unwrap(), gc_time);
        }
    }

    /// Replaces the policy of the subscription behind `handle`.
    ///
    /// When `enabled` transitions from `false` to `true`, the fetch decision
    /// is re-evaluated, so a cold or stale entry is fetched. Transitioning to
    /// `false` only gates future automatic fetches; it never evicts or clears
    /// cached data.
    pub fn set_policy(&self, handle: &SubscriptionHandle, policy: QueryPolicy) {
        let started = {
            let mut entries = self.shared.entries.lock().unwrap();
            let Some(entry) = entries.get_mut(&handle.key) else {
                return;
            };
            let Some(current) = entry.observer_policy_mut(handle.id) else {
                return;
            };
            let was_enabled = current.enabled;
            *current = policy;

            if !was_enabled && policy.enabled {
                self.evaluate_fetch(&handle.key, entry, true)
            } else {
                None
            }
        };

        if let Some(started) = started {
            self.dispatch(&handle.key, started);
        }
    }

    /// Marks the entry for `key` stale regardless of `stale_time`, without
    /// removing it. A refetch is triggered only while observers are attached
    /// (and at least one of them is enabled); otherwise the mark takes effect
    /// on the next subscription. Unknown keys are a no-op.
    pub fn invalidate(&self, key: &QueryKey) {
        let started = {
            let mut entries = self.shared.entries.lock().unwrap();
            let Some(entry) = entries.get_mut(key) else {
                return;
            };
            entry.invalidate();
            tracing::trace!(%key, "invalidated cache entry");

            if entry.observer_count() > 0 {
                self.evaluate_fetch(key, entry, entry.any_enabled())
            } else {
                None
            }
        };

        if let Some(started) = started {
            self.dispatch(key, started);
        }
    }

    /// Deletes the entry for `key` entirely: value, status and timers.
    ///
    /// A subsequent subscription is a fresh creation. A fetch still in flight
    /// for the removed entry will have its completion discarded. No-op if the
    /// key is absent.
    pub fn remove(&self, key: &QueryKey) {
        let mut entries = self.shared.entries.lock().unwrap();
        if entries.remove(key).is_some() {
            tracing::debug!(%key, "removed cache entry");
        }
    }

    /// Whether an entry for `key` is currently in the store.
    pub fn contains(&self, key: &QueryKey) -> bool {
        self.shared.entries.lock().unwrap().contains_key(key)
    }

    /// The number of entries currently in the store, observed or not.
    pub fn entry_count(&self) -> usize {
        self.shared.entries.lock().unwrap().len()
    }

    /// A snapshot of the current state of `key`, if an entry exists.
    pub fn snapshot(&self, key: &QueryKey) -> Option<QuerySnapshot<F::Value>> {
        let entries = self.shared.entries.lock().unwrap();
        entries.get(key).map(|entry| entry.snapshot())
    }

    /// The current [`FetchStatus`] of `key`, if an entry exists.
    pub fn status(&self, key: &QueryKey) -> Option<FetchStatus<F::Value>> {
        let entries = self.shared.entries.lock().unwrap();
        entries.get(key).map(|entry| entry.status().clone())
    }

    /// Runs the fetch decision for `entry`. Must be called under the store
    /// lock, which is what makes check-and-begin atomic with respect to other
    /// subscriptions: two near-simultaneous subscribes to a cold key can
    /// never start two fetches.
    fn evaluate_fetch(
        &self,
        key: &QueryKey,
        entry: &mut Entry<F::Value>,
        enabled: bool,
    ) -> Option<StartedFetch<F::Value>> {
        if !enabled {
            return None;
        }
        if entry.in_flight().is_some() {
            tracing::trace!(%key, "joining in-flight fetch");
            return None;
        }

        let should_fetch = match entry.status() {
            FetchStatus::Idle => true,
            FetchStatus::Pending => false,
            FetchStatus::Success { .. } | FetchStatus::Error { .. } => {
                let stale_time = entry.min_stale_time().unwrap_or_default();
                entry.is_stale(stale_time, Instant::now())
            }
        };
        if !should_fetch {
            return None;
        }

        let sequence = self.shared.fetch_sequence.fetch_add(1, Ordering::Relaxed);
        entry.begin_fetch(sequence);
        tracing::debug!(%key, sequence, "starting fetch");

        Some(StartedFetch {
            sequence,
            notification: entry.notification(),
        })
    }

    /// Fans out the `Pending` snapshot of a just-started fetch and spawns the
    /// fetcher call. Must be called after the store lock is released.
    fn dispatch(&self, key: &QueryKey, started: StartedFetch<F::Value>) {
        let StartedFetch {
            sequence,
            notification,
        } = started;
        notification.deliver();

        let this = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let result = this.shared.fetcher.fetch(&key).await;
            this.complete_fetch(&key, sequence, result);
        });
    }

    /// Records a fetch result on the entry and notifies its observers.
    ///
    /// A completion for an entry that was evicted in the meantime is
    /// discarded; a completion for a surviving entry with zero observers
    /// still lands.
    fn complete_fetch(&self, key: &QueryKey, sequence: u64, result: FetchResult<F::Value>) {
        let notification = {
            let mut entries = self.shared.entries.lock().unwrap();
            let Some(entry) = entries.get_mut(key) else {
                tracing::trace!(%key, sequence, "discarding fetch result for evicted entry");
                return;
            };
            if !entry.complete_fetch(sequence, result) {
                tracing::trace!(%key, sequence, "discarding superseded fetch result");
                return;
            }
            tracing::debug!(%key, sequence, "fetch completed");
            entry.notification()
        };

        notification.deliver();
    }

    /// Arms the GC timer for an entry that just lost its last observer.
    /// Must be called under the store lock.
    fn arm_gc(&self, key: &QueryKey, entry: &mut Entry<F::Value>, gc_time: Duration) {
        let deadline = entry
            .last_observer_removed_at()
            .unwrap_or_else(Instant::now)
            + gc_time;
        let generation = entry.gc.arm(deadline);
        tracing::trace!(%key, ?gc_time, "armed gc timer");

        let this = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            this.sweep(&key, generation);
        });
    }

    /// Evicts the entry for a fired GC timer, unless the timer was disarmed
    /// or an observer re-attached in the meantime.
    fn sweep(&self, key: &QueryKey, generation: u64) {
        let mut entries = self.shared.entries.lock().unwrap();
        let Some(entry) = entries.get(key) else {
            return;
        };
        if entry.gc.is_armed_with(generation) && entry.observer_count() == 0 {
            entries.remove(key);
            tracing::debug!(%key, "evicted unobserved cache entry");
        }
    }
}

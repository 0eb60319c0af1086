use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::QueryPolicy;
use crate::error::FetchError;
use crate::gc::GcState;

/// The fetch state of one cache entry.
#[derive(Debug, Clone)]
pub enum FetchStatus<T> {
    /// No fetch has been initiated for this entry yet.
    Idle,
    /// A fetch is currently outstanding.
    Pending,
    /// The last fetch resolved successfully.
    Success {
        /// The fetched value.
        value: T,
        /// When the fetch resolved.
        fetched_at: Instant,
    },
    /// The last fetch failed.
    Error {
        /// The opaque error the fetcher produced.
        error: FetchError,
        /// When the fetch failed.
        fetched_at: Instant,
    },
}

impl<T> FetchStatus<T> {
    /// Whether a fetch is currently outstanding.
    pub fn is_pending(&self) -> bool {
        matches!(self, FetchStatus::Pending)
    }

    /// When the last fetch resolved, successfully or not.
    pub fn fetched_at(&self) -> Option<Instant> {
        match self {
            FetchStatus::Success { fetched_at, .. } | FetchStatus::Error { fetched_at, .. } => {
                Some(*fetched_at)
            }
            FetchStatus::Idle | FetchStatus::Pending => None,
        }
    }
}

/// The state of a cache entry as delivered to observers.
///
/// A snapshot is taken at the moment of a status transition and reflects the
/// entry's state at that moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySnapshot<T> {
    /// Whether a fetch is outstanding and no result has *ever* been recorded
    /// for this entry. This is `true` only for the first load of an entry,
    /// never again once any success or error has been recorded, even across
    /// refetches.
    pub is_loading: bool,
    /// Whether a fetch is outstanding.
    pub is_fetching: bool,
    /// The most recently fetched value, if any. During a refetch this holds
    /// the previous value.
    pub data: Option<T>,
    /// The error of the last fetch, if it failed.
    pub error: Option<FetchError>,
}

/// The callback through which an observer receives [`QuerySnapshot`]s.
pub(crate) type OnChange<T> = Arc<dyn Fn(QuerySnapshot<T>) + Send + Sync>;

pub(crate) struct Observer<T> {
    pub policy: QueryPolicy,
    pub on_change: OnChange<T>,
}

/// The cached state machine for one key.
///
/// Entries are owned by the store and only ever mutated under its lock.
pub(crate) struct Entry<T> {
    status: FetchStatus<T>,
    /// The last successfully fetched value, retained through refetches and
    /// errors so observers keep seeing data while fresher data is produced.
    last_value: Option<T>,
    /// Set on the first completed fetch, cleared only by eviction.
    has_resolved: bool,
    /// Set by explicit invalidation, making the entry stale regardless of
    /// `stale_time`. Cleared by the next completed fetch.
    invalidated: bool,
    /// The store-wide sequence number of the outstanding fetch, if any.
    in_flight: Option<u64>,
    /// Attached observers, in subscription order.
    observers: Vec<(u64, Observer<T>)>,
    last_observer_removed_at: Option<Instant>,
    /// Monotonic sequence of notifications captured for this entry.
    notify_seq: u64,
    /// Highest sequence actually delivered. Shared with captured
    /// [`Notification`]s, so a delivery that was overtaken by a newer one is
    /// dropped instead of reordered.
    delivered_seq: Arc<Mutex<u64>>,
    pub gc: GcState,
}

impl<T: Clone> Entry<T> {
    pub fn new() -> Self {
        Entry {
            status: FetchStatus::Idle,
            last_value: None,
            has_resolved: false,
            invalidated: false,
            in_flight: None,
            observers: Vec::new(),
            last_observer_removed_at: None,
            notify_seq: 0,
            delivered_seq: Arc::new(Mutex::new(0)),
            gc: GcState::default(),
        }
    }

    pub fn status(&self) -> &FetchStatus<T> {
        &self.status
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn last_observer_removed_at(&self) -> Option<Instant> {
        self.last_observer_removed_at
    }

    pub fn push_observer(&mut self, id: u64, policy: QueryPolicy, on_change: OnChange<T>) {
        self.observers.push((id, Observer { policy, on_change }));
    }

    /// Removes the observer with the given id, returning whether it was
    /// attached. Unknown ids are a no-op, so the count can never go negative.
    pub fn remove_observer(&mut self, id: u64) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        let removed = self.observers.len() < before;
        if removed && self.observers.is_empty() {
            self.last_observer_removed_at = Some(Instant::now());
        }
        removed
    }

    pub fn observer_policy_mut(&mut self, id: u64) -> Option<&mut QueryPolicy> {
        self.observers
            .iter_mut()
            .find(|(oid, _)| *oid == id)
            .map(|(_, obs)| &mut obs.policy)
    }

    /// Whether any attached observer allows automatic fetch triggering.
    pub fn any_enabled(&self) -> bool {
        self.observers.iter().any(|(_, obs)| obs.policy.enabled)
    }

    /// The minimum `stale_time` among attached observers.
    pub fn min_stale_time(&self) -> Option<Duration> {
        self.observers
            .iter()
            .map(|(_, obs)| obs.policy.stale_time)
            .min()
    }

    /// The minimum `gc_time` among attached observers.
    pub fn min_gc_time(&self) -> Option<Duration> {
        self.observers
            .iter()
            .map(|(_, obs)| obs.policy.gc_time)
            .min()
    }

    /// Whether the cached result is old enough (or explicitly invalidated)
    /// to warrant a refetch.
    pub fn is_stale(&self, stale_time: Duration, now: Instant) -> bool {
        if self.invalidated {
            return true;
        }
        match self.status.fetched_at() {
            Some(fetched_at) => now.saturating_duration_since(fetched_at) >= stale_time,
            None => false,
        }
    }

    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    /// Transitions the entry into `Pending` for the fetch with the given
    /// sequence number.
    pub fn begin_fetch(&mut self, sequence: u64) {
        debug_assert!(self.in_flight.is_none());
        self.status = FetchStatus::Pending;
        self.in_flight = Some(sequence);
    }

    /// Records the result of the fetch with the given sequence number.
    ///
    /// Returns `false` for a completion that does not belong to the current
    /// in-flight fetch, which leaves the entry untouched.
    pub fn complete_fetch(&mut self, sequence: u64, result: Result<T, FetchError>) -> bool {
        if self.in_flight != Some(sequence) {
            return false;
        }
        self.in_flight = None;
        self.has_resolved = true;
        self.invalidated = false;
        let fetched_at = Instant::now();
        self.status = match result {
            Ok(value) => {
                self.last_value = Some(value.clone());
                FetchStatus::Success { value, fetched_at }
            }
            Err(error) => FetchStatus::Error { error, fetched_at },
        };
        true
    }

    /// Takes a snapshot of the current state, as delivered to observers.
    pub fn snapshot(&self) -> QuerySnapshot<T> {
        let is_fetching = self.status.is_pending();
        QuerySnapshot {
            is_loading: is_fetching && !self.has_resolved,
            is_fetching,
            data: self.last_value.clone(),
            error: match &self.status {
                FetchStatus::Error { error, .. } => Some(error.clone()),
                _ => None,
            },
        }
    }

    /// Captures the notification for a status transition: the current
    /// snapshot plus the full observer fan-out, in subscription order.
    /// Must be captured under the store lock and delivered outside of it.
    pub fn notification(&mut self) -> Notification<T> {
        let callbacks = self
            .observers
            .iter()
            .map(|(_, obs)| Arc::clone(&obs.on_change))
            .collect();
        self.sequenced(callbacks)
    }

    /// Captures a notification addressed to a single observer, used for the
    /// initial snapshot of a subscription that did not cause a transition.
    pub fn notification_for(&mut self, on_change: OnChange<T>) -> Notification<T> {
        self.sequenced(vec![on_change])
    }

    fn sequenced(&mut self, callbacks: Vec<OnChange<T>>) -> Notification<T> {
        self.notify_seq += 1;
        Notification {
            sequence: self.notify_seq,
            delivered: Arc::clone(&self.delivered_seq),
            snapshot: self.snapshot(),
            callbacks,
        }
    }
}

/// A captured status snapshot on its way to observers.
///
/// Notifications are captured under the store lock and delivered after it is
/// released. Delivery is serialized per entry and ordered by capture
/// sequence, so observers never see an older state after a newer one, even
/// when deliveries race on a multi-threaded runtime.
pub(crate) struct Notification<T> {
    sequence: u64,
    delivered: Arc<Mutex<u64>>,
    snapshot: QuerySnapshot<T>,
    callbacks: Vec<OnChange<T>>,
}

impl<T: Clone> Notification<T> {
    /// Invokes the callbacks in subscription order, unless a newer
    /// notification for the same entry has already been delivered, in which
    /// case this one is dropped.
    ///
    /// The per-entry delivery lock is held across the callbacks. A callback
    /// must not synchronously re-enter the cache for the same key; calls for
    /// other keys are fine.
    pub fn deliver(self) {
        let mut delivered = self.delivered.lock().unwrap();
        if *delivered > self.sequence {
            return;
        }
        *delivered = self.sequence;
        for on_change in &self.callbacks {
            on_change(self.snapshot.clone());
        }
    }
}

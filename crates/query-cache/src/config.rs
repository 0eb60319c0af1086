use std::time::Duration;

use serde::Deserialize;

/// The per-subscription policy controlling fetching and retention.
///
/// Policies are supplied by observers, not by the cache: when multiple
/// observers share a key with differing values, the cache uses the minimum
/// `stale_time` and minimum `gc_time` among the currently attached observers,
/// so the most eager consumer's freshness and cleanup requirements win.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueryPolicy {
    /// Whether this subscription may trigger fetches automatically.
    ///
    /// This only gates fetch triggering, never retention: a disabled
    /// subscription still counts as an observer and still receives snapshots.
    pub enabled: bool,
    /// Minimum age after which cached data is considered stale and eligible
    /// for a refetch on (re)subscribe. Zero means "stale immediately".
    #[serde(with = "humantime_serde")]
    pub stale_time: Duration,
    /// Delay after the last observer detaches before the entry is evicted.
    /// Zero means eviction is immediate upon reaching zero observers.
    #[serde(with = "humantime_serde")]
    pub gc_time: Duration,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        QueryPolicy {
            enabled: true,
            stale_time: Duration::ZERO,
            gc_time: Duration::from_secs(5 * 60),
        }
    }
}

impl QueryPolicy {
    /// A default policy with automatic fetching turned off.
    pub fn disabled() -> Self {
        QueryPolicy {
            enabled: false,
            ..Default::default()
        }
    }

    /// Overrides the `stale_time` of this policy.
    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    /// Overrides the `gc_time` of this policy.
    pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }
}

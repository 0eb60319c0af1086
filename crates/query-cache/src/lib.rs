//! # An observer-driven cache for asynchronous fetches
//!
//! This crate implements an in-memory cache coordinating any number of
//! concurrent consumers ("observers") interested in the results of an
//! asynchronous, possibly slow operation (the [`Fetcher`]). Its job is to
//! make sure that concurrent demand for the same logical resource shares a
//! single in-flight fetch and a single cached result, that results expire
//! based on age, and that entries nobody is observing anymore are garbage
//! collected after a grace period.
//!
//! ## The moving parts
//!
//! - A [`QueryKey`] identifies a logical resource. It is built from a
//!   sequence of stable segments which are hashed to form the identity, so
//!   structurally equal keys always resolve to the same cache entry.
//! - The [`Fetcher`] is the external operation producing values. The cache
//!   never interprets values or errors, never retries, and never cancels an
//!   in-flight fetch.
//! - A [`QueryPolicy`] is supplied per subscription and controls whether the
//!   subscription may trigger fetches (`enabled`), how old data may get
//!   before a (re)subscription refetches it (`stale_time`), and how long an
//!   unobserved entry is retained (`gc_time`). When observers of one key
//!   disagree, the minimum of each duration wins.
//! - The [`QueryCache`] owns the map from key to entry. Observers attach via
//!   [`QueryCache::subscribe`], receive [`QuerySnapshot`]s on every status
//!   transition in subscription order, and must detach explicitly via
//!   [`QueryCache::unsubscribe`].
//!
//! ## Lifecycle of an entry
//!
//! An entry is created on the first subscription to an unknown key and starts
//! out `Idle`. The fetch decision runs whenever an observer attaches, flips
//! its policy to enabled, or the entry is invalidated: a cold or stale entry
//! transitions to `Pending` and a single fetcher call is spawned; concurrent
//! subscribers join that call instead of starting another. Completion
//! transitions the entry to `Success` or `Error` and fans the new snapshot
//! out to all observers.
//!
//! When the last observer detaches, a GC timer is armed with the entry's
//! effective `gc_time`. A subscription arriving before the deadline disarms
//! it and finds the cached data intact; otherwise the entry is evicted
//! entirely, and a later subscription starts from a fresh `Idle` entry.
//!
//! The store itself is a single mutex-guarded map. Fetcher calls are the only
//! work that runs concurrently with other operations; all bookkeeping,
//! including the check-and-begin of the fetch decision, happens under the
//! store lock, which is what guarantees deduplication.

#![warn(missing_docs)]

mod config;
mod entry;
mod error;
mod fetcher;
mod gc;
mod key;
mod store;
#[cfg(test)]
mod testutils;

pub use config::QueryPolicy;
pub use entry::{FetchStatus, QuerySnapshot};
pub use error::{FetchError, FetchResult};
pub use fetcher::Fetcher;
pub use key::{QueryKey, QueryKeyBuilder};
pub use store::{QueryCache, SubscriptionHandle};

use futures::future::BoxFuture;

use crate::error::FetchResult;
use crate::key::QueryKey;

/// The external operation that produces values for the cache.
///
/// The cache treats the fetcher as completely opaque: it makes no assumptions
/// about latency, and no ordering guarantees exist between fetches for
/// distinct keys. Fetches for *different* keys may run concurrently without
/// restriction; for the *same* key the cache collapses concurrent demand into
/// a single outstanding call.
///
/// An in-flight fetch is never cancelled. A fetch that completes for a key
/// with no current observers still updates the cache entry, for the benefit
/// of any observer attaching before the entry is garbage collected.
pub trait Fetcher: Send + Sync + 'static {
    /// The value produced by this fetcher.
    ///
    /// Values are fanned out to all observers of a key, hence `Clone`.
    type Value: Clone + Send + Sync + 'static;

    /// Fetch the value for the given key.
    fn fetch(&self, key: &QueryKey) -> BoxFuture<'static, FetchResult<Self::Value>>;
}

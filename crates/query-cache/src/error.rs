use std::sync::Arc;

use thiserror::Error;

/// An error that happened while fetching a resource.
///
/// The error is supplied by the [`Fetcher`](crate::Fetcher) and treated as
/// opaque by the cache: it is recorded on the entry, fanned out to all
/// observers, and never interpreted or retried. It is cheaply cloneable, as
/// one failure can be shared with any number of observers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fetch failed: {0}")]
pub struct FetchError(Arc<str>);

impl FetchError {
    /// Creates a new [`FetchError`] with the given message.
    pub fn new(message: impl Into<Arc<str>>) -> Self {
        Self(message.into())
    }

    /// The message this error was created with.
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FetchError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for FetchError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// The result of a single [`Fetcher`](crate::Fetcher) call.
pub type FetchResult<T> = Result<T, FetchError>;

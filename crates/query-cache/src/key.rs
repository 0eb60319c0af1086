use std::fmt::{self, Write};
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// The identity of a logical resource in the cache.
///
/// A [`QueryKey`] is derived from a sequence of stable, human-readable
/// segments (typically a resource name followed by its arguments). The
/// segments are hashed to form the actual identity, so two keys built from
/// structurally equal segments compare equal and resolve to the same cache
/// entry, regardless of how the segments were produced.
#[derive(Debug, Clone, Eq)]
pub struct QueryKey {
    metadata: Arc<str>,
    hash: [u8; 32],
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.metadata.lines().enumerate() {
            if i > 0 {
                f.write_char('/')?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for QueryKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl QueryKey {
    /// Creates a [`QueryKey`] from a sequence of segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: fmt::Display,
    {
        let mut builder = Self::builder();
        for segment in segments {
            builder.write_segment(segment);
        }
        builder.build()
    }

    /// Create a [`QueryKeyBuilder`] that can be used to build a key out of all
    /// the values contributing to the resource's identity.
    pub fn builder() -> QueryKeyBuilder {
        QueryKeyBuilder {
            metadata: String::new(),
        }
    }

    /// Returns the human-readable metadata that forms the basis of this key.
    pub fn metadata(&self) -> &str {
        &self.metadata
    }
}

/// A builder for [`QueryKey`]s.
///
/// This builder implements the [`Write`](std::fmt::Write) trait, and the intention of it is to
/// accept human readable, but most importantly **stable**, input.
/// This input is then being hashed to form the [`QueryKey`], and is retained alongside it
/// to help debugging.
pub struct QueryKeyBuilder {
    metadata: String,
}

impl QueryKeyBuilder {
    /// Writes one segment into the key.
    ///
    /// Segments are delimited, so `["ab", "c"]` and `["a", "bc"]` produce
    /// distinct keys.
    pub fn write_segment(&mut self, segment: impl fmt::Display) {
        self.metadata
            .write_fmt(format_args!("{segment}\n"))
            .unwrap();
    }

    /// Finalize the [`QueryKey`].
    pub fn build(self) -> QueryKey {
        let hash = Sha256::digest(&self.metadata);
        let hash = <[u8; 32]>::try_from(hash).expect("sha256 outputs 32 bytes");

        QueryKey {
            metadata: self.metadata.into(),
            hash,
        }
    }
}

impl fmt::Write for QueryKeyBuilder {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.metadata.write_str(s)
    }
}

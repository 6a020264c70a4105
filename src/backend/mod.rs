//! Ordered key-value storage contract consumed by the credential repository.
//!
//! The repository never assumes multi-key atomicity from this contract:
//! every cross-key invariant (uniqueness, single-use challenges) is enforced
//! by protocol logic on top of the single-key primitives below. Items carry
//! an optional expiry; an expired item is logically absent from every read
//! even when it has not been physically reaped yet.

mod memory;

pub use memory::MemoryBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;

/// Key segment separator.
pub const SEPARATOR: u8 = b'/';

/// A single stored item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// TTL bound; the item behaves as missing once this instant passes.
    pub expires: Option<DateTime<Utc>>,
    /// Opaque revision assigned by the backend on every write. Supplying it
    /// on `update` turns the write into a compare-and-swap.
    pub revision: Option<u64>,
}

impl Item {
    #[must_use]
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            expires: None,
            revision: None,
        }
    }

    #[must_use]
    pub fn with_expiry(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }
}

/// Ordered key-value backend.
///
/// Implementations must be safe for concurrent use across all keys.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch a single item.
    ///
    /// # Errors
    /// Returns `NotFound` when the key is absent or expired.
    async fn get(&self, key: &[u8]) -> Result<Item>;

    /// Insert or overwrite an item.
    ///
    /// # Errors
    /// Returns an error if the store is unavailable.
    async fn put(&self, item: Item) -> Result<()>;

    /// Insert an item.
    ///
    /// # Errors
    /// Returns `AlreadyExists` when the key already holds a live item.
    async fn create(&self, item: Item) -> Result<()>;

    /// Overwrite an existing item.
    ///
    /// # Errors
    /// Returns `NotFound` when the key is absent or expired, and
    /// `CompareFailed` when the item carries a revision that no longer
    /// matches the stored one.
    async fn update(&self, item: Item) -> Result<()>;

    /// Remove a single key.
    ///
    /// # Errors
    /// Returns `NotFound` when the key is absent.
    async fn delete(&self, key: &[u8]) -> Result<()>;

    /// Remove every key in `[start, end)`.
    ///
    /// # Errors
    /// Returns `BadParameter` on an inverted range.
    async fn delete_range(&self, start: &[u8], end: &[u8]) -> Result<()>;

    /// Fetch items in `[start, end)` in ascending key order, capped at
    /// `limit` when one is given.
    ///
    /// # Errors
    /// Returns `BadParameter` on an inverted range.
    async fn get_range(&self, start: &[u8], end: &[u8], limit: Option<usize>)
        -> Result<Vec<Item>>;
}

#[async_trait]
impl<B: Backend + ?Sized> Backend for std::sync::Arc<B> {
    async fn get(&self, key: &[u8]) -> Result<Item> {
        (**self).get(key).await
    }

    async fn put(&self, item: Item) -> Result<()> {
        (**self).put(item).await
    }

    async fn create(&self, item: Item) -> Result<()> {
        (**self).create(item).await
    }

    async fn update(&self, item: Item) -> Result<()> {
        (**self).update(item).await
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        (**self).delete(key).await
    }

    async fn delete_range(&self, start: &[u8], end: &[u8]) -> Result<()> {
        (**self).delete_range(start, end).await
    }

    async fn get_range(&self, start: &[u8], end: &[u8], limit: Option<usize>)
        -> Result<Vec<Item>> {
        (**self).get_range(start, end, limit).await
    }
}

/// Join key segments with the separator.
#[must_use]
pub fn key(parts: &[&str]) -> Vec<u8> {
    parts.join("/").into_bytes()
}

/// Exclusive upper bound for a prefix scan starting at `start`: the prefix
/// with its last byte incremented, carrying into shorter prefixes when the
/// byte is already at its maximum.
#[must_use]
pub fn range_end(start: &[u8]) -> Vec<u8> {
    let mut end = start.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < u8::MAX {
            *last += 1;
            return end;
        }
        end.pop();
    }
    // Degenerate all-0xff prefix; scan to the maximum representable key.
    vec![u8::MAX; start.len() + 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_joins_segments() {
        assert_eq!(key(&["web", "users", "alice", "params"]), b"web/users/alice/params");
    }

    #[test]
    fn range_end_increments_last_byte() {
        assert_eq!(range_end(b"web/users/"), b"web/users0".to_vec());
        assert_eq!(range_end(b"a\xff"), b"b".to_vec());
    }

    #[test]
    fn range_end_covers_prefix() {
        let start = key(&["web", "users", "alice", "mfa"]);
        let end = range_end(&start);
        let inside = key(&["web", "users", "alice", "mfa", "dev-1"]);
        assert!(start.as_slice() < inside.as_slice());
        assert!(inside.as_slice() < end.as_slice());
    }
}

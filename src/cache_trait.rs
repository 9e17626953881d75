//! The cache engine contract every store (in-memory, persistent, encrypted)
//! implements identically.

use std::collections::HashMap;
use std::time::SystemTime;

use async_trait::async_trait;

use crate::error::CacheResult;
use crate::model::Expiration;

/// The untyped blob-cache contract (§7.2 of SPEC_FULL.md).
///
/// Every operation is `async`; invoking it twice independently drives the
/// work twice (no implicit memoization at this layer — that is what
/// [`crate::primitives::RequestCache`] and `get_or_fetch_object` are for).
#[async_trait]
pub trait BlobCache: Send + Sync {
    /// Inserts or replaces `key`'s value. `expiration` of `None` means
    /// "never expires".
    async fn insert(&self, key: &str, bytes: Vec<u8>, expiration: Option<SystemTime>) -> CacheResult<()>;

    /// Retrieves `key`'s value. Fails with [`crate::error::CacheError::NotFound`]
    /// if the key is absent or expired.
    async fn get(&self, key: &str) -> CacheResult<Vec<u8>>;

    /// Returns when `key` was created (or last re-inserted), or `None` if
    /// the key is absent or expired.
    async fn get_created_at(&self, key: &str) -> CacheResult<Option<SystemTime>>;

    /// Removes `key`. Idempotent: invalidating a missing key is not an error.
    async fn invalidate(&self, key: &str) -> CacheResult<()>;

    /// Removes every entry, typed and untyped.
    async fn invalidate_all(&self) -> CacheResult<()>;

    /// Returns every key that is not currently expired.
    async fn get_all_keys(&self) -> CacheResult<Vec<String>>;

    /// Completes once every operation enqueued before this call is durable.
    async fn flush(&self) -> CacheResult<()>;

    /// Drops expired entries.
    async fn vacuum(&self) -> CacheResult<()>;

    /// Inserts every item in `items`. Observationally equivalent to
    /// inserting each one individually under any concurrent observer.
    async fn bulk_insert(&self, items: HashMap<String, Vec<u8>>, expiration: Option<SystemTime>) -> CacheResult<()>;

    /// Looks up every key in `keys`; absent/expired keys are omitted from
    /// the result map rather than causing an error.
    async fn bulk_get(&self, keys: Vec<String>) -> CacheResult<HashMap<String, Vec<u8>>>;

    /// Removes every key in `keys`. Idempotent.
    async fn bulk_invalidate(&self, keys: Vec<String>) -> CacheResult<()>;

    /// Looks up creation times for every key in `keys`; absent/expired keys
    /// are omitted.
    async fn bulk_get_created_at(&self, keys: Vec<String>) -> CacheResult<HashMap<String, SystemTime>>;

    /// Rewrites only the expiration column for `key`; a no-op if the row is
    /// absent. Does not read or re-encode the payload.
    async fn update_expiration(&self, key: &str, expiration: Option<SystemTime>) -> CacheResult<()>;

    /// Releases resources, draining in-flight work first. Idempotent; safe
    /// to call from any task.
    async fn shutdown(&self) -> CacheResult<()>;
}

pub(crate) fn normalize_expiration(expiration: Option<SystemTime>) -> Expiration {
    Expiration::from_option(expiration)
}

/// Typed-key access used by the extensions layer (SPEC_FULL.md §5.10).
///
/// `get_all_keys` on [`BlobCache`] returns logical keys with any type prefix
/// already stripped, so it cannot answer "every key stored under type `T`"
/// once more than one type (or an untyped entry) shares a logical key. This
/// trait is the typed counterpart that a store implements directly against
/// its physical storage instead of composing/decomposing keys outside it.
#[async_trait]
pub trait TypedKeyAccess: BlobCache {
    async fn insert_typed(&self, type_tag: &str, key: &str, bytes: Vec<u8>, expiration: Option<SystemTime>) -> CacheResult<()>;

    async fn get_typed(&self, type_tag: &str, key: &str) -> CacheResult<Vec<u8>>;

    async fn invalidate_typed(&self, type_tag: &str, key: &str) -> CacheResult<()>;

    /// Every non-expired logical key stored under `type_tag`.
    async fn keys_of_type(&self, type_tag: &str) -> CacheResult<Vec<String>>;
}

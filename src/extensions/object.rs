//! Typed object access: serializes/deserializes through a [`Serializer`] and
//! namespaces keys by `T`'s type name (SPEC_FULL.md §5.10, §4.2).

use std::collections::HashMap;
use std::future::Future;
use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache_trait::TypedKeyAccess;
use crate::error::CacheResult;
use crate::primitives::RequestCache;
use crate::serializer::{encode, Serializer};

fn type_tag<T>() -> &'static str {
    std::any::type_name::<T>()
}

/// Inserts `value` under `key`, namespaced by `T`.
pub async fn insert_object<B, T>(store: &B, serializer: &dyn Serializer, key: &str, value: &T, expiration: Option<SystemTime>) -> CacheResult<()>
where
    B: TypedKeyAccess,
    T: Serialize,
{
    let bytes = encode(serializer, value)?;
    store.insert_typed(type_tag::<T>(), key, bytes, expiration).await
}

/// Retrieves and deserializes the value stored under `key` for type `T`.
pub async fn get_object<B, T>(store: &B, serializer: &dyn Serializer, key: &str) -> CacheResult<T>
where
    B: TypedKeyAccess,
    T: DeserializeOwned,
{
    let bytes = store.get_typed(type_tag::<T>(), key).await?;
    serializer.deserialize_bytes(&bytes)
}

/// Removes the `T`-typed entry at `key`. Idempotent.
pub async fn invalidate_object<B, T>(store: &B, key: &str) -> CacheResult<()>
where
    B: TypedKeyAccess,
{
    store.invalidate_typed(type_tag::<T>(), key).await
}

/// Every non-expired key currently storing a `T`.
pub async fn get_all_keys_of<B, T>(store: &B) -> CacheResult<Vec<String>>
where
    B: TypedKeyAccess,
{
    store.keys_of_type(type_tag::<T>()).await
}

/// Inserts every item in `items`, namespaced by `T`.
pub async fn bulk_insert_objects<B, T>(
    store: &B,
    serializer: &dyn Serializer,
    items: HashMap<String, T>,
    expiration: Option<SystemTime>,
) -> CacheResult<()>
where
    B: TypedKeyAccess,
    T: Serialize,
{
    for (key, value) in items {
        insert_object(store, serializer, &key, &value, expiration).await?;
    }
    Ok(())
}

/// Looks up every key in `keys`; absent/expired/undeserializable entries are
/// omitted rather than failing the whole call.
pub async fn bulk_get_objects<B, T>(store: &B, serializer: &dyn Serializer, keys: Vec<String>) -> CacheResult<HashMap<String, T>>
where
    B: TypedKeyAccess,
    T: DeserializeOwned,
{
    let mut result = HashMap::with_capacity(keys.len());
    for key in keys {
        if let Ok(value) = get_object::<B, T>(store, serializer, &key).await {
            result.insert(key, value);
        }
    }
    Ok(result)
}

/// Point lookup with transparent fetch-and-populate on a miss.
///
/// Concurrent callers for the same `key` share one `factory` invocation via
/// `request_cache` (SPEC_FULL.md §4.3, scenario S6). A factory error
/// propagates to every waiting caller and nothing is inserted. The factory's
/// result is encoded with `serializer` — the same adapter `insert_object`/
/// `get_object` use — so a consumer's non-JSON `Serializer` is honored here
/// too, not just on the cache-hit path.
pub async fn get_or_fetch_object<B, T, F, Fut>(
    store: &B,
    serializer: &dyn Serializer,
    request_cache: &RequestCache<Option<String>, Vec<u8>>,
    key: &str,
    expiration: Option<SystemTime>,
    factory: F,
) -> CacheResult<T>
where
    B: TypedKeyAccess,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = CacheResult<T>> + Send + 'static,
{
    if let Ok(cached) = get_object::<B, T>(store, serializer, key).await {
        return Ok(cached);
    }

    // `request_cache`'s dedup slot is a fixed `Vec<u8>`, and the factory
    // closure must be `'static` — it cannot borrow the caller's `serializer`.
    // serde_json is used purely as the in-flight transport format here; the
    // value is re-encoded with the caller's actual `serializer` below before
    // it ever reaches the store, so a non-JSON adapter is still honored for
    // everything observable (cache contents, `get_object` reads).
    let dedup_key = Some(key.to_string());
    let bytes = request_cache
        .get_or_create(dedup_key, move || async move {
            let value = factory().await?;
            serde_json::to_vec(&value).map_err(|e| crate::error::CacheError::SerializationFailed(e.to_string()))
        })
        .await?;

    let value: T = serde_json::from_slice(&bytes).map_err(|e| crate::error::CacheError::SerializationFailed(e.to_string()))?;
    let reencoded = encode(serializer, &value)?;
    store.insert_typed(type_tag::<T>(), key, reencoded, expiration).await?;
    Ok(value)
}

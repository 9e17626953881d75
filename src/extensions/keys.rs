//! `get_all_keys_safe`: like `get_all_keys_of`, but a row that fails to
//! deserialize is logged and skipped instead of failing the whole listing
//! (SPEC_FULL.md §5.10) — useful when a store may contain entries written
//! by an older, incompatible version of a cached type.

use serde::de::DeserializeOwned;

use crate::cache_trait::TypedKeyAccess;
use crate::error::CacheResult;
use crate::extensions::object::{get_all_keys_of, get_object};
use crate::serializer::Serializer;

/// Every key storing a `T` that can currently be deserialized; corrupted or
/// stale rows are skipped with a warning rather than surfacing an error.
pub async fn get_all_keys_safe<B, T>(store: &B, serializer: &dyn Serializer) -> CacheResult<Vec<String>>
where
    B: TypedKeyAccess,
    T: DeserializeOwned,
{
    let candidate_keys = get_all_keys_of::<B, T>(store).await?;
    let mut safe_keys = Vec::with_capacity(candidate_keys.len());
    for key in candidate_keys {
        match get_object::<B, T>(store, serializer, &key).await {
            Ok(_) => safe_keys.push(key),
            Err(err) => log::warn!("skipping key {key:?} from safe listing: {err}"),
        }
    }
    Ok(safe_keys)
}

//! [`CacheSettings`]: a typed-property facade over a single reserved type
//! tag, for small pieces of application configuration that should live
//! alongside the cache rather than in a separate settings file
//! (SPEC_FULL.md §5.11).

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache_trait::TypedKeyAccess;
use crate::error::CacheResult;
use crate::serializer::{encode, Serializer};

/// Every property `CacheSettings` manages lives under this one type tag,
/// distinct from anything `extensions::object` would use (which tags by the
/// caller's own `T`), so settings never collide with application data.
const SETTINGS_TYPE_TAG: &str = "__settings__";

/// Thin typed key/value facade scoped to application settings.
///
/// Borrows the store and serializer rather than owning them, so it can be
/// constructed on demand (`CacheSettings::new(&store, &serializer)`) without
/// taking either out of the caller's hands.
pub struct CacheSettings<'a, B: TypedKeyAccess> {
    store: &'a B,
    serializer: &'a dyn Serializer,
}

impl<'a, B: TypedKeyAccess> CacheSettings<'a, B> {
    pub fn new(store: &'a B, serializer: &'a dyn Serializer) -> Self {
        Self { store, serializer }
    }

    /// Reads property `name`. If it has never been set, `default` is
    /// inserted and returned, so a second read sees the same value.
    pub async fn get_or_create<T>(&self, name: &str, default: T) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned,
    {
        match self.store.get_typed(SETTINGS_TYPE_TAG, name).await {
            Ok(bytes) => self.serializer.deserialize_bytes(&bytes),
            Err(_) => {
                self.set_or_create(name, &default).await?;
                Ok(default)
            }
        }
    }

    /// Writes property `name`, overwriting any previous value.
    pub async fn set_or_create<T>(&self, name: &str, value: &T) -> CacheResult<()>
    where
        T: Serialize,
    {
        let bytes = encode(self.serializer, value)?;
        self.store.insert_typed(SETTINGS_TYPE_TAG, name, bytes, None).await
    }

    /// Removes property `name`. Idempotent.
    pub async fn remove(&self, name: &str) -> CacheResult<()> {
        self.store.invalidate_typed(SETTINGS_TYPE_TAG, name).await
    }

    /// Every property name currently set.
    pub async fn property_names(&self) -> CacheResult<Vec<String>> {
        self.store.keys_of_type(SETTINGS_TYPE_TAG).await
    }
}

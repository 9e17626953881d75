//! The in-process reference implementation of [`BlobCache`].
//!
//! A single `parking_lot::RwLock` guards the whole table rather than a
//! lock-free map, because multi-field `CacheElement` updates and expiration
//! sweeps must be atomic per key (SPEC_FULL.md §5.6/§10) — a sharded or
//! per-entry-locked map would let a reader observe a torn update between
//! the value and expiration fields.

use std::collections::HashMap;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::cache_trait::{BlobCache, TypedKeyAccess};
use crate::error::{CacheError, CacheResult};
use crate::model::{compose_physical_key, is_reserved_key, now_ticks, ticks_to_system_time, CacheElement, Expiration};

/// A fully in-process cache backed by an owned `HashMap`.
///
/// Cloning shares the same underlying table (it is a thin handle around an
/// `Arc`-free `RwLock` wrapped by the caller in `Arc<InMemoryStore>` as
/// needed, matching how `PersistentStore` and `EncryptedStore` are shared).
pub struct InMemoryStore {
    table: RwLock<HashMap<String, CacheElement>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self { table: RwLock::new(HashMap::new()) }
    }

    fn insert_element(&self, type_tag: Option<&str>, key: &str, bytes: Vec<u8>, expiration: Expiration) {
        let physical_key = compose_physical_key(type_tag, key);
        let element = CacheElement {
            physical_key: physical_key.clone(),
            type_name: type_tag.map(str::to_string),
            value: bytes,
            created_at: now_ticks(),
            expiration: expiration.to_ticks(),
        };
        self.table.write().insert(physical_key, element);
    }

    fn get_element(&self, type_tag: Option<&str>, key: &str) -> Option<CacheElement> {
        let physical_key = compose_physical_key(type_tag, key);
        let now = now_ticks();
        let mut guard = self.table.write();
        match guard.get(&physical_key) {
            Some(element) if element.is_expired(now) => {
                guard.remove(&physical_key);
                None
            }
            Some(element) => Some(element.clone()),
            None => None,
        }
    }

    fn invalidate_key(&self, type_tag: Option<&str>, key: &str) {
        let physical_key = compose_physical_key(type_tag, key);
        self.table.write().remove(&physical_key);
    }

    /// Drops every expired entry. Returns the number removed.
    pub fn vacuum_sync(&self) -> usize {
        let now = now_ticks();
        let mut guard = self.table.write();
        let before = guard.len();
        guard.retain(|_, element| !element.is_expired(now));
        before - guard.len()
    }

    /// Returns every non-expired key, optionally filtered by type tag.
    /// `type_filter = Some(None)` selects only untyped keys;
    /// `type_filter = None` selects all keys regardless of type.
    pub fn keys_sync(&self, type_filter: Option<Option<&str>>) -> Vec<String> {
        let now = now_ticks();
        let mut guard = self.table.write();
        let now_clone = now;
        guard.retain(|_, element| !element.is_expired(now_clone));
        guard
            .values()
            .filter(|element| match type_filter {
                None => true,
                Some(expected) => element.type_name.as_deref() == expected,
            })
            .map(|element| element.logical_key().to_string())
            .collect()
    }
}

#[async_trait]
impl BlobCache for InMemoryStore {
    async fn insert(&self, key: &str, bytes: Vec<u8>, expiration: Option<SystemTime>) -> CacheResult<()> {
        self.insert_element(None, key, bytes, Expiration::from_option(expiration));
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Vec<u8>> {
        self.get_element(None, key).map(|element| element.value).ok_or(CacheError::NotFound)
    }

    async fn get_created_at(&self, key: &str) -> CacheResult<Option<SystemTime>> {
        Ok(self.get_element(None, key).map(|element| ticks_to_system_time(element.created_at).unwrap_or(std::time::UNIX_EPOCH)))
    }

    async fn invalidate(&self, key: &str) -> CacheResult<()> {
        self.invalidate_key(None, key);
        Ok(())
    }

    async fn invalidate_all(&self) -> CacheResult<()> {
        self.table.write().retain(|physical_key, _| is_reserved_key(physical_key));
        Ok(())
    }

    async fn get_all_keys(&self) -> CacheResult<Vec<String>> {
        Ok(self.keys_sync(None))
    }

    async fn flush(&self) -> CacheResult<()> {
        // Nothing is buffered in-process; every write is already durable in
        // the table by the time `insert` returns.
        Ok(())
    }

    async fn vacuum(&self) -> CacheResult<()> {
        self.vacuum_sync();
        Ok(())
    }

    async fn bulk_insert(&self, items: HashMap<String, Vec<u8>>, expiration: Option<SystemTime>) -> CacheResult<()> {
        let exp = Expiration::from_option(expiration);
        for (key, bytes) in items {
            self.insert_element(None, &key, bytes, exp);
        }
        Ok(())
    }

    async fn bulk_get(&self, keys: Vec<String>) -> CacheResult<HashMap<String, Vec<u8>>> {
        let mut result = HashMap::new();
        for key in keys {
            if let Some(element) = self.get_element(None, &key) {
                result.insert(key, element.value);
            }
        }
        Ok(result)
    }

    async fn bulk_invalidate(&self, keys: Vec<String>) -> CacheResult<()> {
        for key in keys {
            self.invalidate_key(None, &key);
        }
        Ok(())
    }

    async fn bulk_get_created_at(&self, keys: Vec<String>) -> CacheResult<HashMap<String, SystemTime>> {
        let mut result = HashMap::new();
        for key in keys {
            if let Some(element) = self.get_element(None, &key) {
                if let Some(instant) = ticks_to_system_time(element.created_at) {
                    result.insert(key, instant);
                }
            }
        }
        Ok(result)
    }

    async fn update_expiration(&self, key: &str, expiration: Option<SystemTime>) -> CacheResult<()> {
        let physical_key = compose_physical_key(None, key);
        let mut guard = self.table.write();
        if let Some(element) = guard.get_mut(&physical_key) {
            element.expiration = Expiration::from_option(expiration).to_ticks();
        }
        Ok(())
    }

    async fn shutdown(&self) -> CacheResult<()> {
        // No background task or connection to drain.
        Ok(())
    }
}

#[async_trait]
impl TypedKeyAccess for InMemoryStore {
    async fn insert_typed(&self, type_tag: &str, key: &str, bytes: Vec<u8>, expiration: Option<SystemTime>) -> CacheResult<()> {
        self.insert_element(Some(type_tag), key, bytes, Expiration::from_option(expiration));
        Ok(())
    }

    async fn get_typed(&self, type_tag: &str, key: &str) -> CacheResult<Vec<u8>> {
        self.get_element(Some(type_tag), key).map(|element| element.value).ok_or(CacheError::NotFound)
    }

    async fn invalidate_typed(&self, type_tag: &str, key: &str) -> CacheResult<()> {
        self.invalidate_key(Some(type_tag), key);
        Ok(())
    }

    async fn keys_of_type(&self, type_tag: &str) -> CacheResult<Vec<String>> {
        Ok(self.keys_sync(Some(Some(type_tag))))
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap()
    }

    proptest! {
        // P1: round-trip for any key/value pair that never expires.
        #[test]
        fn round_trip_holds_for_any_key_and_value(key in "[a-zA-Z0-9_]{1,16}", value in proptest::collection::vec(any::<u8>(), 0..32)) {
            let store = InMemoryStore::new();
            runtime().block_on(async {
                store.insert(&key, value.clone(), None).await.unwrap();
                prop_assert_eq!(store.get(&key).await.unwrap(), value);
                Ok(())
            })?;
        }

        // P2: a key inserted already expired is never observable.
        #[test]
        fn already_expired_inserts_are_never_observable(key in "[a-zA-Z0-9_]{1,16}", value in proptest::collection::vec(any::<u8>(), 0..32), past_secs in 1u64..10_000) {
            let store = InMemoryStore::new();
            let past = SystemTime::now() - Duration::from_secs(past_secs);
            runtime().block_on(async {
                store.insert(&key, value, Some(past)).await.unwrap();
                prop_assert!(matches!(store.get(&key).await, Err(CacheError::NotFound)));
                prop_assert!(!store.get_all_keys().await.unwrap().contains(&key));
                Ok(())
            })?;
        }

        // P3: invalidating twice is observationally equal to invalidating once.
        #[test]
        fn invalidate_is_idempotent_for_any_key(key in "[a-zA-Z0-9_]{1,16}", value in proptest::collection::vec(any::<u8>(), 0..32)) {
            let store = InMemoryStore::new();
            runtime().block_on(async {
                store.insert(&key, value, None).await.unwrap();
                store.invalidate(&key).await.unwrap();
                let once = store.get(&key).await;
                store.invalidate(&key).await.unwrap();
                let twice = store.get(&key).await;
                prop_assert_eq!(once.is_err(), twice.is_err());
                prop_assert!(twice.is_err());
                Ok(())
            })?;
        }

        // P4: two distinct type tags never observe each other's value for the same key.
        #[test]
        fn typed_entries_stay_isolated_for_any_pair_of_distinct_tags(
            tag_a in "[a-zA-Z]{1,8}", tag_b in "[a-zA-Z]{1,8}", key in "[a-zA-Z0-9_]{1,16}",
            value_a in any::<u8>(), value_b in any::<u8>(),
        ) {
            prop_assume!(tag_a != tag_b);
            let store = InMemoryStore::new();
            runtime().block_on(async {
                store.insert_typed(&tag_a, &key, vec![value_a], None).await.unwrap();
                store.insert_typed(&tag_b, &key, vec![value_b], None).await.unwrap();
                prop_assert_eq!(store.get_typed(&tag_a, &key).await.unwrap(), vec![value_a]);
                prop_assert_eq!(store.get_typed(&tag_b, &key).await.unwrap(), vec![value_b]);
                Ok(())
            })?;
        }

        // P5: bulk_insert is observationally equal to inserting each item individually.
        #[test]
        fn bulk_insert_matches_individual_inserts_for_any_key_set(
            items in proptest::collection::hash_map("[a-zA-Z0-9_]{1,12}", any::<u8>(), 0..16)
        ) {
            let bulk_store = InMemoryStore::new();
            let individual_store = InMemoryStore::new();
            let bulk_items: HashMap<String, Vec<u8>> = items.iter().map(|(k, v)| (k.clone(), vec![*v])).collect();
            runtime().block_on(async {
                bulk_store.bulk_insert(bulk_items, None).await.unwrap();
                for (key, value) in &items {
                    individual_store.insert(key, vec![*value], None).await.unwrap();
                }
                let mut bulk_keys = bulk_store.get_all_keys().await.unwrap();
                let mut individual_keys = individual_store.get_all_keys().await.unwrap();
                bulk_keys.sort();
                individual_keys.sort();
                prop_assert_eq!(bulk_keys, individual_keys);
                for key in items.keys() {
                    prop_assert_eq!(bulk_store.get(key).await.unwrap(), individual_store.get(key).await.unwrap());
                }
                Ok(())
            })?;
        }

        // P7: invalidate never fails for a key that was never inserted.
        #[test]
        fn invalidating_an_unknown_key_never_fails(key in "[a-zA-Z0-9_]{1,16}") {
            let store = InMemoryStore::new();
            runtime().block_on(async {
                prop_assert!(store.invalidate(&key).await.is_ok());
                Ok(())
            })?;
        }

        // P10: a burst of N concurrent writers never races, and every successfully
        // inserted key is observable by a reader that starts after the writes land.
        #[test]
        fn concurrent_writer_bursts_leave_every_write_observable(count in 1usize..40) {
            let store = Arc::new(InMemoryStore::new());
            runtime().block_on(async {
                let mut writers = Vec::new();
                for i in 0..count {
                    let store = store.clone();
                    writers.push(tokio::spawn(async move {
                        store.insert(&format!("k{i}"), vec![i as u8], None).await.unwrap();
                    }));
                }
                for writer in writers {
                    writer.await.unwrap();
                }
                prop_assert_eq!(store.get_all_keys().await.unwrap().len(), count);
                Ok(())
            })?;
        }
    }
}

//! [`PersistentStore`]: a `BlobCache` backed by a SQLite database file, with
//! all reads and writes funneled through a single coalescing
//! [`OperationQueue`] (SPEC_FULL.md §5.7).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::cache_trait::{normalize_expiration, BlobCache, TypedKeyAccess};
use crate::error::{CacheError, CacheResult};
use crate::model::{compose_physical_key, now_ticks, ticks_to_system_time, CacheElement};
use crate::persistent::operation::{OperationKind, OperationResult};
use crate::persistent::queue::{OperationQueue, DEFAULT_IDLE_FLUSH_MS};
use crate::persistent::sql;

/// Open-time configuration for a [`PersistentStore`].
#[derive(Debug, Clone)]
pub struct PersistentStoreOptions {
    /// Path to the SQLite database file. Created if it does not exist.
    pub path: PathBuf,
    /// How long the runner waits for more work before flushing a batch.
    pub idle_flush_ms: u64,
    /// Whether to run a file-level `VACUUM` immediately after opening.
    pub vacuum_on_open: bool,
}

impl PersistentStoreOptions {
    /// Options for `path` with the library defaults.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), idle_flush_ms: DEFAULT_IDLE_FLUSH_MS, vacuum_on_open: false }
    }
}

pub struct PersistentStore {
    queue: OperationQueue,
}

impl PersistentStore {
    /// Opens (creating if absent) the database at `options.path`, applies
    /// the durability PRAGMAs, and starts the operation queue's runner.
    pub async fn open(options: PersistentStoreOptions) -> CacheResult<Self> {
        let connect_options = SqliteConnectOptions::new().filename(&options.path).create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(connect_options).await.map_err(CacheError::from)?;
        sql::bootstrap_schema(&pool).await?;
        if options.vacuum_on_open {
            vacuum_pool(&pool).await?;
        }
        Ok(Self { queue: OperationQueue::start(pool, options.idle_flush_ms) })
    }

    fn expect_elements(result: OperationResult) -> CacheResult<Vec<CacheElement>> {
        match result {
            OperationResult::Elements(elements) => Ok(elements),
            _ => Err(CacheError::StorageFailed("unexpected operation result shape".into())),
        }
    }

    fn expect_keys(result: OperationResult) -> CacheResult<Vec<String>> {
        match result {
            OperationResult::Keys(keys) => Ok(keys),
            _ => Err(CacheError::StorageFailed("unexpected operation result shape".into())),
        }
    }

    /// Purges expired rows and then runs a file-level `VACUUM` to reclaim
    /// disk space. Never runs implicitly from [`BlobCache::vacuum`] — a
    /// full-file compaction is expensive enough that callers should opt in
    /// explicitly.
    pub async fn vacuum_compact(&self) -> CacheResult<()> {
        self.queue.enqueue(OperationKind::Vacuum { compact: true }).await?;
        Ok(())
    }
}

async fn vacuum_pool(pool: &SqlitePool) -> CacheResult<()> {
    sqlx::query("VACUUM;").execute(pool).await.map_err(CacheError::from)?;
    Ok(())
}

#[async_trait]
impl BlobCache for PersistentStore {
    async fn insert(&self, key: &str, bytes: Vec<u8>, expiration: Option<SystemTime>) -> CacheResult<()> {
        let element = CacheElement {
            physical_key: compose_physical_key(None, key),
            type_name: None,
            value: bytes,
            created_at: now_ticks(),
            expiration: normalize_expiration(expiration).to_ticks(),
        };
        self.queue.enqueue(OperationKind::Insert(vec![element])).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Vec<u8>> {
        let physical_key = compose_physical_key(None, key);
        let result = self.queue.enqueue(OperationKind::Select(vec![physical_key])).await?;
        PersistentStore::expect_elements(result)?.into_iter().next().map(|e| e.value).ok_or(CacheError::NotFound)
    }

    async fn get_created_at(&self, key: &str) -> CacheResult<Option<SystemTime>> {
        let physical_key = compose_physical_key(None, key);
        let result = self.queue.enqueue(OperationKind::Select(vec![physical_key])).await?;
        let elements = PersistentStore::expect_elements(result)?;
        Ok(elements.into_iter().next().and_then(|e| ticks_to_system_time(e.created_at)))
    }

    async fn invalidate(&self, key: &str) -> CacheResult<()> {
        let physical_key = compose_physical_key(None, key);
        self.queue.enqueue(OperationKind::Invalidate(vec![physical_key])).await?;
        Ok(())
    }

    async fn invalidate_all(&self) -> CacheResult<()> {
        self.queue.enqueue(OperationKind::InvalidateAll).await?;
        Ok(())
    }

    async fn get_all_keys(&self) -> CacheResult<Vec<String>> {
        let result = self.queue.enqueue(OperationKind::GetKeys(None)).await?;
        PersistentStore::expect_keys(result)
    }

    async fn flush(&self) -> CacheResult<()> {
        self.queue.flush().await
    }

    /// Purges expired rows. Never compacts the file — see
    /// [`PersistentStore::vacuum_compact`] for that.
    async fn vacuum(&self) -> CacheResult<()> {
        self.queue.enqueue(OperationKind::Vacuum { compact: false }).await?;
        Ok(())
    }

    async fn bulk_insert(&self, items: HashMap<String, Vec<u8>>, expiration: Option<SystemTime>) -> CacheResult<()> {
        let ticks = normalize_expiration(expiration).to_ticks();
        let now = now_ticks();
        let elements = items
            .into_iter()
            .map(|(key, value)| CacheElement {
                physical_key: compose_physical_key(None, &key),
                type_name: None,
                value,
                created_at: now,
                expiration: ticks,
            })
            .collect();
        self.queue.enqueue(OperationKind::Insert(elements)).await?;
        Ok(())
    }

    async fn bulk_get(&self, keys: Vec<String>) -> CacheResult<HashMap<String, Vec<u8>>> {
        let physical_keys: Vec<String> = keys.iter().map(|k| compose_physical_key(None, k)).collect();
        let result = self.queue.enqueue(OperationKind::Select(physical_keys)).await?;
        let elements = PersistentStore::expect_elements(result)?;
        Ok(elements.into_iter().map(|e| (e.logical_key().to_string(), e.value)).collect())
    }

    async fn bulk_invalidate(&self, keys: Vec<String>) -> CacheResult<()> {
        let physical_keys = keys.iter().map(|k| compose_physical_key(None, k)).collect();
        self.queue.enqueue(OperationKind::Invalidate(physical_keys)).await?;
        Ok(())
    }

    async fn bulk_get_created_at(&self, keys: Vec<String>) -> CacheResult<HashMap<String, SystemTime>> {
        let physical_keys: Vec<String> = keys.iter().map(|k| compose_physical_key(None, k)).collect();
        let result = self.queue.enqueue(OperationKind::Select(physical_keys)).await?;
        let elements = PersistentStore::expect_elements(result)?;
        Ok(elements
            .into_iter()
            .filter_map(|e| ticks_to_system_time(e.created_at).map(|instant| (e.logical_key().to_string(), instant)))
            .collect())
    }

    async fn update_expiration(&self, key: &str, expiration: Option<SystemTime>) -> CacheResult<()> {
        let physical_key = compose_physical_key(None, key);
        let expiration_ticks = normalize_expiration(expiration).to_ticks();
        self.queue.enqueue(OperationKind::UpdateExpiration { physical_key, expiration_ticks }).await?;
        Ok(())
    }

    async fn shutdown(&self) -> CacheResult<()> {
        self.queue.shutdown().await;
        Ok(())
    }
}

/// Typed-key access used by the extensions layer (SPEC_FULL.md §5.10): goes
/// through the `TypeName` column's dedicated filter rather than the
/// key-composition `get_all_keys` path, since the latter strips type
/// prefixes before returning keys.
#[async_trait]
impl TypedKeyAccess for PersistentStore {
    async fn insert_typed(&self, type_tag: &str, key: &str, bytes: Vec<u8>, expiration: Option<SystemTime>) -> CacheResult<()> {
        let element = CacheElement {
            physical_key: compose_physical_key(Some(type_tag), key),
            type_name: Some(type_tag.to_string()),
            value: bytes,
            created_at: now_ticks(),
            expiration: normalize_expiration(expiration).to_ticks(),
        };
        self.queue.enqueue(OperationKind::Insert(vec![element])).await?;
        Ok(())
    }

    async fn get_typed(&self, type_tag: &str, key: &str) -> CacheResult<Vec<u8>> {
        let physical_key = compose_physical_key(Some(type_tag), key);
        let result = self.queue.enqueue(OperationKind::Select(vec![physical_key])).await?;
        PersistentStore::expect_elements(result)?.into_iter().next().map(|e| e.value).ok_or(CacheError::NotFound)
    }

    async fn invalidate_typed(&self, type_tag: &str, key: &str) -> CacheResult<()> {
        let physical_key = compose_physical_key(Some(type_tag), key);
        self.queue.enqueue(OperationKind::Invalidate(vec![physical_key])).await?;
        Ok(())
    }

    async fn keys_of_type(&self, type_tag: &str) -> CacheResult<Vec<String>> {
        let result = self.queue.enqueue(OperationKind::GetKeys(Some(Some(type_tag.to_string())))).await?;
        PersistentStore::expect_keys(result)
    }
}

//! [`CacheBuilder`]: open-time configuration for a [`PersistentStore`] or
//! [`EncryptedStore`], including OS-default cache directory discovery
//! (SPEC_FULL.md §6).

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{CacheError, CacheResult};
use crate::persistent::{PersistentStore, PersistentStoreOptions, DEFAULT_IDLE_FLUSH_MS};
use crate::primitives::security::{safe_path_combine, validate_name};
use crate::serializer::{ForcedDateTimeKind, Serializer};

/// Builds a [`PersistentStore`] (optionally wrapped in an
/// [`crate::encrypted::EncryptedStore`]) for an application.
pub struct CacheBuilder {
    application_name: String,
    cache_directory_override: Option<PathBuf>,
    serializer: Arc<dyn Serializer>,
    forced_date_time_kind: ForcedDateTimeKind,
    idle_flush_ms: u64,
    vacuum_on_open: bool,
    passphrase: Option<String>,
}

impl CacheBuilder {
    /// Starts a builder for `application_name`, which is validated with the
    /// same rules as any other filesystem-path component (no separators,
    /// no reserved device names, …).
    pub fn new(application_name: impl Into<String>, serializer: Arc<dyn Serializer>) -> CacheResult<Self> {
        let application_name = application_name.into();
        validate_name(&application_name)?;
        Ok(Self {
            application_name,
            cache_directory_override: None,
            serializer,
            forced_date_time_kind: ForcedDateTimeKind::None,
            idle_flush_ms: DEFAULT_IDLE_FLUSH_MS,
            vacuum_on_open: false,
            passphrase: None,
        })
    }

    /// Overrides the OS-default cache directory (tests and non-standard
    /// deployments; most callers should leave this unset).
    pub fn cache_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.cache_directory_override = Some(directory.into());
        self
    }

    pub fn forced_date_time_kind(mut self, kind: ForcedDateTimeKind) -> Self {
        self.forced_date_time_kind = kind;
        self
    }

    /// How long the runner waits for more work before flushing a batch.
    /// Defaults to [`DEFAULT_IDLE_FLUSH_MS`].
    pub fn idle_flush_ms(mut self, idle_flush_ms: u64) -> Self {
        self.idle_flush_ms = idle_flush_ms;
        self
    }

    /// Whether to run a file-level `VACUUM` immediately on open.
    pub fn vacuum_on_open(mut self, vacuum_on_open: bool) -> Self {
        self.vacuum_on_open = vacuum_on_open;
        self
    }

    /// Enables at-rest encryption, deriving the key from `passphrase`.
    pub fn encrypted_with(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Resolves the database file path, joining the OS-default cache
    /// directory with `application_name` through [`safe_path_combine`] so a
    /// pathological name can never land the database outside that
    /// directory (`cache_directory_override`, being caller-supplied and
    /// already a full path rather than a name to join, is used verbatim).
    async fn database_path(&self) -> CacheResult<PathBuf> {
        let directory = match &self.cache_directory_override {
            Some(directory) => directory.clone(),
            None => {
                let base = dirs::cache_dir()
                    .ok_or_else(|| CacheError::InvalidArgument("no OS cache directory available on this platform".into()))?;
                tokio::fs::create_dir_all(&base).await?;
                safe_path_combine(&base, &self.application_name)?
            }
        };
        Ok(directory.join("blob-cache.db"))
    }

    /// The serializer this builder was configured with.
    pub fn serializer(&self) -> Arc<dyn Serializer> {
        self.serializer.clone()
    }

    /// Opens the configured [`PersistentStore`], creating its parent
    /// directory and database file if they do not already exist.
    pub async fn open(&self) -> CacheResult<PersistentStore> {
        let path = self.database_path().await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = PersistentStoreOptions {
            path,
            idle_flush_ms: self.idle_flush_ms,
            vacuum_on_open: self.vacuum_on_open,
        };
        PersistentStore::open(options).await
    }

    /// Opens the configured store wrapped in at-rest encryption. Fails if
    /// [`Self::encrypted_with`] was never called.
    pub async fn open_encrypted(&self) -> CacheResult<crate::encrypted::EncryptedStore<PersistentStore>> {
        let passphrase = self
            .passphrase
            .as_deref()
            .ok_or_else(|| CacheError::InvalidArgument("encrypted_with(..) was not configured".into()))?;
        let inner = self.open().await?;
        crate::encrypted::EncryptedStore::open(inner, passphrase).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_trait::BlobCache;
    use crate::serializer::JsonSerializer;
    use tempfile::tempdir;

    #[tokio::test]
    async fn opens_a_store_under_the_configured_directory() {
        let dir = tempdir().unwrap();
        let builder = CacheBuilder::new("my-app", Arc::new(JsonSerializer::new())).unwrap().cache_directory(dir.path());
        let store = builder.open().await.unwrap();
        store.insert("k", vec![1], None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), vec![1]);
        store.shutdown().await.unwrap();
        assert!(dir.path().join("blob-cache.db").exists());
    }

    #[test]
    fn rejects_an_invalid_application_name() {
        assert!(CacheBuilder::new("../escape", Arc::new(JsonSerializer::new())).is_err());
    }

    #[tokio::test]
    async fn open_encrypted_without_a_passphrase_fails() {
        let dir = tempdir().unwrap();
        let builder = CacheBuilder::new("my-app", Arc::new(JsonSerializer::new())).unwrap().cache_directory(dir.path());
        assert!(builder.open_encrypted().await.is_err());
    }
}

//! [`EncryptedStore`]: wraps any [`BlobCache`] with AES-256-GCM authenticated
//! encryption keyed by a PBKDF2-HMAC-SHA256-derived key (SPEC_FULL.md §5.9).
//!
//! The nonce is stored as a 12-byte prefix of the persisted value, so no
//! schema change is needed on top of the inner store. A wrong passphrase or
//! corrupted ciphertext surfaces as [`CacheError::CryptoFailed`] on the
//! first decrypt attempt rather than returning garbled bytes.

use std::collections::HashMap;
use std::time::SystemTime;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::cache_trait::{BlobCache, TypedKeyAccess};
use crate::error::{CacheError, CacheResult};
use crate::model::RESERVED_KEY_PREFIX;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;
const PBKDF2_ITERATIONS: u32 = 600_000;
const SALT_META_KEY: &str = "meta:kdf-salt";

/// A `BlobCache` that transparently encrypts every value it stores in
/// `inner`, using a key derived once per store from `passphrase`.
pub struct EncryptedStore<S: BlobCache> {
    inner: S,
    cipher: Aes256Gcm,
}

impl<S: BlobCache> EncryptedStore<S> {
    /// Opens an encrypted view over `inner`, deriving the encryption key
    /// from `passphrase`. On first use against a fresh store this generates
    /// and persists a random salt under a reserved meta key; on subsequent
    /// opens it reads the salt back so the same passphrase reproduces the
    /// same key.
    pub async fn open(inner: S, passphrase: &str) -> CacheResult<Self> {
        let salt = match inner.get(SALT_META_KEY).await {
            Ok(bytes) => bytes,
            Err(CacheError::NotFound) => {
                let mut salt = vec![0u8; SALT_LEN];
                OsRng.fill_bytes(&mut salt);
                inner.insert(SALT_META_KEY, salt.clone(), None).await?;
                salt
            }
            Err(other) => return Err(other),
        };

        let mut key_material = Zeroizing::new(vec![0u8; KEY_LEN]);
        pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut key_material);
        let cipher = Aes256Gcm::new_from_slice(&key_material).map_err(|e| CacheError::CryptoFailed(e.to_string()))?;

        Ok(Self { inner, cipher })
    }

    fn seal(&self, plaintext: &[u8]) -> CacheResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, Payload { msg: plaintext, aad: b"" })
            .map_err(|_| CacheError::CryptoFailed("encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open_sealed(&self, sealed: &[u8]) -> CacheResult<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(CacheError::CryptoFailed("ciphertext too short to contain a nonce".into()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, Payload { msg: ciphertext, aad: b"" })
            .map_err(|_| CacheError::CryptoFailed("wrong passphrase or corrupted data".into()))
    }
}

#[async_trait]
impl<S: BlobCache> BlobCache for EncryptedStore<S> {
    async fn insert(&self, key: &str, bytes: Vec<u8>, expiration: Option<SystemTime>) -> CacheResult<()> {
        let sealed = self.seal(&bytes)?;
        self.inner.insert(key, sealed, expiration).await
    }

    async fn get(&self, key: &str) -> CacheResult<Vec<u8>> {
        let sealed = self.inner.get(key).await?;
        self.open_sealed(&sealed)
    }

    async fn get_created_at(&self, key: &str) -> CacheResult<Option<SystemTime>> {
        self.inner.get_created_at(key).await
    }

    async fn invalidate(&self, key: &str) -> CacheResult<()> {
        self.inner.invalidate(key).await
    }

    async fn invalidate_all(&self) -> CacheResult<()> {
        self.inner.invalidate_all().await
    }

    async fn get_all_keys(&self) -> CacheResult<Vec<String>> {
        let mut keys = self.inner.get_all_keys().await?;
        keys.retain(|key| !key.starts_with(RESERVED_KEY_PREFIX));
        Ok(keys)
    }

    async fn flush(&self) -> CacheResult<()> {
        self.inner.flush().await
    }

    async fn vacuum(&self) -> CacheResult<()> {
        self.inner.vacuum().await
    }

    async fn bulk_insert(&self, items: HashMap<String, Vec<u8>>, expiration: Option<SystemTime>) -> CacheResult<()> {
        let mut sealed_items = HashMap::with_capacity(items.len());
        for (key, value) in items {
            sealed_items.insert(key, self.seal(&value)?);
        }
        self.inner.bulk_insert(sealed_items, expiration).await
    }

    async fn bulk_get(&self, keys: Vec<String>) -> CacheResult<HashMap<String, Vec<u8>>> {
        let sealed = self.inner.bulk_get(keys).await?;
        let mut opened = HashMap::with_capacity(sealed.len());
        for (key, value) in sealed {
            opened.insert(key, self.open_sealed(&value)?);
        }
        Ok(opened)
    }

    async fn bulk_invalidate(&self, keys: Vec<String>) -> CacheResult<()> {
        self.inner.bulk_invalidate(keys).await
    }

    async fn bulk_get_created_at(&self, keys: Vec<String>) -> CacheResult<HashMap<String, SystemTime>> {
        self.inner.bulk_get_created_at(keys).await
    }

    async fn update_expiration(&self, key: &str, expiration: Option<SystemTime>) -> CacheResult<()> {
        self.inner.update_expiration(key, expiration).await
    }

    async fn shutdown(&self) -> CacheResult<()> {
        self.inner.shutdown().await
    }
}

#[async_trait]
impl<S: TypedKeyAccess> TypedKeyAccess for EncryptedStore<S> {
    async fn insert_typed(&self, type_tag: &str, key: &str, bytes: Vec<u8>, expiration: Option<SystemTime>) -> CacheResult<()> {
        let sealed = self.seal(&bytes)?;
        self.inner.insert_typed(type_tag, key, sealed, expiration).await
    }

    async fn get_typed(&self, type_tag: &str, key: &str) -> CacheResult<Vec<u8>> {
        let sealed = self.inner.get_typed(type_tag, key).await?;
        self.open_sealed(&sealed)
    }

    async fn invalidate_typed(&self, type_tag: &str, key: &str) -> CacheResult<()> {
        self.inner.invalidate_typed(type_tag, key).await
    }

    async fn keys_of_type(&self, type_tag: &str) -> CacheResult<Vec<String>> {
        self.inner.keys_of_type(type_tag).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;

    #[tokio::test]
    async fn round_trips_through_encryption() {
        let store = EncryptedStore::open(InMemoryStore::new(), "correct horse battery staple").await.unwrap();
        store.insert("k", b"plaintext".to_vec(), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"plaintext".to_vec());
    }

    #[tokio::test]
    async fn meta_salt_row_is_hidden_from_key_listing() {
        let store = EncryptedStore::open(InMemoryStore::new(), "pw").await.unwrap();
        store.insert("k", vec![1], None).await.unwrap();
        let keys = store.get_all_keys().await.unwrap();
        assert_eq!(keys, vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn invalidate_all_does_not_destroy_the_kdf_salt() {
        let inner = InMemoryStore::new();
        {
            let store = EncryptedStore::open(&inner, "correct horse battery staple").await.unwrap();
            store.insert("k", b"secret".to_vec(), None).await.unwrap();
            store.invalidate_all().await.unwrap();
        }
        // Reopening with the same passphrase must still derive the same key:
        // if `invalidate_all` had wiped the salt row, this would silently
        // derive a different cipher and every prior ciphertext would be
        // undecryptable.
        let reopened = EncryptedStore::open(&inner, "correct horse battery staple").await.unwrap();
        reopened.insert("k2", b"other".to_vec(), None).await.unwrap();
        assert_eq!(reopened.get("k2").await.unwrap(), b"other".to_vec());
    }

    #[tokio::test]
    async fn wrong_passphrase_fails_to_decrypt_instead_of_returning_garbage() {
        let inner = InMemoryStore::new();
        {
            let writer = EncryptedStore::open(&inner, "right-passphrase").await.unwrap();
            writer.insert("k", b"secret".to_vec(), None).await.unwrap();
        }
        let reader = EncryptedStore::open(&inner, "wrong-passphrase").await.unwrap();
        let result = reader.get("k").await;
        assert!(matches!(result, Err(CacheError::CryptoFailed(_))));
    }

    #[async_trait]
    impl BlobCache for &InMemoryStore {
        async fn insert(&self, key: &str, bytes: Vec<u8>, expiration: Option<SystemTime>) -> CacheResult<()> {
            (**self).insert(key, bytes, expiration).await
        }
        async fn get(&self, key: &str) -> CacheResult<Vec<u8>> {
            (**self).get(key).await
        }
        async fn get_created_at(&self, key: &str) -> CacheResult<Option<SystemTime>> {
            (**self).get_created_at(key).await
        }
        async fn invalidate(&self, key: &str) -> CacheResult<()> {
            (**self).invalidate(key).await
        }
        async fn invalidate_all(&self) -> CacheResult<()> {
            (**self).invalidate_all().await
        }
        async fn get_all_keys(&self) -> CacheResult<Vec<String>> {
            (**self).get_all_keys().await
        }
        async fn flush(&self) -> CacheResult<()> {
            (**self).flush().await
        }
        async fn vacuum(&self) -> CacheResult<()> {
            (**self).vacuum().await
        }
        async fn bulk_insert(&self, items: HashMap<String, Vec<u8>>, expiration: Option<SystemTime>) -> CacheResult<()> {
            (**self).bulk_insert(items, expiration).await
        }
        async fn bulk_get(&self, keys: Vec<String>) -> CacheResult<HashMap<String, Vec<u8>>> {
            (**self).bulk_get(keys).await
        }
        async fn bulk_invalidate(&self, keys: Vec<String>) -> CacheResult<()> {
            (**self).bulk_invalidate(keys).await
        }
        async fn bulk_get_created_at(&self, keys: Vec<String>) -> CacheResult<HashMap<String, SystemTime>> {
            (**self).bulk_get_created_at(keys).await
        }
        async fn update_expiration(&self, key: &str, expiration: Option<SystemTime>) -> CacheResult<()> {
            (**self).update_expiration(key, expiration).await
        }
        async fn shutdown(&self) -> CacheResult<()> {
            (**self).shutdown().await
        }
    }
}

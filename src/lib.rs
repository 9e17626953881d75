//! An embedded asynchronous key/blob cache.
//!
//! A [`cache_trait::BlobCache`] is the engine every store implements
//! identically: an in-process [`memory::InMemoryStore`] for tests and
//! ephemeral caches, a SQLite-backed [`persistent::PersistentStore`] that
//! coalesces concurrent writers into batched transactions, and an
//! [`encrypted::EncryptedStore`] wrapper that seals every value with
//! AES-256-GCM before it reaches the inner store.
//!
//! [`config::CacheBuilder`] is the usual entry point: it resolves an
//! OS-appropriate cache directory for an application name, validates it,
//! and opens a [`persistent::PersistentStore`] (optionally wrapped in
//! encryption). On top of the raw byte engine, [`extensions`] adds typed
//! object storage, single-flight HTTP downloads, image-format validation,
//! and credential storage, and [`settings::CacheSettings`] adds a small
//! typed key/value facade for application settings.

pub mod cache_trait;
pub mod config;
pub mod encrypted;
pub mod error;
pub mod extensions;
pub mod memory;
pub mod model;
pub mod persistent;
pub mod primitives;
pub mod serializer;
pub mod settings;

pub use cache_trait::{BlobCache, TypedKeyAccess};
pub use config::CacheBuilder;
pub use encrypted::EncryptedStore;
pub use error::{CacheError, CacheResult};
pub use memory::InMemoryStore;
pub use model::{CacheElement, Expiration};
pub use persistent::{OperationKind, OperationResult, OperationQueue, PersistentStore, PersistentStoreOptions, DEFAULT_IDLE_FLUSH_MS};
pub use serializer::{ForcedDateTimeKind, JsonSerializer, Serializer};
pub use settings::CacheSettings;

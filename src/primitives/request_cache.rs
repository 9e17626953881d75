//! Single-flight in-flight request deduplication.
//!
//! Multiple concurrent callers sharing the same key observe the result of a
//! single `factory` invocation; the entry is evicted on completion
//! (success or error) so a later call starts fresh.

use std::future::Future;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::error::CacheError;

type Slot<T> = Arc<broadcast::Sender<Result<T, CacheError>>>;

/// Deduplicates concurrent in-flight calls that share a key.
///
/// `K` is typically `Option<String>` so that "no key" (`None`) callers are
/// bucketed together under one sentinel slot, matching the source's
/// null-key behavior. The in-flight map is a `DashMap` so unrelated keys
/// never contend with each other just to register or look up a slot.
pub struct RequestCache<K, T> {
    inflight: Arc<DashMap<K, Slot<T>>>,
}

impl<K, T> Default for RequestCache<K, T>
where
    K: std::hash::Hash + Eq + Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> RequestCache<K, T>
where
    K: std::hash::Hash + Eq + Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    /// Creates an empty request cache.
    pub fn new() -> Self {
        Self { inflight: Arc::new(DashMap::new()) }
    }

    /// Runs `factory` for `key`, sharing its result with any other callers
    /// that request the same `key` while it is still in flight.
    pub async fn get_or_create<F, Fut>(&self, key: K, factory: F) -> Result<T, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, CacheError>> + Send + 'static,
    {
        let (is_leader, mut receiver) = match self.inflight.entry(key.clone()) {
            Entry::Occupied(entry) => (false, entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (sender, receiver) = broadcast::channel(1);
                entry.insert(Arc::new(sender));
                (true, receiver)
            }
        };

        if is_leader {
            let result = factory().await;
            let sender = self.inflight.remove(&key).map(|(_, sender)| sender);
            if let Some(sender) = sender {
                // Ignore send errors: no followers were subscribed, which
                // is fine, the leader still returns its own result below.
                let _ = sender.send(result.clone());
            }
            result
        } else {
            match receiver.recv().await {
                Ok(result) => result,
                // The leader's sender was dropped without sending (panic or
                // cancellation) — treat as cancelled so followers don't hang.
                Err(_) => Err(CacheError::Cancelled),
            }
        }
    }
}

impl<K, T> Clone for RequestCache<K, T> {
    fn clone(&self) -> Self {
        Self {
            inflight: self.inflight.clone(),
        }
    }
}

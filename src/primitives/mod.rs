//! Coordination primitives used by every store: an async mutex, a
//! keyed/serial operation queue, single-flight request deduplication, and
//! path/name validators.

pub mod async_mutex;
pub mod keyed_queue;
pub mod request_cache;
pub mod security;

pub use async_mutex::{AsyncMutex, LockHandle};
pub use keyed_queue::KeyedOperationQueue;
pub use request_cache::RequestCache;

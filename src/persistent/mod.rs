//! The SQLite-backed, coalescing store (SPEC_FULL.md §5.7–§5.8).

mod coalescer;
mod operation;
mod queue;
mod sql;
mod store;

pub use operation::{OperationKind, OperationResult};
pub use queue::{OperationQueue, DEFAULT_IDLE_FLUSH_MS};
pub use store::{PersistentStore, PersistentStoreOptions};

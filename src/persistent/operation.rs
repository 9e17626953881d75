//! The request/completion shape the operation queue and coalescer operate
//! on: [`OperationKind`], [`OperationResult`], and the owned
//! [`PendingOperation`] record moved from `enqueue` into the runner.

use tokio::sync::oneshot;

use crate::error::CacheError;
use crate::model::CacheElement;

/// What an enqueued operation asks the store to do.
#[derive(Debug, Clone)]
pub enum OperationKind {
    /// Bulk point lookup by physical key.
    Select(Vec<String>),
    /// Bulk insert-or-replace.
    Insert(Vec<CacheElement>),
    /// Bulk delete by physical key.
    Invalidate(Vec<String>),
    /// Delete every row (except reserved meta rows).
    InvalidateAll,
    /// List non-expired physical keys. `None` = all types; `Some(None)` =
    /// untyped only; `Some(Some(tag))` = only that type tag.
    GetKeys(Option<Option<String>>),
    /// Purge expired rows; optionally also run SQLite's file-level `VACUUM`.
    Vacuum { compact: bool },
    /// Rewrites only the `Expiration` column for a physical key, without
    /// touching `Value`. A no-op if the row is absent.
    UpdateExpiration { physical_key: String, expiration_ticks: i64 },
    /// A no-op fence used to implement `flush()`.
    Flush,
}

impl OperationKind {
    /// Whether this kind can ever be merged with siblings of the same kind
    /// (`GetKeys`/`Vacuum`/`InvalidateAll`/`Flush` are always singleton
    /// groups — see `coalescer::group`).
    pub(crate) fn is_mergeable(&self) -> bool {
        matches!(self, OperationKind::Select(_) | OperationKind::Insert(_) | OperationKind::Invalidate(_))
    }

    /// A coarse discriminant used to decide whether two adjacent operations
    /// belong to the same contiguous run.
    pub(crate) fn discriminant(&self) -> u8 {
        match self {
            OperationKind::Select(_) => 0,
            OperationKind::Insert(_) => 1,
            OperationKind::Invalidate(_) => 2,
            OperationKind::InvalidateAll => 3,
            OperationKind::GetKeys(_) => 4,
            OperationKind::Vacuum { .. } => 5,
            OperationKind::UpdateExpiration { .. } => 6,
            OperationKind::Flush => 7,
        }
    }
}

/// What a completed operation delivers to its subscriber.
#[derive(Debug, Clone)]
pub enum OperationResult {
    /// Rows returned by a `Select`.
    Elements(Vec<CacheElement>),
    /// Keys returned by `GetKeys`.
    Keys(Vec<String>),
    /// Everything else (`Insert`, `Invalidate`, `InvalidateAll`, `Vacuum`,
    /// `Flush`) signals success with no payload.
    Unit,
}

/// An operation owned by the queue, from `enqueue` until the runner
/// completes (or fails) it.
pub struct PendingOperation {
    pub id: u64,
    pub kind: OperationKind,
    pub sink: oneshot::Sender<Result<OperationResult, CacheError>>,
}

impl PendingOperation {
    /// Completes this operation, ignoring a dropped receiver (the caller
    /// lost interest in the result, which is allowed per SPEC_FULL.md §6).
    pub fn complete(self, result: Result<OperationResult, CacheError>) {
        let _ = self.sink.send(result);
    }
}

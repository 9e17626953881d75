//! The runner that turns a stream of enqueued operations into batched,
//! coalesced SQL work (SPEC_FULL.md §5.8).
//!
//! State machine: `Open` accepts new work; `shutdown` drops the sending half
//! (closing the channel) and moves to `Draining` while the runner finishes
//! whatever was already queued; once the runner task exits the queue is
//! `Closed`. The three states are modeled as `tx: Option<Sender>` plus the
//! runner `JoinHandle` rather than an explicit enum, since "draining" is
//! exactly "tx is gone but the runner hasn't joined yet".

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use sqlx::sqlite::SqlitePool;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, OnceCell};

use crate::error::{CacheError, CacheResult};
use crate::persistent::coalescer::{coalesce, CoalescedKind, CoalescedOperation};
use crate::persistent::operation::{OperationKind, OperationResult, PendingOperation};
use crate::persistent::sql;

/// Default idle-flush window: how long the runner waits for more work to
/// arrive before executing whatever batch it has accumulated.
pub const DEFAULT_IDLE_FLUSH_MS: u64 = 100;

pub struct OperationQueue {
    tx: SyncMutex<Option<mpsc::UnboundedSender<PendingOperation>>>,
    next_id: AtomicU64,
    runner: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown_once: OnceCell<()>,
}

impl OperationQueue {
    /// Opens a queue backed by `pool`, spawning its runner task immediately.
    pub fn start(pool: SqlitePool, idle_flush_ms: u64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = tokio::spawn(run(pool, rx, Duration::from_millis(idle_flush_ms)));
        Self {
            tx: SyncMutex::new(Some(tx)),
            next_id: AtomicU64::new(0),
            runner: AsyncMutex::new(Some(runner)),
            shutdown_once: OnceCell::new(),
        }
    }

    /// Submits `kind` and awaits its result. Fails with
    /// [`CacheError::AlreadyDisposed`] if the queue has been shut down.
    pub async fn enqueue(&self, kind: OperationKind) -> CacheResult<OperationResult> {
        let (sink, receiver) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let op = PendingOperation { id, kind, sink };

        {
            let guard = self.tx.lock();
            let sender = guard.as_ref().ok_or(CacheError::AlreadyDisposed)?;
            sender.send(op).map_err(|_| CacheError::AlreadyDisposed)?;
        }

        receiver.await.map_err(|_| CacheError::Cancelled)?
    }

    /// A no-op fence: completes once every operation enqueued before this
    /// call has executed (channel order plus single-runner sequencing
    /// guarantees this without any extra synchronization).
    pub async fn flush(&self) -> CacheResult<()> {
        self.enqueue(OperationKind::Flush).await.map(|_| ())
    }

    /// Stops accepting new work and waits for the runner to drain everything
    /// already queued. Idempotent and safe to call concurrently.
    pub async fn shutdown(&self) {
        self.shutdown_once
            .get_or_init(|| async {
                self.tx.lock().take();
                let handle = self.runner.lock().await.take();
                if let Some(handle) = handle {
                    let _ = handle.await;
                }
            })
            .await;
    }

    /// Whether `shutdown` has been called (the sending half is gone).
    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }
}

async fn run(pool: SqlitePool, mut rx: mpsc::UnboundedReceiver<PendingOperation>, idle_flush: Duration) {
    loop {
        let first = match rx.recv().await {
            Some(op) => op,
            None => return,
        };

        let mut batch = vec![first];
        loop {
            tokio::select! {
                biased;
                maybe_op = rx.recv() => match maybe_op {
                    Some(op) => batch.push(op),
                    None => break,
                },
                _ = tokio::time::sleep(idle_flush) => break,
            }
        }

        for coalesced in coalesce(batch) {
            execute_and_complete(&pool, coalesced).await;
        }

        if rx.is_closed() && rx.is_empty() {
            return;
        }
    }
}

async fn execute_and_complete(pool: &SqlitePool, coalesced: CoalescedOperation) {
    let CoalescedOperation { kind, originals } = coalesced;
    let outcome = sql::execute(pool, &kind).await;

    match outcome {
        Ok(result) => fan_out_success(&kind, result, originals),
        Err(err) => {
            for op in originals {
                op.complete(Err(err.clone()));
            }
        }
    }
}

fn fan_out_success(kind: &CoalescedKind, result: OperationResult, originals: Vec<PendingOperation>) {
    match (kind, result) {
        (CoalescedKind::Select(_), OperationResult::Elements(elements)) => {
            for op in originals {
                if let OperationKind::Select(requested) = &op.kind {
                    let subset =
                        elements.iter().filter(|element| requested.contains(&element.physical_key)).cloned().collect();
                    op.complete(Ok(OperationResult::Elements(subset)));
                } else {
                    op.complete(Ok(OperationResult::Elements(elements.clone())));
                }
            }
        }
        (_, result) => {
            for op in originals {
                op.complete(Ok(result.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{compose_physical_key, now_ticks, CacheElement, NEVER_TICKS};

    async fn open_queue() -> OperationQueue {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sql::bootstrap_schema(&pool).await.unwrap();
        OperationQueue::start(pool, 5)
    }

    #[tokio::test]
    async fn insert_then_select_round_trips_through_the_queue() {
        let queue = open_queue().await;
        let key = compose_physical_key(None, "k");
        let element = CacheElement { physical_key: key.clone(), type_name: None, value: vec![7], expiration: NEVER_TICKS, created_at: now_ticks() };
        queue.enqueue(OperationKind::Insert(vec![element])).await.unwrap();

        let result = queue.enqueue(OperationKind::Select(vec![key])).await.unwrap();
        match result {
            OperationResult::Elements(elements) => {
                assert_eq!(elements.len(), 1);
                assert_eq!(elements[0].value, vec![7]);
            }
            _ => panic!("expected elements"),
        }
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_selects_for_disjoint_keys_each_get_their_own_subset() {
        let queue = Arc::new(open_queue().await);
        let a = compose_physical_key(None, "a");
        let b = compose_physical_key(None, "b");
        queue
            .enqueue(OperationKind::Insert(vec![
                CacheElement { physical_key: a.clone(), type_name: None, value: vec![1], expiration: NEVER_TICKS, created_at: now_ticks() },
                CacheElement { physical_key: b.clone(), type_name: None, value: vec![2], expiration: NEVER_TICKS, created_at: now_ticks() },
            ]))
            .await
            .unwrap();

        let (qa, qb) = (queue.clone(), queue.clone());
        let (ka, kb) = (a.clone(), b.clone());
        let (ra, rb) = tokio::join!(qa.enqueue(OperationKind::Select(vec![ka])), qb.enqueue(OperationKind::Select(vec![kb])));

        match ra.unwrap() {
            OperationResult::Elements(elements) => {
                assert_eq!(elements.len(), 1);
                assert_eq!(elements[0].physical_key, a);
                assert_eq!(elements[0].value, vec![1]);
            }
            _ => panic!("expected elements"),
        }
        match rb.unwrap() {
            OperationResult::Elements(elements) => {
                assert_eq!(elements.len(), 1);
                assert_eq!(elements[0].physical_key, b);
                assert_eq!(elements[0].value, vec![2]);
            }
            _ => panic!("expected elements"),
        }
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_drains_in_flight_work_then_rejects_new_enqueues() {
        let queue = open_queue().await;
        let key = compose_physical_key(None, "k");
        let element = CacheElement { physical_key: key.clone(), type_name: None, value: vec![1], expiration: NEVER_TICKS, created_at: now_ticks() };
        queue.enqueue(OperationKind::Insert(vec![element])).await.unwrap();
        queue.shutdown().await;

        let result = queue.enqueue(OperationKind::Select(vec![key])).await;
        assert!(matches!(result, Err(CacheError::AlreadyDisposed)));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_across_concurrent_callers() {
        let queue = Arc::new(open_queue().await);
        let (q1, q2) = (queue.clone(), queue.clone());
        tokio::join!(q1.shutdown(), q2.shutdown());
        assert!(queue.is_closed());
    }
}

//! A FIFO, cancellable async mutex.
//!
//! Not reentrant. Waiters queue in arrival order; releasing hands the lock
//! straight to the next waiter so no acquirer ever observes the lock
//! briefly unowned between a release and the next acquire.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Notify;

use crate::error::{CacheError, CacheResult};

enum LockState {
    Unlocked,
    Locked,
}

struct Waiter {
    id: u64,
    notify: Notify,
    granted: AtomicBool,
}

struct Inner {
    state: LockState,
    waiters: VecDeque<Arc<Waiter>>,
    next_waiter_id: u64,
}

/// A FIFO, cancel-safe mutex built on a waiter queue rather than polling.
///
/// Cloning an `AsyncMutex` shares the same underlying lock (it is itself a
/// handle around an `Arc`), matching how the operation queue and encrypted
/// store hand the same mutex to multiple owners.
#[derive(Clone)]
pub struct AsyncMutex {
    inner: Arc<StdMutex<Inner>>,
}

impl Default for AsyncMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncMutex {
    /// Creates a new, unlocked mutex.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StdMutex::new(Inner {
                state: LockState::Unlocked,
                waiters: VecDeque::new(),
                next_waiter_id: 0,
            })),
        }
    }

    /// Acquires the lock, waiting in FIFO order behind any earlier callers.
    ///
    /// If `cancel` resolves before the lock is granted, the waiter is
    /// removed from the queue and this call returns
    /// [`CacheError::Cancelled`]. If cancellation races a grant that has
    /// already been handed to this waiter (it was popped off the queue by a
    /// concurrent `release` just before we observed the cancellation), the
    /// lock is accepted and immediately released on to the next waiter
    /// rather than leaking — fairness and liveness for the rest are
    /// unaffected either way.
    pub async fn acquire(&self, cancel: impl std::future::Future<Output = ()>) -> CacheResult<LockHandle> {
        let waiter = {
            let mut guard = self.inner.lock().unwrap();
            match guard.state {
                LockState::Unlocked => {
                    guard.state = LockState::Locked;
                    return Ok(LockHandle { mutex: self.clone(), released: false });
                }
                LockState::Locked => {
                    let id = guard.next_waiter_id;
                    guard.next_waiter_id += 1;
                    let waiter = Arc::new(Waiter {
                        id,
                        notify: Notify::new(),
                        granted: AtomicBool::new(false),
                    });
                    guard.waiters.push_back(waiter.clone());
                    waiter
                }
            }
        };

        tokio::pin!(cancel);
        loop {
            tokio::select! {
                _ = waiter.notify.notified() => {
                    if waiter.granted.load(Ordering::Acquire) {
                        return Ok(LockHandle { mutex: self.clone(), released: false });
                    }
                    // Spurious wakeup; keep waiting.
                }
                _ = &mut cancel => {
                    let mut guard = self.inner.lock().unwrap();
                    let position = guard.waiters.iter().position(|w| w.id == waiter.id);
                    match position {
                        Some(index) => {
                            guard.waiters.remove(index);
                            return Err(CacheError::Cancelled);
                        }
                        None => {
                            // `release` already popped us (and set `granted`)
                            // in the same critical section, so we are the
                            // new holder even though we chose to cancel.
                            // Accept ownership and hand it straight to the
                            // next waiter instead of leaking the lock.
                            drop(guard);
                            drop(LockHandle { mutex: self.clone(), released: false });
                            return Err(CacheError::Cancelled);
                        }
                    }
                }
            }
        }
    }

    /// Acquires the lock unconditionally (never cancellable).
    pub async fn lock(&self) -> LockHandle {
        self.acquire(std::future::pending()).await.expect("uncancellable acquire never fails")
    }

    fn release(&self) {
        let mut guard = self.inner.lock().unwrap();
        match guard.waiters.pop_front() {
            Some(next) => {
                // Ownership transfers atomically: we never clear `state` to
                // `Unlocked` when a waiter exists, so a third party calling
                // `acquire` never observes an unowned lock in between.
                next.granted.store(true, Ordering::Release);
                drop(guard);
                next.notify.notify_one();
            }
            None => {
                guard.state = LockState::Unlocked;
            }
        }
    }
}

/// A held lock. Dropping it (or calling [`LockHandle::release`] explicitly)
/// releases the mutex; release is idempotent.
pub struct LockHandle {
    mutex: AsyncMutex,
    released: bool,
}

impl LockHandle {
    /// Releases the lock. Calling this more than once is a no-op.
    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if !self.released {
            self.released = true;
            self.mutex.release();
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.do_release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn single_acquirer_gets_the_lock_immediately() {
        let mutex = AsyncMutex::new();
        let handle = mutex.lock().await;
        drop(handle);
    }

    #[tokio::test]
    async fn waiters_are_served_in_fifo_order() {
        let mutex = AsyncMutex::new();
        let order = Arc::new(StdMutex::new(Vec::new()));
        let first = mutex.lock().await;

        let mut tasks = Vec::new();
        for i in 0..5 {
            let mutex = mutex.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                // Stagger spawn start so waiters enqueue in `i` order.
                tokio::time::sleep(Duration::from_millis(i as u64 * 5)).await;
                let handle = mutex.lock().await;
                order.lock().unwrap().push(i);
                drop(handle);
            }));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(first);
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn cancelling_a_waiter_does_not_block_the_rest() {
        let mutex = AsyncMutex::new();
        let held = mutex.lock().await;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let cancelled = {
            let mutex = mutex.clone();
            tokio::spawn(async move {
                mutex
                    .acquire(async {
                        let _ = cancel_rx.await;
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel_tx.send(()).unwrap();
        let result = cancelled.await.unwrap();
        assert!(matches!(result, Err(CacheError::Cancelled)));

        let successes = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..3 {
            let mutex = mutex.clone();
            let successes = successes.clone();
            tasks.push(tokio::spawn(async move {
                let handle = mutex.lock().await;
                successes.fetch_add(1, AtomicOrdering::SeqCst);
                drop(handle);
            }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(held);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(successes.load(AtomicOrdering::SeqCst), 3);
    }

    #[tokio::test]
    async fn release_never_fails_and_is_idempotent() {
        let mutex = AsyncMutex::new();
        let handle = mutex.lock().await;
        handle.release();
        let handle2 = mutex.lock().await;
        drop(handle2);
    }

    #[tokio::test]
    async fn a_grant_that_races_cancellation_is_forwarded_not_leaked() {
        // Regression test: if `release` pops a waiter just before that
        // waiter observes its own cancellation, the lock must not be
        // leaked — it should be handed to the next waiter in line.
        let mutex = AsyncMutex::new();
        let held = mutex.lock().await;

        let already_cancelled = async {};
        let waiter_mutex = mutex.clone();
        let waiter_task = tokio::spawn(async move { waiter_mutex.acquire(already_cancelled).await });

        // Give the spawned task a chance to enqueue before we release.
        tokio::time::sleep(Duration::from_millis(5)).await;
        drop(held);
        let _ = waiter_task.await;

        // The lock must still be acquirable afterwards, proving it was not
        // stranded in the `Locked` state with no holder.
        let final_handle = tokio::time::timeout(Duration::from_millis(200), mutex.lock()).await;
        assert!(final_handle.is_ok());
    }
}

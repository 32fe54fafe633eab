//! Per-identity mutual exclusion.
//!
//! Every read-modify-write of a ledger entry happens under that identity's
//! lock, so the queue manager and concurrent delivery passes never lose each
//! other's updates. Different identities never contend.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::sync::OwnedMutexGuard;

use crate::model::IdentityKey;

type Cell = Arc<tokio::sync::Mutex<()>>;

#[derive(Default)]
pub struct IdentityLocks {
    cells: Mutex<HashMap<IdentityKey, Cell>>,
}

/// Held while one identity's ledger entry is being modified.
pub struct IdentityGuard<'a> {
    // Field order matters: the mutex guard is released before the prune runs.
    _guard: OwnedMutexGuard<()>,
    _prune: Prune<'a>,
}

/// Drops the map cell for `key` once nothing else references it.
struct Prune<'a> {
    locks: &'a IdentityLocks,
    key: IdentityKey,
}

impl Drop for Prune<'_> {
    fn drop(&mut self) {
        let mut cells = self.locks.cells.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map still references the cell: nobody holds or waits for it.
        if cells
            .get(&self.key)
            .is_some_and(|cell| Arc::strong_count(cell) == 1)
        {
            cells.remove(&self.key);
        }
    }
}

/// A pending acquisition. If it is dropped before completing (a timeout, a
/// cancelled task) its cell is pruned like a released guard.
struct Acquire<'a> {
    pending: Pin<Box<dyn Future<Output = OwnedMutexGuard<()>> + Send>>,
    _prune: Prune<'a>,
}

impl Future for Acquire<'_> {
    type Output = OwnedMutexGuard<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.pending.as_mut().poll(cx)
    }
}

impl IdentityLocks {
    /// Wait for exclusive access to one identity.
    pub async fn lock(&self, key: IdentityKey) -> IdentityGuard<'_> {
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(cells.entry(key).or_default())
        };
        let guard = Acquire {
            pending: Box::pin(cell.lock_owned()),
            _prune: Prune { locks: self, key },
        }
        .await;
        IdentityGuard {
            _guard: guard,
            _prune: Prune { locks: self, key },
        }
    }

    /// Lock several identities at once. Keys are taken in sorted order so two
    /// callers locking overlapping sets cannot deadlock.
    pub async fn lock_all(&self, keys: &[IdentityKey]) -> Vec<IdentityGuard<'_>> {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(key).await);
        }
        guards
    }

    /// Number of identities with a held or awaited lock.
    pub fn active(&self) -> usize {
        self.cells.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn same_identity_is_serialized() {
        let locks = Arc::new(IdentityLocks::default());
        let key = IdentityKey(Uuid::new_v4());
        let counter = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let locks = Arc::clone(&locks);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(key).await;
                counter.lock().await.push(("enter", i));
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.lock().await.push(("leave", i));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let log = counter.lock().await;
        for pair in log.chunks(2) {
            assert_eq!(pair[0].0, "enter");
            assert_eq!(pair[1].0, "leave");
            assert_eq!(pair[0].1, pair[1].1);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn different_identities_do_not_block() {
        let locks = IdentityLocks::default();
        let _a = locks.lock(IdentityKey(Uuid::new_v4())).await;
        let b = tokio::time::timeout(
            Duration::from_millis(50),
            locks.lock(IdentityKey(Uuid::new_v4())),
        )
        .await;
        assert!(b.is_ok());
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_leave_a_cell_behind() {
        let locks = IdentityLocks::default();
        let key = IdentityKey(Uuid::new_v4());
        let holder = locks.lock(key).await;

        {
            let waiter = locks.lock(key);
            tokio::pin!(waiter);
            let timed_out = tokio::time::timeout(Duration::from_millis(10), &mut waiter).await;
            assert!(timed_out.is_err());

            // Released while the waiter is still alive: the cell must stay.
            drop(holder);
            assert_eq!(locks.active(), 1);
        }

        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn lock_all_takes_each_key_once() {
        let locks = IdentityLocks::default();
        let a = IdentityKey(Uuid::new_v4());
        let b = IdentityKey(Uuid::new_v4());
        let guards = locks.lock_all(&[b, a, b]).await;
        assert_eq!(guards.len(), 2);
        assert_eq!(locks.active(), 2);
        drop(guards);
        assert_eq!(locks.active(), 0);
    }
}

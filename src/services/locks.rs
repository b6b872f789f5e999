//! Per-connection mutation locks
//!
//! Mutations of one connection id queue on an async mutex; distinct ids never
//! contend. Waiting is bounded: a caller that does not get the lock within the
//! configured timeout gets `Busy` and must not touch the id.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::ConnectionId;
use crate::errors::{EgressError, Result};

/// Held for the whole of one mutation of `id`.
#[derive(Debug)]
pub struct IdLockGuard {
    id: ConnectionId,
    waited: Duration,
    _guard: OwnedMutexGuard<()>,
}

impl IdLockGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Time spent queueing before the lock was granted
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

/// Lock table keyed by connection id.
#[derive(Debug)]
pub struct IdLocks {
    locks: DashMap<ConnectionId, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl IdLocks {
    pub fn new(timeout: Duration) -> Self {
        Self { locks: DashMap::new(), timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Queue for the lock of `id`, failing with `Busy` after the timeout
    pub async fn acquire(&self, id: ConnectionId) -> Result<IdLockGuard> {
        // Clone the mutex out so the map shard is not held across the await.
        let lock = self.locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone();
        let started = Instant::now();

        match tokio::time::timeout(self.timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(IdLockGuard { id, waited: started.elapsed(), _guard: guard }),
            Err(_) => Err(EgressError::busy("connection", id, self.timeout.as_millis() as u64)),
        }
    }

    /// Drop the entry of a deleted id once nobody holds or awaits it.
    pub fn forget(&self, id: ConnectionId) {
        self.locks.remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Drop the entry of `id` after an operation found no such connection.
    /// Call once the guard is released.
    pub fn forget_if_missing<T>(&self, id: ConnectionId, result: &Result<T>) {
        if matches!(result, Err(EgressError::NotFound { .. })) {
            self.forget(id);
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_id_waits_then_times_out() {
        let locks = IdLocks::new(Duration::from_millis(30));
        let id = ConnectionId::new(1);
        let held = locks.acquire(id).await.unwrap();

        let err = locks.acquire(id).await.unwrap_err();
        assert!(matches!(err, EgressError::Busy { waited_ms: 30, .. }));

        drop(held);
        assert!(locks.acquire(id).await.is_ok());
    }

    #[tokio::test]
    async fn distinct_ids_do_not_contend() {
        let locks = IdLocks::new(Duration::from_millis(30));
        let _a = locks.acquire(ConnectionId::new(1)).await.unwrap();
        let b = locks.acquire(ConnectionId::new(2)).await.unwrap();
        assert_eq!(b.id(), ConnectionId::new(2));
    }

    #[tokio::test]
    async fn queued_waiter_gets_lock_after_release() {
        let locks = Arc::new(IdLocks::new(Duration::from_secs(1)));
        let id = ConnectionId::new(5);
        let held = locks.acquire(id).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire(id).await.map(|g| g.waited()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        let waited = waiter.await.unwrap().unwrap();
        assert!(waited >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn forget_keeps_entries_in_use() {
        let locks = IdLocks::new(Duration::from_millis(30));
        let id = ConnectionId::new(9);
        let held = locks.acquire(id).await.unwrap();

        locks.forget(id);
        assert_eq!(locks.len(), 1);

        drop(held);
        locks.forget(id);
        assert!(locks.is_empty());
    }
}

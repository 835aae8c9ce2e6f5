//! Per-entity mutual exclusion
//!
//! Every ledger mutation touches exactly one bin or one user. Holding that
//! entity's lock across read → validate → commit turns the check-then-act
//! sequence into one serialized unit, while operations on other entities
//! proceed in parallel. Keyed grants also hold their idempotency key, always
//! taken before the user.
//!
//! Lock entries are created on demand and pruned when their last holder
//! releases them, so the map only grows with in-flight entities.

use crate::{types::Email, Error, Result};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{timeout, Duration};
use uuid::Uuid;

/// Identity of a lockable entity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    /// A bin
    Bin(Uuid),
    /// A user, by natural key
    User(Email),
    /// A caller-supplied idempotency key
    Idempotency(String),
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Bin(id) => write!(f, "bin:{}", id),
            EntityKey::User(email) => write!(f, "user:{}", email),
            EntityKey::Idempotency(key) => write!(f, "idempotency:{}", key),
        }
    }
}

/// Lock table keyed by entity
#[derive(Clone)]
pub struct EntityLocks {
    locks: Arc<DashMap<EntityKey, Arc<Mutex<()>>>>,
    wait_timeout: Duration,
}

impl EntityLocks {
    /// Create lock table with the given acquisition timeout
    pub fn new(wait_timeout: Duration) -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            wait_timeout,
        }
    }

    /// Acquire the lock for one entity
    ///
    /// Fails with [`Error::Conflict`] if the lock is not obtained within the
    /// configured timeout.
    pub async fn acquire(&self, key: EntityKey) -> Result<EntityGuard> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = match timeout(self.wait_timeout, mutex.lock_owned()).await {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!(entity = %key, "Entity lock wait timed out");
                // Our clone is gone; let an abandoned entry be pruned
                self.prune(&key);
                return Err(Error::Conflict(format!(
                    "Timed out waiting for {} after {:?}",
                    key, self.wait_timeout
                )));
            }
        };

        Ok(EntityGuard {
            guard: Some(guard),
            key,
            locks: Arc::clone(&self.locks),
        })
    }

    /// Number of entities with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Check if no entity is locked or awaited
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn prune(&self, key: &EntityKey) {
        self.locks
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl fmt::Debug for EntityLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityLocks")
            .field("entries", &self.locks.len())
            .field("wait_timeout", &self.wait_timeout)
            .finish()
    }
}

/// Held entity lock, released on drop
pub struct EntityGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: EntityKey,
    locks: Arc<DashMap<EntityKey, Arc<Mutex<()>>>>,
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        // Release first so the strong count reflects only the map and waiters
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl fmt::Debug for EntityGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityGuard").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(s: &str) -> EntityKey {
        EntityKey::User(Email::parse(s).unwrap())
    }

    #[tokio::test]
    async fn test_acquire_and_prune() {
        let locks = EntityLocks::new(Duration::from_millis(100));

        let guard = locks.acquire(user("alice@example.com")).await.unwrap();
        assert_eq!(locks.len(), 1);

        drop(guard);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_same_entity_times_out_with_conflict() {
        let locks = EntityLocks::new(Duration::from_millis(20));

        let _held = locks.acquire(user("alice@example.com")).await.unwrap();
        let err = locks.acquire(user("alice@example.com")).await.unwrap_err();

        assert!(matches!(err, Error::Conflict(_)));
        assert!(err.is_retryable());
        // The holder keeps its entry
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_different_entities_do_not_block() {
        let locks = EntityLocks::new(Duration::from_millis(20));

        let _alice = locks.acquire(user("alice@example.com")).await.unwrap();
        let _bob = locks.acquire(user("bob@example.com")).await.unwrap();
        let _bin = locks.acquire(EntityKey::Bin(Uuid::now_v7())).await.unwrap();

        assert_eq!(locks.len(), 3);
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let locks = EntityLocks::new(Duration::from_secs(1));
        let key = EntityKey::Bin(Uuid::now_v7());

        let held = locks.acquire(key.clone()).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            let key = key.clone();
            tokio::spawn(async move { locks.acquire(key).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        waiter.await.unwrap().unwrap();
        assert!(locks.is_empty());
    }
}

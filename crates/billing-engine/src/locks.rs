//! Per-customer async locks
//!
//! The enforcer and the restorer both read a secret and then write it. Holding
//! the customer's lock across that sequence keeps them from interleaving.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type LockKey = (Uuid, String);

/// Lazily created mutexes keyed by `(owner_id, username)`
#[derive(Debug, Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock of one customer
    pub async fn lock(&self, owner_id: Uuid, username: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().await;
            // Slots nobody holds or waits on are only referenced by the map
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            Arc::clone(
                slots
                    .entry((owner_id, username.to_string()))
                    .or_default(),
            )
        };
        slot.lock_owned().await
    }

    /// Number of live slots
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_same_customer_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        let owner = Uuid::new_v4();

        let guard = locks.lock(owner, "alice").await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock(owner, "alice").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_customers_do_not_block() {
        let locks = KeyedLocks::new();
        let owner = Uuid::new_v4();

        let _alice = locks.lock(owner, "alice").await;
        let bob = tokio::time::timeout(Duration::from_millis(100), locks.lock(owner, "bob")).await;
        assert!(bob.is_ok());

        let other_owner = tokio::time::timeout(
            Duration::from_millis(100),
            locks.lock(Uuid::new_v4(), "alice"),
        )
        .await;
        assert!(other_owner.is_ok());
    }

    #[tokio::test]
    async fn test_released_slots_are_pruned() {
        let locks = KeyedLocks::new();
        let owner = Uuid::new_v4();

        drop(locks.lock(owner, "alice").await);
        drop(locks.lock(owner, "bob").await);
        let _carol = locks.lock(owner, "carol").await;

        assert_eq!(locks.len().await, 1);
    }
}

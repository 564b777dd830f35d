//! Per-peer-device serialization for Signal session operations (§5, §9).
//!
//! Every encrypt/decrypt/recover against a given `DeviceAddress` must run
//! under a single lock so the ratchet state in the crypto store never sees
//! two racing mutations — but unrelated peer devices must not block each
//! other. A single global mutex would serialize all traffic; a lock per
//! address keeps devices independent while still closing the race within
//! one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Lazily-populated registry of per-address locks. Entries are never
/// removed: the registry lives for the process lifetime and the number of
/// distinct peer devices a client talks to is bounded in practice, so this
/// trades a little long-lived memory for never having to reason about a
/// lock being dropped out from under a waiter.
#[derive(Default)]
pub struct PeerLockRegistry {
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PeerLockRegistry {
    pub fn new() -> Self {
        Self {
            locks: StdMutex::new(HashMap::new()),
        }
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().expect("peer lock registry poisoned");
        locks
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Acquire the lock for `key` (typically a `DeviceAddress`'s display
    /// form). Holding the returned guard serializes every other caller
    /// using the same key; callers with different keys never wait on each
    /// other.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = self.entry(key);
        mutex.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn distinct_keys_do_not_block_each_other() {
        let registry = Arc::new(PeerLockRegistry::new());
        let g1 = registry.acquire("alice.1").await;
        let r2 = Arc::clone(&registry);
        let joined = tokio::time::timeout(Duration::from_millis(200), async move {
            let _g2 = r2.acquire("bob.1").await;
        })
        .await;
        assert!(joined.is_ok());
        drop(g1);
    }

    #[tokio::test]
    async fn same_key_serializes() {
        let registry = Arc::new(PeerLockRegistry::new());
        let guard = registry.acquire("alice.1").await;

        let r2 = Arc::clone(&registry);
        let waiter = tokio::spawn(async move {
            let _g = r2.acquire("alice.1").await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn repeated_acquire_after_drop_succeeds() {
        let registry = PeerLockRegistry::new();
        {
            let _g = registry.acquire("carol.2").await;
        }
        let _g2 = registry.acquire("carol.2").await;
    }
}

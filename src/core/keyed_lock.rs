// Keyed Locks - per-entity serialization of in-flight optimistic mutations
// Two mutations on the same key run one after the other; different keys never wait on each other

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Debug, Default, Clone)]
pub struct KeyedLocks {
    table: LockTable,
}

/// Held for the whole lifetime of one mutation. Dropping it releases the key.
#[derive(Debug)]
pub struct KeyGuard {
    key: String,
    table: LockTable,
    _guard: OwnedMutexGuard<()>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other mutation holds `key`, then take it
    pub async fn acquire(&self, key: &str) -> KeyGuard {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        if lock.try_lock().is_err() {
            debug!("Mutation on {} queued behind an in-flight mutation", key);
        }

        let guard = lock.lock_owned().await;
        KeyGuard {
            key: key.to_string(),
            table: Arc::clone(&self.table),
            _guard: guard,
        }
    }

    /// Number of keys currently held or waited on
    pub fn active_keys(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the table and this guard reference the mutex: nobody is waiting.
        let idle = table
            .get(&self.key)
            .map(|lock| Arc::strong_count(lock) <= 2)
            .unwrap_or(false);
        if idle {
            table.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = KeyedLocks::new();
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = locks.clone();
            let running = Arc::clone(&running);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("post:p1").await;
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let first = locks.acquire("post:p1").await;
        let second = tokio::time::timeout(Duration::from_millis(50), locks.acquire("post:p2"))
            .await
            .expect("distinct keys must not wait");

        assert_eq!(first.key(), "post:p1");
        assert_eq!(second.key(), "post:p2");
        assert_eq!(locks.active_keys(), 2);

        drop(first);
        drop(second);
        assert_eq!(locks.active_keys(), 0);
    }
}

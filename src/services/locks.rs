//! Per-file mutual exclusion.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Registry = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Async locks keyed by file identity. Entries are dropped once nobody holds
/// or waits for them.
#[derive(Default, Clone)]
pub struct KeyedLocks {
    registry: Registry,
}

/// Held lock; releases on drop
pub struct KeyedGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    registry: Registry,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let mutex = {
            let mut registry = self.registry.lock();
            registry.entry(key.to_string()).or_default().clone()
        };
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            key: key.to_string(),
            guard: Some(guard),
            registry: self.registry.clone(),
        }
    }

    /// Keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut registry = self.registry.lock();
        // The registry's own reference is the only one left: no holder, no waiter.
        if registry
            .get(&self.key)
            .is_some_and(|m| Arc::strong_count(m) == 1)
        {
            registry.remove(&self.key);
        }
    }
}

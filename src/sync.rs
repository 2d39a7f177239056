use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Serializes tasks that share a key while letting tasks with different keys
/// run concurrently.
///
/// Lock handout per key is FIFO, so effects of two stanzas for the same chat
/// happen in arrival order. A table entry lives only while some task holds
/// or awaits its lock; the last guard out prunes it, so the table is bounded
/// by current activity rather than by every chat ever seen.
#[derive(Default)]
pub struct KeyedMutex {
    locks: LockTable,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> KeyedGuard {
        let lock = {
            let mut locks = self.locks.lock().expect("keyed lock table poisoned");
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        KeyedGuard {
            key: key.to_string(),
            table: self.locks.clone(),
            guard: Some(guard),
        }
    }
}

/// Holds one key locked. Dropping it releases the key and removes the table
/// entry once nobody else holds or awaits the same key.
pub struct KeyedGuard {
    key: String,
    table: LockTable,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        // Release the key before inspecting the table; a waiter's own clone
        // of the entry keeps it alive past this point.
        self.guard.take();
        let mut locks = self.table.lock().expect("keyed lock table poisoned");
        if let Some(entry) = locks.get(&self.key)
            && Arc::strong_count(entry) == 1
        {
            locks.remove(&self.key);
        }
    }
}

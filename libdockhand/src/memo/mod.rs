//! Per-key memoisation of async results.
//!
//! A [`Memo`] stores one lazily-initialised cell per key. Concurrent callers
//! asking for the same key wait on the same in-flight computation and share
//! its result. Failed computations are not stored, so the next caller
//! retries.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;


/// A single-flight result cache keyed by `K`.
#[derive(Debug)]
pub struct Memo<K, V> {
    cells: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Default for Memo<K, V> {
    fn default() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> Memo<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an empty memo.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored value for `key`, or runs `init` to produce it.
    ///
    /// Only one `init` runs per key at a time; the others await its outcome.
    pub async fn get_or_try_init<E, F, Fut>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
            cells.entry(key).or_default().clone()
        };
        cell.get_or_try_init(init).await.cloned()
    }

    /// Returns the stored value for `key`, if one has been computed.
    pub fn get(&self, key: &K) -> Option<V> {
        let cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        cells.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Forgets every stored value.
    pub fn clear(&self) {
        self.cells
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

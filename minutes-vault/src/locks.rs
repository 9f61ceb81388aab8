//! Per-path advisory write locks
//!
//! A duplicate-id correction and a routine update can legitimately target
//! the same path within one run, so every create/modify acquires an
//! exclusive lock keyed by normalized path. Guards release on drop, which
//! covers every exit path including errors.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-path mutexes
#[derive(Clone, Default)]
pub struct PathLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the exclusive lock for a path, waiting if another writer
    /// holds it.
    pub async fn lock(&self, path: &str) -> OwnedMutexGuard<()> {
        let key = normalize(path);
        let entry = {
            let mut map = self.inner.lock().await;
            map.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        entry.lock_owned().await
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_string()
}

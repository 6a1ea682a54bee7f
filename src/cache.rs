//! FileHandlerCache
//!
//! Process-wide mapping from virtual mount path to a live handler, with
//! reference counting. The cache mutex serialises insert/lookup/erase
//! only; a handler's own read path runs outside of it, so a slow
//! convolution never blocks an unrelated `stat_by_filename`.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::CacheError;
use crate::handler::{FileHandler, Stat};

struct Entry {
    handler: Arc<dyn FileHandler>,
    refcount: usize,
}

/// Reference to a live handler, handed out by `get_or_create`. Dropping
/// this does not close the handler — callers drive `FileHandlerCache::close`
/// explicitly, matching the external façade's refcount-decrement contract
/// rather than tying lifetime to a Rust guard's `Drop`.
pub struct HandlerRef {
    pub path: String,
    pub handler: Arc<dyn FileHandler>,
}

/// The process-wide open-handler map. Constructed once at `initialize()`
/// time as an explicit singleton rather than ambient global state, and
/// threaded through the façade rather than reached for as a global.
#[derive(Default)]
pub struct FileHandlerCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl FileHandlerCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the already-open handler for `fs_path` if live, bumping its
    /// refcount. Otherwise calls `build` to construct one (outside the
    /// cache mutex is not possible here — `build` for this crate is cheap
    /// relative to steady-state reads, all of which happen through the
    /// returned handler, not through this method) and inserts it with an
    /// initial refcount of 1.
    pub fn get_or_create<F>(&self, fs_path: &str, build: F) -> Result<HandlerRef, i32>
    where
        F: FnOnce() -> Result<Arc<dyn FileHandler>, i32>,
    {
        let mut guard = self.lock();
        if let Some(entry) = guard.get_mut(fs_path) {
            entry.refcount += 1;
            return Ok(HandlerRef {
                path: fs_path.to_string(),
                handler: entry.handler.clone(),
            });
        }

        // Build while still holding the map lock: two threads racing to
        // open the same fresh path must not both construct a handler, or
        // refcounting below would double-count the winner's entry.
        let handler = build()?;
        guard.insert(
            fs_path.to_string(),
            Entry {
                handler: handler.clone(),
                refcount: 1,
            },
        );
        log::info!(target: "cache", "opened handler for {fs_path}");
        Ok(HandlerRef {
            path: fs_path.to_string(),
            handler,
        })
    }

    /// Delegates to the live handler's `stat` if `fs_path` is open;
    /// otherwise signals `CacheError::NotOpen` so the caller falls back to
    /// a direct underlying-file stat.
    pub fn stat_by_filename(&self, fs_path: &str) -> Result<Stat, CacheError> {
        let guard = self.lock();
        let entry = guard
            .get(fs_path)
            .ok_or_else(|| CacheError::NotOpen(fs_path.to_string()))?;
        entry
            .handler
            .stat()
            .map_err(|_| CacheError::NotOpen(fs_path.to_string()))
    }

    /// Decrements the refcount for `fs_path`; at zero, closes the handler
    /// and removes the map entry. Race-safe against a concurrent open of
    /// the same key since both operations hold the same map mutex.
    pub fn close(&self, fs_path: &str) {
        let mut guard = self.lock();
        let Some(entry) = guard.get_mut(fs_path) else {
            return;
        };
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount == 0 {
            let entry = guard.remove(fs_path).expect("just looked up above");
            entry.handler.close();
            log::info!(target: "cache", "closed handler for {fs_path}");
        }
    }

    /// Number of distinct open paths. Test/diagnostic use only.
    pub fn open_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

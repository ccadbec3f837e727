//! Lifetimeless object pools.
//!
//! A [`Pool`] amortizes allocations across connection lifetimes: managers
//! keep connection objects on one, and the deflate transform keeps its
//! scratch buffers on another. Pools must tolerate concurrent acquire and
//! release from any task.

use std::sync::Mutex;

/// A free list of reusable objects guarded by a mutex.
///
/// `acquire_or_else` pops an object or builds a fresh one; `release` pushes
/// it back once the caller has reset it. Objects left on the pool are freed
/// on drop.
#[derive(Debug)]
pub struct Pool<T> {
    items: Mutex<Vec<T>>,
}

impl<T> Pool<T> {
    /// Create an empty pool.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    /// Pop a pooled object, or build one with `init` when the pool is empty.
    pub fn acquire_or_else(&self, init: impl FnOnce() -> T) -> T {
        let pooled = match self.items.lock() {
            Ok(mut items) => items.pop(),
            Err(_) => None,
        };
        pooled.unwrap_or_else(init)
    }

    /// Return an object to the pool.
    ///
    /// A poisoned pool drops the object instead; the pool is an allocation
    /// cache, never the owner of live state.
    pub fn release(&self, item: T) {
        if let Ok(mut items) = self.items.lock() {
            items.push(item);
        }
    }

    /// Number of idle objects currently pooled.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

//! Shared byte-buffer pool for bulk streaming
//!
//! Export streams hand out one buffer per HTTP chunk. Recycling them
//! through a pool keeps a steady-state export at a handful of allocations
//! regardless of row count. Returning buffers is a courtesy contract:
//! forgotten returns merely cost fresh allocations.

use std::sync::{Arc, Mutex, RwLock};

/// Default per-buffer capacity. Matches the server's preferred chunk size.
pub const POOL_BUFFER_CAPACITY: usize = 65524;

/// Upper bound on idle buffers retained by a pool
const MAX_IDLE_BUFFERS: usize = 64;

/// Concurrent pool of fixed-capacity byte buffers
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    buffer_capacity: usize,
}

impl BufferPool {
    /// Create a pool handing out buffers of the given capacity
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            buffer_capacity,
        }
    }

    /// Per-buffer capacity of this pool
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Take an empty buffer, recycled if one is idle
    pub fn get(&self) -> Vec<u8> {
        let recycled = self.idle.lock().expect("buffer pool poisoned").pop();
        recycled.unwrap_or_else(|| Vec::with_capacity(self.buffer_capacity))
    }

    /// Return a buffer for reuse. Oversized one-off allocations and
    /// overflow beyond the idle bound are simply dropped.
    pub fn put(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() < self.buffer_capacity {
            return;
        }
        buffer.clear();
        let mut idle = self.idle.lock().expect("buffer pool poisoned");
        if idle.len() < MAX_IDLE_BUFFERS {
            idle.push(buffer);
        }
    }

    /// Number of idle buffers currently held
    pub fn idle_len(&self) -> usize {
        self.idle.lock().expect("buffer pool poisoned").len()
    }
}

static GLOBAL_POOL: RwLock<Option<Arc<BufferPool>>> = RwLock::new(None);

/// The process-wide pool shared by all bulk streams, created on first use
pub fn global_pool() -> Arc<BufferPool> {
    if let Some(pool) = GLOBAL_POOL.read().expect("pool lock poisoned").as_ref() {
        return Arc::clone(pool);
    }
    let mut slot = GLOBAL_POOL.write().expect("pool lock poisoned");
    Arc::clone(slot.get_or_insert_with(|| Arc::new(BufferPool::new(POOL_BUFFER_CAPACITY))))
}

/// Discard the process-wide pool so the next use starts fresh. Intended
/// for tests.
pub fn reset_global_pool() {
    *GLOBAL_POOL.write().expect("pool lock poisoned") = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_hands_out_capacity() {
        let pool = BufferPool::new(1024);
        let buffer = pool.get();
        assert!(buffer.is_empty());
        assert!(buffer.capacity() >= 1024);
    }

    #[test]
    fn test_put_recycles() {
        let pool = BufferPool::new(64);
        let mut buffer = pool.get();
        buffer.extend_from_slice(b"leftover");
        pool.put(buffer);
        assert_eq!(pool.idle_len(), 1);

        // Recycled buffers come back cleared.
        let buffer = pool.get();
        assert!(buffer.is_empty());
        assert_eq!(pool.idle_len(), 0);
    }

    #[test]
    fn test_undersized_buffers_are_dropped() {
        let pool = BufferPool::new(1024);
        pool.put(Vec::with_capacity(8));
        assert_eq!(pool.idle_len(), 0);
    }

    #[test]
    fn test_global_pool_is_shared_and_resettable() {
        reset_global_pool();
        let a = global_pool();
        let b = global_pool();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.buffer_capacity(), POOL_BUFFER_CAPACITY);

        reset_global_pool();
        let c = global_pool();
        assert!(!Arc::ptr_eq(&a, &c));
    }
}

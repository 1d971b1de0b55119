//! Bounded free-list of reusable byte buffers used by `redo_log::RedoLog`
//! to amortize per-record framing allocation on the hot commit path
//! (spec.md §4.1).
//!
//! Grounded on the teacher's channel-first concurrency idiom -- `flume` is
//! used throughout `request_manager.rs` for every producer/consumer
//! hand-off in the crate, so the free-list is built the same way: a
//! bounded `flume` channel holding recycled buffers, instead of a custom
//! lock-free stack. `try_recv`/`try_send` make both `acquire` and
//! `release` non-blocking, matching the spec's "no locking beyond a
//! lock-free queue; correctness does not depend on pool hits".

const DEFAULT_MAX_BUFFER_CAPACITY: usize = 4 * 1024 * 1024;
const DEFAULT_POOL_SIZE: usize = 5;

pub struct WriteBufferPool {
    free: flume::Sender<Vec<u8>>,
    reuse: flume::Receiver<Vec<u8>>,
    max_buffer_capacity: usize,
}

impl WriteBufferPool {
    pub fn new(pool_size: usize, max_buffer_capacity: usize) -> Self {
        let (free, reuse) = flume::bounded(pool_size);

        Self {
            free,
            reuse,
            max_buffer_capacity,
        }
    }

    /// A cleared buffer, either recycled from the pool or freshly
    /// allocated -- callers cannot tell which, and should not care.
    pub fn acquire(&self) -> Vec<u8> {
        match self.reuse.try_recv() {
            Ok(mut buf) => {
                buf.clear();
                buf
            }
            Err(_) => Vec::new(),
        }
    }

    /// Returns a buffer to the pool iff its capacity is within the cap and
    /// the pool is not full; otherwise the buffer is dropped (spec.md
    /// §4.1).
    pub fn release(&self, buf: Vec<u8>) {
        if buf.capacity() > self.max_buffer_capacity {
            return;
        }

        let _ = self.free.try_send(buf);
    }

    pub fn pool_size(&self) -> usize {
        self.free.capacity().unwrap_or(0)
    }
}

impl Default for WriteBufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE, DEFAULT_MAX_BUFFER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_without_prior_release_allocates_fresh() {
        let pool = WriteBufferPool::default();
        let buf = pool.acquire();
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn released_buffer_is_recycled_and_cleared() {
        let pool = WriteBufferPool::new(2, DEFAULT_MAX_BUFFER_CAPACITY);

        let mut buf = pool.acquire();
        buf.extend_from_slice(b"hello");
        let capacity_before = buf.capacity();

        pool.release(buf);

        let recycled = pool.acquire();
        assert_eq!(recycled.len(), 0);
        assert!(recycled.capacity() >= capacity_before);
    }

    #[test]
    fn oversized_buffer_is_dropped_not_pooled() {
        let pool = WriteBufferPool::new(2, 8);

        let big = Vec::with_capacity(1024);
        pool.release(big);

        // Nothing was pooled; acquire falls back to a fresh allocation.
        let buf = pool.acquire();
        assert_eq!(buf.capacity(), 0);
    }

    #[test]
    fn pool_does_not_grow_past_its_configured_size() {
        let pool = WriteBufferPool::new(1, DEFAULT_MAX_BUFFER_CAPACITY);

        pool.release(Vec::new());
        pool.release(Vec::new()); // pool already has one buffer, this is dropped

        assert!(pool.reuse.try_recv().is_ok());
        assert!(pool.reuse.try_recv().is_err());
    }
}

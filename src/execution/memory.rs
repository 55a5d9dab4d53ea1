//! Memory accounting for accumulator state and output columns

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Memory pool for tracking memory usage
///
/// The pool only counts bytes. Reservations are owned values that hand their
/// bytes back when dropped, so an operator releases everything it holds by
/// dropping its accumulators.
#[derive(Debug)]
pub struct MemoryPool {
    /// Maximum memory allowed
    max_memory: usize,
    /// Current memory usage
    used: AtomicUsize,
    /// High-water mark of `used`
    peak: AtomicUsize,
}

impl MemoryPool {
    pub fn new(max_memory: usize) -> Self {
        Self {
            max_memory,
            used: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Create a pool with no limit
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Try to reserve `size` bytes, failing if the limit would be exceeded
    pub fn try_allocate(self: &Arc<Self>, size: usize) -> Option<MemoryReservation> {
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            let new_usage = current.checked_add(size)?;
            if new_usage > self.max_memory {
                return None;
            }

            match self.used.compare_exchange_weak(
                current,
                new_usage,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.peak.fetch_max(new_usage, Ordering::Relaxed);
                    return Some(MemoryReservation {
                        pool: Arc::clone(self),
                        size,
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Current memory usage
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    /// Highest usage observed since creation
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Maximum memory
    pub fn max(&self) -> usize {
        self.max_memory
    }

    /// Available memory
    pub fn available(&self) -> usize {
        self.max_memory.saturating_sub(self.used())
    }

    fn release(&self, size: usize) {
        self.used.fetch_sub(size, Ordering::SeqCst);
    }
}

/// RAII guard for memory reservation
pub struct MemoryReservation {
    pool: SharedMemoryPool,
    size: usize,
}

impl MemoryReservation {
    /// Size of this reservation
    pub fn size(&self) -> usize {
        self.size
    }
}

impl fmt::Debug for MemoryReservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryReservation")
            .field("size", &self.size)
            .finish()
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        self.pool.release(self.size);
    }
}

/// Shared memory pool
pub type SharedMemoryPool = Arc<MemoryPool>;

/// Create a shared memory pool
pub fn create_memory_pool(max_memory: usize) -> SharedMemoryPool {
    Arc::new(MemoryPool::new(max_memory))
}

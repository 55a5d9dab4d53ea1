//! Slice allocator backing the sketch holders
//!
//! Every slice is zero-initialized, charged to the shared [`MemoryPool`] and
//! exclusively owned by whoever requested it. Nothing is returned early: the
//! bytes go back to the pool when the owning holder, and therefore the
//! operator, is dropped.
//!
//! [`MemoryPool`]: super::MemoryPool

use crate::error::{NdvError, Result};
use crate::execution::{MemoryReservation, SharedMemoryPool};
use log::{trace, warn};
use std::cell::Cell;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// A zeroed, owned byte region charged against a memory pool
pub struct MemorySlice {
    data: Box<[u8]>,
    _reservation: MemoryReservation,
}

impl MemorySlice {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Deref for MemorySlice {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for MemorySlice {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl AsRef<[u8]> for MemorySlice {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl AsMut<[u8]> for MemorySlice {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for MemorySlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySlice").field("len", &self.len()).finish()
    }
}

/// Per-fragment allocator handle
///
/// Not `Sync`: one handle serves exactly one pipeline fragment. Fragments
/// running in parallel each get their own handle over the same pool.
pub struct SlabAllocator {
    pool: SharedMemoryPool,
    slices_granted: Cell<usize>,
    bytes_granted: Cell<usize>,
}

impl SlabAllocator {
    pub fn new(pool: SharedMemoryPool) -> Self {
        Self {
            pool,
            slices_granted: Cell::new(0),
            bytes_granted: Cell::new(0),
        }
    }

    /// Request a zero-initialized slice of exactly `len` bytes
    pub fn allocate_slice(&self, len: usize) -> Result<MemorySlice> {
        if len == 0 {
            return Err(NdvError::InvalidArgument(
                "cannot allocate an empty slice".to_string(),
            ));
        }

        let reservation = self.pool.try_allocate(len).ok_or_else(|| {
            warn!(
                "Memory pool exhausted: requested {} bytes, {} of {} in use",
                len,
                self.pool.used(),
                self.pool.max()
            );
            NdvError::ResourceExhausted(format!(
                "failed to reserve {} bytes ({} available)",
                len,
                self.pool.available()
            ))
        })?;

        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|e| {
            NdvError::ResourceExhausted(format!("failed to allocate {} bytes: {}", len, e))
        })?;
        data.resize(len, 0u8);

        self.slices_granted.set(self.slices_granted.get() + 1);
        self.bytes_granted.set(self.bytes_granted.get() + len);
        trace!("Granted slice of {} bytes", len);

        Ok(MemorySlice {
            data: data.into_boxed_slice(),
            _reservation: reservation,
        })
    }

    /// Number of slices handed out by this handle
    pub fn slices_granted(&self) -> usize {
        self.slices_granted.get()
    }

    /// Total bytes handed out by this handle
    pub fn bytes_granted(&self) -> usize {
        self.bytes_granted.get()
    }

    pub fn pool(&self) -> &SharedMemoryPool {
        &self.pool
    }
}

impl fmt::Debug for SlabAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlabAllocator")
            .field("slices_granted", &self.slices_granted.get())
            .field("bytes_granted", &self.bytes_granted.get())
            .field("pool_used", &self.pool.used())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::create_memory_pool;

    #[test]
    fn test_slices_are_zeroed_and_charged() {
        let pool = create_memory_pool(1024);
        let allocator = SlabAllocator::new(pool.clone());

        let mut slice = allocator.allocate_slice(100).unwrap();
        assert_eq!(slice.len(), 100);
        assert!(slice.iter().all(|b| *b == 0));
        assert_eq!(pool.used(), 100);

        slice[5] = 42;
        assert_eq!(slice.as_ref()[5], 42);

        assert_eq!(allocator.slices_granted(), 1);
        assert_eq!(allocator.bytes_granted(), 100);

        drop(slice);
        assert_eq!(pool.used(), 0);
        // Counters describe what was granted, not what is live
        assert_eq!(allocator.bytes_granted(), 100);
    }

    #[test]
    fn test_exhausted_pool() {
        let pool = create_memory_pool(150);
        let allocator = SlabAllocator::new(pool.clone());

        let _first = allocator.allocate_slice(100).unwrap();
        let err = allocator.allocate_slice(100).unwrap_err();
        assert!(matches!(err, NdvError::ResourceExhausted(_)));
        assert_eq!(pool.used(), 100);
        assert_eq!(allocator.slices_granted(), 1);
    }

    #[test]
    fn test_empty_slice_rejected() {
        let allocator = SlabAllocator::new(create_memory_pool(10));
        assert!(matches!(
            allocator.allocate_slice(0),
            Err(NdvError::InvalidArgument(_))
        ));
    }
}

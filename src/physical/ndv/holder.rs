//! Fixed-capacity blocks of sketch slots
//!
//! A holder is the unit of growth: the accumulator appends whole holders and
//! never resizes one. Both implementations initialize all slots up front.

use crate::error::{NdvError, Result};
use crate::execution::{MemorySlice, MemoryStrategy, SlabAllocator};
use crate::sketch::{HllSketch, SketchLayout};
use std::fmt;

/// Storage for the sketches of one batch of groups
pub trait BatchHolder: Sized + Send + fmt::Debug {
    /// Strategy this holder implements
    const STRATEGY: MemoryStrategy;

    /// Allocate and initialize `capacity` empty sketches
    fn try_new(capacity: usize, allocator: &SlabAllocator, layout: SketchLayout) -> Result<Self>;

    /// Number of slots, fixed at construction
    fn slot_count(&self) -> usize;

    /// Read-only view of one slot
    fn sketch(&self, index: usize) -> Result<HllSketch<&[u8]>>;

    /// Mutable view of one slot
    fn sketch_mut(&mut self, index: usize) -> Result<HllSketch<&mut [u8]>>;

    /// Bytes obtained from the allocator
    fn allocated_bytes(&self) -> usize;
}

/// One allocator slice and one owned sketch per slot
pub struct InlineBatchHolder {
    sketches: Vec<HllSketch<MemorySlice>>,
    sketch_bytes: usize,
}

impl BatchHolder for InlineBatchHolder {
    const STRATEGY: MemoryStrategy = MemoryStrategy::Inline;

    fn try_new(capacity: usize, allocator: &SlabAllocator, layout: SketchLayout) -> Result<Self> {
        let sketch_bytes = layout.max_serialized_size();
        let mut sketches = Vec::new();
        sketches.try_reserve_exact(capacity).map_err(|e| {
            NdvError::ResourceExhausted(format!("cannot hold {} inline sketches: {}", capacity, e))
        })?;
        for _ in 0..capacity {
            let slice = allocator.allocate_slice(sketch_bytes)?;
            sketches.push(HllSketch::create_in(layout, slice)?);
        }
        Ok(Self {
            sketches,
            sketch_bytes,
        })
    }

    fn slot_count(&self) -> usize {
        self.sketches.len()
    }

    #[inline]
    fn sketch(&self, index: usize) -> Result<HllSketch<&[u8]>> {
        self.sketches
            .get(index)
            .map(|sketch| sketch.as_view())
            .ok_or_else(|| NdvError::invalid_index("batch holder slot", index, self.sketches.len()))
    }

    #[inline]
    fn sketch_mut(&mut self, index: usize) -> Result<HllSketch<&mut [u8]>> {
        let slots = self.sketches.len();
        self.sketches
            .get_mut(index)
            .map(|sketch| sketch.as_view_mut())
            .ok_or_else(|| NdvError::invalid_index("batch holder slot", index, slots))
    }

    fn allocated_bytes(&self) -> usize {
        self.sketches.len() * self.sketch_bytes
    }
}

impl fmt::Debug for InlineBatchHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineBatchHolder")
            .field("slots", &self.sketches.len())
            .field("sketch_bytes", &self.sketch_bytes)
            .finish()
    }
}

/// One allocator slice per holder; slot `i` is the image at `i * sketch_bytes`
pub struct PackedBatchHolder {
    slice: MemorySlice,
    capacity: usize,
    sketch_bytes: usize,
}

impl PackedBatchHolder {
    #[inline]
    fn range(&self, index: usize) -> Result<std::ops::Range<usize>> {
        if index >= self.capacity {
            return Err(NdvError::invalid_index(
                "batch holder slot",
                index,
                self.capacity,
            ));
        }
        let start = index * self.sketch_bytes;
        Ok(start..start + self.sketch_bytes)
    }
}

impl BatchHolder for PackedBatchHolder {
    const STRATEGY: MemoryStrategy = MemoryStrategy::Packed;

    fn try_new(capacity: usize, allocator: &SlabAllocator, layout: SketchLayout) -> Result<Self> {
        let sketch_bytes = layout.max_serialized_size();
        let total = capacity.checked_mul(sketch_bytes).ok_or_else(|| {
            NdvError::ResourceExhausted(format!(
                "{} sketches of {} bytes overflow a single slice",
                capacity, sketch_bytes
            ))
        })?;

        let mut slice = allocator.allocate_slice(total)?;
        for image in slice.chunks_exact_mut(sketch_bytes) {
            HllSketch::create_in(layout, image)?;
        }

        Ok(Self {
            slice,
            capacity,
            sketch_bytes,
        })
    }

    fn slot_count(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn sketch(&self, index: usize) -> Result<HllSketch<&[u8]>> {
        let range = self.range(index)?;
        HllSketch::reopen(&self.slice[range])
    }

    #[inline]
    fn sketch_mut(&mut self, index: usize) -> Result<HllSketch<&mut [u8]>> {
        let range = self.range(index)?;
        HllSketch::reopen(&mut self.slice[range])
    }

    fn allocated_bytes(&self) -> usize {
        self.slice.len()
    }
}

impl fmt::Debug for PackedBatchHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackedBatchHolder")
            .field("slots", &self.capacity)
            .field("sketch_bytes", &self.sketch_bytes)
            .finish()
    }
}

//! Growable per-group sketch state
//!
//! Ordinal `o` lives in holder `o / B` at slot `o % B`. Holders are only ever
//! appended, so that mapping never changes once a group has been seen.

use super::holder::BatchHolder;
use crate::error::{NdvError, Result};
use crate::execution::{MemoryStrategy, NdvConfig, SlabAllocator};
use crate::sketch::{hash_value, HllSketch, SketchLayout};
use log::debug;
use std::fmt;
use std::hash::Hash;

/// Sketch state for every group of one hash aggregation
pub struct NdvAccumulator<H> {
    holders: Vec<H>,
    batch_capacity: usize,
    layout: SketchLayout,
    allocator: SlabAllocator,
}

impl<H: BatchHolder> NdvAccumulator<H> {
    /// Create an accumulator with no holders
    pub fn try_new(config: &NdvConfig, allocator: SlabAllocator) -> Result<Self> {
        config.validate()?;
        if config.memory_strategy != H::STRATEGY {
            return Err(NdvError::InvalidArgument(format!(
                "configured for {:?} sketches but built with {:?} holders",
                config.memory_strategy,
                H::STRATEGY
            )));
        }
        Ok(Self {
            holders: Vec::new(),
            batch_capacity: config.batch_capacity,
            layout: SketchLayout::try_new(config.lg_k, config.hll_type)?,
            allocator,
        })
    }

    /// Ensure at least `required_capacity` groups have a slot
    ///
    /// Asking for no more than the current capacity changes nothing. New
    /// holders are all built before any is appended, so a failed allocation
    /// leaves the accumulator exactly as it was.
    pub fn grow(&mut self, required_capacity: usize) -> Result<()> {
        let current = self.capacity();
        if current >= required_capacity {
            return Ok(());
        }

        let required_holders = required_capacity.div_ceil(self.batch_capacity);
        let additional = required_holders - self.holders.len();
        debug!(
            "Growing {:?} NDV accumulator from {} to {} batches ({} groups requested)",
            H::STRATEGY,
            self.holders.len(),
            required_holders,
            required_capacity
        );

        let mut fresh = Vec::new();
        fresh
            .try_reserve_exact(additional)
            .and_then(|_| self.holders.try_reserve_exact(additional))
            .map_err(|e| {
                NdvError::ResourceExhausted(format!(
                    "cannot track {} more batch holders: {}",
                    additional, e
                ))
            })?;
        for _ in 0..additional {
            fresh.push(H::try_new(
                self.batch_capacity,
                &self.allocator,
                self.layout,
            )?);
        }
        self.holders.extend(fresh);
        Ok(())
    }

    /// Groups that currently have a slot
    pub fn capacity(&self) -> usize {
        self.holders.len().saturating_mul(self.batch_capacity)
    }

    pub fn num_batches(&self) -> usize {
        self.holders.len()
    }

    pub fn batch_capacity(&self) -> usize {
        self.batch_capacity
    }

    pub fn layout(&self) -> SketchLayout {
        self.layout
    }

    pub fn strategy(&self) -> MemoryStrategy {
        H::STRATEGY
    }

    pub fn allocator(&self) -> &SlabAllocator {
        &self.allocator
    }

    /// Bytes held by all holders
    pub fn allocated_bytes(&self) -> usize {
        self.holders.iter().map(|h| h.allocated_bytes()).sum()
    }

    /// `(batch_index, offset)` of an ordinal
    #[inline]
    pub fn slot(&self, ordinal: usize) -> (usize, usize) {
        (ordinal / self.batch_capacity, ordinal % self.batch_capacity)
    }

    pub fn holder(&self, batch_index: usize) -> Result<&H> {
        self.holders
            .get(batch_index)
            .ok_or_else(|| NdvError::invalid_index("accumulator batch", batch_index, self.holders.len()))
    }

    /// Add a value to the sketch of group `ordinal`
    #[inline]
    pub fn insert_value<T: Hash + ?Sized>(&mut self, ordinal: usize, value: &T) -> Result<()> {
        self.insert_hash(ordinal, hash_value(value))
    }

    /// Add a pre-hashed value to the sketch of group `ordinal`
    #[inline]
    pub fn insert_hash(&mut self, ordinal: usize, hash: u64) -> Result<()> {
        let (batch_index, offset) = self.slot(ordinal);
        let batches = self.holders.len();
        let holder = self
            .holders
            .get_mut(batch_index)
            .ok_or_else(|| NdvError::invalid_index("accumulator batch", batch_index, batches))?;
        holder.sketch_mut(offset)?.update_hash(hash);
        Ok(())
    }

    /// Read-only view of the sketch of group `ordinal`
    pub fn sketch(&self, ordinal: usize) -> Result<HllSketch<&[u8]>> {
        let (batch_index, offset) = self.slot(ordinal);
        self.holder(batch_index)?.sketch(offset)
    }

    /// Current distinct-count estimate of group `ordinal`
    pub fn estimate(&self, ordinal: usize) -> Result<f64> {
        Ok(self.sketch(ordinal)?.estimate())
    }
}

impl<H: BatchHolder> fmt::Debug for NdvAccumulator<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NdvAccumulator")
            .field("strategy", &H::STRATEGY)
            .field("batches", &self.holders.len())
            .field("batch_capacity", &self.batch_capacity)
            .field("layout", &self.layout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::create_memory_pool;
    use crate::physical::ndv::{InlineBatchHolder, PackedBatchHolder};

    fn accumulator<H: BatchHolder>(batch_capacity: usize) -> NdvAccumulator<H> {
        let config = NdvConfig::new()
            .with_batch_capacity(batch_capacity)
            .with_lg_k(4)
            .with_memory_strategy(H::STRATEGY);
        let allocator = SlabAllocator::new(create_memory_pool(usize::MAX));
        NdvAccumulator::try_new(&config, allocator).unwrap()
    }

    fn holder_addresses<H: BatchHolder>(acc: &NdvAccumulator<H>) -> Vec<*const H> {
        (0..acc.num_batches())
            .map(|i| acc.holder(i).unwrap() as *const H)
            .collect()
    }

    #[test]
    fn test_grow_counts_holders() {
        let mut acc = accumulator::<PackedBatchHolder>(1000);
        assert_eq!(acc.num_batches(), 0);

        acc.grow(1500).unwrap();
        assert_eq!(acc.num_batches(), 2);

        acc.grow(1000).unwrap();
        assert_eq!(acc.num_batches(), 2);

        acc.grow(2001).unwrap();
        assert_eq!(acc.num_batches(), 3);
        assert_eq!(acc.capacity(), 3000);
    }

    #[test]
    fn test_grow_keeps_existing_holders_and_contents() {
        let mut acc = accumulator::<InlineBatchHolder>(10);
        acc.grow(20).unwrap();
        acc.insert_value(3, "a").unwrap();
        acc.insert_value(15, "b").unwrap();
        acc.insert_value(15, "c").unwrap();

        let before = holder_addresses(&acc);
        let allocated = acc.allocator().slices_granted();

        // Shrinking or equal requests are no-ops
        acc.grow(5).unwrap();
        acc.grow(20).unwrap();
        assert_eq!(holder_addresses(&acc), before);
        assert_eq!(acc.allocator().slices_granted(), allocated);

        // Vec growth may move the holder values, but the sketches inside
        // are the same allocations and keep their data
        acc.grow(45).unwrap();
        assert_eq!(acc.num_batches(), 5);
        assert_eq!(acc.estimate(3).unwrap().round(), 1.0);
        assert_eq!(acc.estimate(15).unwrap().round(), 2.0);
        assert!(acc.sketch(44).unwrap().is_empty());
    }

    #[test]
    fn test_slot_mapping_is_stable() {
        let mut acc = accumulator::<PackedBatchHolder>(7);
        acc.grow(10).unwrap();
        let early: Vec<_> = (0..10).map(|o| acc.slot(o)).collect();

        acc.grow(100).unwrap();
        let late: Vec<_> = (0..10).map(|o| acc.slot(o)).collect();
        assert_eq!(early, late);

        let mut seen = std::collections::HashSet::new();
        for ordinal in 0..100 {
            assert!(seen.insert(acc.slot(ordinal)));
        }
        assert_eq!(acc.slot(13), (1, 6));
    }

    #[test]
    fn test_insert_out_of_range() {
        let mut acc = accumulator::<PackedBatchHolder>(4);
        let err = acc.insert_value(0, &1i64).unwrap_err();
        assert!(matches!(err, NdvError::InvalidIndex { .. }));

        acc.grow(4).unwrap();
        acc.insert_value(3, &1i64).unwrap();
        let err = acc.insert_value(4, &1i64).unwrap_err();
        assert!(matches!(
            err,
            NdvError::InvalidIndex { index: 1, limit: 1, .. }
        ));
        assert_eq!(acc.num_batches(), 1);
        assert!(acc.estimate(4).is_err());
    }

    #[test]
    fn test_failed_grow_leaves_state_unchanged() {
        let config = NdvConfig::new()
            .with_batch_capacity(4)
            .with_lg_k(4)
            .with_memory_strategy(MemoryStrategy::Packed);
        let holder_bytes = 4 * SketchLayout::try_new(4, config.hll_type)
            .unwrap()
            .max_serialized_size();
        let pool = create_memory_pool(holder_bytes * 2);
        let mut acc =
            NdvAccumulator::<PackedBatchHolder>::try_new(&config, SlabAllocator::new(pool.clone()))
                .unwrap();

        acc.grow(4).unwrap();
        acc.insert_value(1, "kept").unwrap();

        let err = acc.grow(12).unwrap_err();
        assert!(matches!(err, NdvError::ResourceExhausted(_)));
        assert_eq!(acc.num_batches(), 1);
        assert_eq!(pool.used(), holder_bytes);
        assert_eq!(acc.estimate(1).unwrap().round(), 1.0);
    }

    #[test]
    fn test_unreachable_capacity_is_exhaustion() {
        let mut acc = accumulator::<PackedBatchHolder>(1);
        acc.grow(2).unwrap();
        let err = acc.grow(usize::MAX).unwrap_err();
        assert!(matches!(err, NdvError::ResourceExhausted(_)), "{:?}", err);
        assert_eq!(acc.num_batches(), 2);
        assert_eq!(acc.allocated_bytes(), acc.allocator().pool().used());

        let mut acc = accumulator::<InlineBatchHolder>(usize::MAX);
        let err = acc.grow(1).unwrap_err();
        assert!(matches!(err, NdvError::ResourceExhausted(_)), "{:?}", err);
        assert_eq!(acc.num_batches(), 0);
        assert_eq!(acc.allocator().pool().used(), 0);
    }

    #[test]
    fn test_strategy_mismatch_rejected() {
        let config = NdvConfig::new().with_memory_strategy(MemoryStrategy::Inline);
        let allocator = SlabAllocator::new(create_memory_pool(usize::MAX));
        assert!(NdvAccumulator::<PackedBatchHolder>::try_new(&config, allocator).is_err());
    }
}

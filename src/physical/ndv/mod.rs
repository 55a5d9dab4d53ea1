//! NDV (approximate distinct count) accumulators for hash aggregation
//!
//! The hash table owns group ordinals and decides when to grow; the
//! accumulator keeps one HLL sketch per ordinal and turns a batch of them
//! into a binary column on request.

mod accumulator;
mod holder;
mod input;
mod output;

pub use accumulator::NdvAccumulator;
pub use holder::{BatchHolder, InlineBatchHolder, PackedBatchHolder};
pub use output::{VarBinaryColumn, VariableWidthColumn};

use crate::error::Result;
use crate::execution::{MemoryStrategy, NdvConfig, SlabAllocator};
use arrow::array::Array;
use std::fmt;

/// Accumulator interface driven by the hash aggregation operator
pub trait Accumulator: Send + fmt::Debug {
    /// The hash table can now hold `new_capacity` groups
    fn resized(&mut self, new_capacity: usize) -> Result<()>;

    /// Fold `input[i]` into group `ordinals[i]`
    fn accumulate(&mut self, ordinals: &[u32], input: &dyn Array) -> Result<()>;

    /// Write batch `batch_index` into `column`
    fn output(&self, batch_index: usize, column: &mut dyn VariableWidthColumn) -> Result<()>;

    /// Estimate for one group
    fn estimate(&self, ordinal: usize) -> Result<f64>;

    fn num_batches(&self) -> usize;

    fn allocated_bytes(&self) -> usize;
}

impl<H: BatchHolder> Accumulator for NdvAccumulator<H> {
    fn resized(&mut self, new_capacity: usize) -> Result<()> {
        self.grow(new_capacity)
    }

    fn accumulate(&mut self, ordinals: &[u32], input: &dyn Array) -> Result<()> {
        self.update_batch(ordinals, input)
    }

    fn output(&self, batch_index: usize, column: &mut dyn VariableWidthColumn) -> Result<()> {
        self.flush_batch(batch_index, column)
    }

    fn estimate(&self, ordinal: usize) -> Result<f64> {
        NdvAccumulator::estimate(self, ordinal)
    }

    fn num_batches(&self) -> usize {
        NdvAccumulator::num_batches(self)
    }

    fn allocated_bytes(&self) -> usize {
        NdvAccumulator::allocated_bytes(self)
    }
}

/// Build an accumulator whose holders match `config.memory_strategy`
pub fn create_ndv_accumulator(
    config: &NdvConfig,
    allocator: SlabAllocator,
) -> Result<Box<dyn Accumulator>> {
    Ok(match config.memory_strategy {
        MemoryStrategy::Inline => Box::new(NdvAccumulator::<InlineBatchHolder>::try_new(
            config, allocator,
        )?),
        MemoryStrategy::Packed => Box::new(NdvAccumulator::<PackedBatchHolder>::try_new(
            config, allocator,
        )?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::create_memory_pool;
    use arrow::array::Int64Array;

    #[test]
    fn test_factory_follows_config() {
        for strategy in [MemoryStrategy::Inline, MemoryStrategy::Packed] {
            let config = NdvConfig::new()
                .with_batch_capacity(16)
                .with_lg_k(5)
                .with_memory_strategy(strategy);
            let allocator = SlabAllocator::new(create_memory_pool(usize::MAX));
            let mut acc = create_ndv_accumulator(&config, allocator).unwrap();

            acc.resized(20).unwrap();
            assert_eq!(acc.num_batches(), 2);

            acc.accumulate(&[17, 17, 17], &Int64Array::from(vec![1, 2, 1]))
                .unwrap();
            assert_eq!(acc.estimate(17).unwrap().round(), 2.0);
            assert!(format!("{:?}", acc).contains(&format!("{:?}", strategy)));
        }
    }

    #[test]
    fn test_factory_rejects_invalid_config() {
        let config = NdvConfig::new().with_batch_capacity(0);
        let allocator = SlabAllocator::new(create_memory_pool(usize::MAX));
        assert!(create_ndv_accumulator(&config, allocator).is_err());
    }
}

//! Growable NDV accumulators for columnar hash aggregation
//!
//! Every group found by a hash aggregation gets a HyperLogLog sketch. The
//! sketches are allocated a whole batch at a time as the hash table grows,
//! either one allocation per sketch or packed into one slice per batch, and
//! are serialized batch by batch into Arrow binary columns.

pub mod error;
pub mod execution;
pub mod physical;
pub mod sketch;

// Re-export main types
pub use error::{NdvError, Result};
pub use execution::{ExecutionConfig, MemoryStrategy, NdvConfig, SlabAllocator};
pub use physical::{
    create_ndv_accumulator, Accumulator, BatchHolder, InlineBatchHolder, NdvAccumulator,
    PackedBatchHolder, VarBinaryColumn, VariableWidthColumn,
};
pub use sketch::{HllSketch, HllType, SketchLayout};

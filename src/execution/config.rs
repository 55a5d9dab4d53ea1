//! Accumulator configuration
//!
//! Everything that used to be read from session flags is carried here and
//! passed down at construction time.

use crate::error::{NdvError, Result};
use crate::execution::{create_memory_pool, SharedMemoryPool};
use crate::sketch::{HllType, MAX_LG_K, MIN_LG_K};
use serde::Deserialize;

/// Default number of groups per hash table batch
pub const DEFAULT_BATCH_CAPACITY: usize = 4096;

/// Default HLL accuracy (K = 4096 registers, ~1.6% relative error)
pub const DEFAULT_LG_K: u8 = 12;

/// How the sketches of one batch are laid out in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStrategy {
    /// Every slot owns its own slice and sketch
    Inline,
    /// One slice per batch, slots are fixed-size sub-ranges of it
    #[default]
    Packed,
}

/// Settings of one NDV accumulator
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NdvConfig {
    /// Groups per batch; must match the hash table's batch size
    pub batch_capacity: usize,
    /// log2 of the number of HLL registers
    pub lg_k: u8,
    pub hll_type: HllType,
    pub memory_strategy: MemoryStrategy,
}

impl Default for NdvConfig {
    fn default() -> Self {
        Self {
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            lg_k: DEFAULT_LG_K,
            hll_type: HllType::default(),
            memory_strategy: MemoryStrategy::default(),
        }
    }
}

impl NdvConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_capacity(mut self, batch_capacity: usize) -> Self {
        self.batch_capacity = batch_capacity;
        self
    }

    pub fn with_lg_k(mut self, lg_k: u8) -> Self {
        self.lg_k = lg_k;
        self
    }

    pub fn with_hll_type(mut self, hll_type: HllType) -> Self {
        self.hll_type = hll_type;
        self
    }

    pub fn with_memory_strategy(mut self, memory_strategy: MemoryStrategy) -> Self {
        self.memory_strategy = memory_strategy;
        self
    }

    /// Check that the settings describe a usable accumulator
    pub fn validate(&self) -> Result<()> {
        if self.batch_capacity == 0 {
            return Err(NdvError::InvalidArgument(
                "batch_capacity must be greater than zero".to_string(),
            ));
        }
        if !(MIN_LG_K..=MAX_LG_K).contains(&self.lg_k) {
            return Err(NdvError::InvalidArgument(format!(
                "lg_k must be in [{}, {}], got {}",
                MIN_LG_K, MAX_LG_K, self.lg_k
            )));
        }
        Ok(())
    }
}

/// Operator-level settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Bytes the operator may hold across accumulators and output columns
    pub memory_limit: usize,
    pub ndv: NdvConfig,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            memory_limit: usize::MAX,
            ndv: NdvConfig::default(),
        }
    }
}

impl ExecutionConfig {
    pub fn with_memory_limit(mut self, memory_limit: usize) -> Self {
        self.memory_limit = memory_limit;
        self
    }

    pub fn with_ndv(mut self, ndv: NdvConfig) -> Self {
        self.ndv = ndv;
        self
    }

    /// Create the pool that enforces `memory_limit`
    pub fn create_memory_pool(&self) -> SharedMemoryPool {
        create_memory_pool(self.memory_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NdvConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_capacity, DEFAULT_BATCH_CAPACITY);
        assert_eq!(config.memory_strategy, MemoryStrategy::Packed);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(NdvConfig::new().with_batch_capacity(0).validate().is_err());
        assert!(NdvConfig::new().with_lg_k(3).validate().is_err());
        assert!(NdvConfig::new().with_lg_k(22).validate().is_err());
        assert!(NdvConfig::new().with_lg_k(MIN_LG_K).validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: ExecutionConfig = serde_json::from_str(
            r#"{"memory_limit": 1048576, "ndv": {"lg_k": 10, "memory_strategy": "inline", "hll_type": "hll6"}}"#,
        )
        .unwrap();

        assert_eq!(config.memory_limit, 1 << 20);
        assert_eq!(config.ndv.lg_k, 10);
        assert_eq!(config.ndv.memory_strategy, MemoryStrategy::Inline);
        assert_eq!(config.ndv.hll_type, HllType::Hll6);
        assert_eq!(config.ndv.batch_capacity, DEFAULT_BATCH_CAPACITY);
        assert_eq!(config.create_memory_pool().max(), 1 << 20);
    }
}

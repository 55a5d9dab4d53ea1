//! HyperLogLog sketches over caller-owned memory
//!
//! A sketch's whole updatable state is a flat byte image: an 8-byte preamble
//! followed by the bit-packed register array. The image can live in memory
//! the sketch owns, or in a sub-range of a larger slice owned by someone
//! else, which is what lets a batch of sketches share one allocation.
//!
//! ```text
//! preamble: [family, version, lg_k, type, nonzero_count (u32 LE)]
//! registers: ceil(K * width / 8) bytes, K = 2^lg_k
//! ```

mod hll;
mod serialization;

pub use hll::{hash_value, HllSketch};
pub use serialization::CompactMode;

use crate::error::{NdvError, Result};
use serde::Deserialize;

/// Smallest supported `lg_k`
pub const MIN_LG_K: u8 = 4;
/// Largest supported `lg_k`
pub const MAX_LG_K: u8 = 21;

pub(crate) const HLL_FAMILY_ID: u8 = 7;
pub(crate) const SERIAL_VERSION: u8 = 1;
pub(crate) const PREAMBLE_BYTES: usize = 8;

/// Register width of the sketch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HllType {
    /// 6-bit registers, four per three bytes
    Hll6,
    /// One byte per register
    #[default]
    Hll8,
}

impl HllType {
    pub fn register_bits(self) -> usize {
        match self {
            HllType::Hll6 => 6,
            HllType::Hll8 => 8,
        }
    }

    pub(crate) fn code(self) -> u8 {
        self.register_bits() as u8
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            6 => Some(HllType::Hll6),
            8 => Some(HllType::Hll8),
            _ => None,
        }
    }
}

/// Sizing parameters shared by every sketch of one accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SketchLayout {
    lg_k: u8,
    hll_type: HllType,
}

impl SketchLayout {
    pub fn try_new(lg_k: u8, hll_type: HllType) -> Result<Self> {
        if !(MIN_LG_K..=MAX_LG_K).contains(&lg_k) {
            return Err(NdvError::InvalidArgument(format!(
                "lg_k must be in [{}, {}], got {}",
                MIN_LG_K, MAX_LG_K, lg_k
            )));
        }
        Ok(Self { lg_k, hll_type })
    }

    pub fn lg_k(&self) -> u8 {
        self.lg_k
    }

    pub fn hll_type(&self) -> HllType {
        self.hll_type
    }

    /// K, the number of registers
    pub fn num_registers(&self) -> usize {
        1 << self.lg_k
    }

    /// Bytes occupied by the packed register array
    pub fn register_bytes(&self) -> usize {
        (self.num_registers() * self.hll_type.register_bits() + 7) / 8
    }

    /// Upper bound of the compact form, and the exact size of the updatable
    /// image a sketch needs as backing memory
    pub fn max_serialized_size(&self) -> usize {
        PREAMBLE_BYTES + self.register_bytes()
    }
}

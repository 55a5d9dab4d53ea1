//! HyperLogLog sketch generic over its backing memory
//!
//! `HllSketch<S>` is the same type whether it owns its image (`Vec<u8>`, a
//! [`MemorySlice`]) or borrows it from a shared slice (`&mut [u8]`), so every
//! memory strategy runs the same update and serialization code.
//!
//! The estimator is Ertl's improved raw estimator ("New cardinality
//! estimation algorithms for HyperLogLog sketches", 2017).
//!
//! [`MemorySlice`]: crate::execution::MemorySlice

use super::serialization::{
    compact_size, decode_sparse_entry, encode_sparse_entry, parse_compact, write_header,
    CompactMode, CompactSketch,
};
use super::{HllType, SketchLayout, HLL_FAMILY_ID, PREAMBLE_BYTES, SERIAL_VERSION};
use crate::error::{NdvError, Result};
use ahash::RandomState;
use std::fmt;
use std::hash::Hash;
use std::sync::OnceLock;

/// Fixed seeds: every sketch in the process hashes identically
fn seeded_state() -> &'static RandomState {
    static STATE: OnceLock<RandomState> = OnceLock::new();
    STATE.get_or_init(|| {
        RandomState::with_seeds(
            0x885f_6cab_121d_01a3,
            0x17f2_3fb6_d0ce_0b6d,
            0x2d35_1e39_5c6e_9a1f,
            0x6b8d_9a2c_13f4_e075,
        )
    })
}

/// Hash a value the way [`HllSketch::update`] does
#[inline]
pub fn hash_value<T: Hash + ?Sized>(value: &T) -> u64 {
    seeded_state().hash_one(value)
}

#[inline]
fn get_register(registers: &[u8], hll_type: HllType, index: usize) -> u8 {
    match hll_type {
        HllType::Hll8 => registers[index],
        HllType::Hll6 => {
            let bit = index * 6;
            let byte = bit >> 3;
            let shift = bit & 7;
            let lo = registers[byte] as u16;
            let hi = if shift > 2 {
                (registers[byte + 1] as u16) << 8
            } else {
                0
            };
            (((hi | lo) >> shift) & 0x3f) as u8
        }
    }
}

#[inline]
fn set_register(registers: &mut [u8], hll_type: HllType, index: usize, value: u8) {
    match hll_type {
        HllType::Hll8 => registers[index] = value,
        HllType::Hll6 => {
            let bit = index * 6;
            let byte = bit >> 3;
            let shift = bit & 7;
            let spans = shift > 2;
            let mut word = registers[byte] as u16;
            if spans {
                word |= (registers[byte + 1] as u16) << 8;
            }
            word = (word & !(0x3f << shift)) | (((value & 0x3f) as u16) << shift);
            registers[byte] = word as u8;
            if spans {
                registers[byte + 1] = (word >> 8) as u8;
            }
        }
    }
}

fn hll_sigma(x: f64) -> f64 {
    if x == 1.0 {
        return f64::INFINITY;
    }
    let mut x = x;
    let mut y = 1.0;
    let mut z = x;
    loop {
        x *= x;
        let prev = z;
        z += x * y;
        y += y;
        if prev == z {
            return z;
        }
    }
}

fn hll_tau(x: f64) -> f64 {
    if x == 0.0 || x == 1.0 {
        return 0.0;
    }
    let mut x = x;
    let mut y = 1.0;
    let mut z = 1.0 - x;
    loop {
        x = x.sqrt();
        let prev = z;
        y *= 0.5;
        z -= (1.0 - x).powi(2) * y;
        if prev == z {
            return z / 3.0;
        }
    }
}

/// HyperLogLog sketch whose state is the byte image in `S`
pub struct HllSketch<S> {
    mem: S,
    layout: SketchLayout,
}

impl HllSketch<Vec<u8>> {
    /// Create an empty sketch that owns its memory
    pub fn new(layout: SketchLayout) -> Self {
        let mut mem = vec![0u8; layout.max_serialized_size()];
        write_preamble(&mut mem, &layout);
        Self { mem, layout }
    }

    /// Rebuild an owned sketch from its compact form
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let compact = parse_compact(bytes)?;
        let mut sketch = Self::new(compact.layout);
        sketch.load_compact(&compact)?;
        Ok(sketch)
    }
}

impl<S: AsRef<[u8]> + AsMut<[u8]>> HllSketch<S> {
    /// Initialize an empty sketch inside `mem`
    ///
    /// The preamble is written and the register array zeroed, whatever `mem`
    /// held before. `mem` must hold at least `layout.max_serialized_size()`
    /// bytes; anything beyond that is left untouched.
    pub fn create_in(layout: SketchLayout, mut mem: S) -> Result<Self> {
        let size = layout.max_serialized_size();
        let available = mem.as_ref().len();
        if available < size {
            return Err(NdvError::InvalidArgument(format!(
                "sketch needs {} bytes of backing memory, got {}",
                size, available
            )));
        }
        let image = &mut mem.as_mut()[..size];
        image.fill(0);
        write_preamble(image, &layout);
        Ok(Self { mem, layout })
    }

    /// Rebuild a sketch from its compact form inside `mem`
    pub fn deserialize_into(bytes: &[u8], mem: S) -> Result<Self> {
        let compact = parse_compact(bytes)?;
        let mut sketch = Self::create_in(compact.layout, mem)?;
        sketch.load_compact(&compact)?;
        Ok(sketch)
    }

    /// Add a value
    #[inline]
    pub fn update<T: Hash + ?Sized>(&mut self, value: &T) {
        self.update_hash(hash_value(value));
    }

    /// Add a value that was already hashed with [`hash_value`]
    #[inline]
    pub fn update_hash(&mut self, hash: u64) {
        let lg_k = self.layout.lg_k() as u32;
        let index = (hash & (self.layout.num_registers() as u64 - 1)) as usize;
        // Sentinel bit caps the rank at 65 - lg_k
        let rank = ((hash >> lg_k) | (1u64 << (64 - lg_k))).trailing_zeros() as u8 + 1;
        self.update_register(index, rank);
    }

    fn update_register(&mut self, index: usize, rank: u8) {
        let hll_type = self.layout.hll_type();
        let end = self.layout.max_serialized_size();
        let image = &mut self.mem.as_mut()[..end];
        let (preamble, registers) = image.split_at_mut(PREAMBLE_BYTES);

        let current = get_register(registers, hll_type, index);
        if rank > current {
            set_register(registers, hll_type, index, rank);
            if current == 0 {
                let count = read_nonzero(preamble) + 1;
                preamble[4..8].copy_from_slice(&count.to_le_bytes());
            }
        }
    }

    fn load_compact(&mut self, compact: &CompactSketch<'_>) -> Result<()> {
        let k = self.layout.num_registers();
        let max_rank = 65 - self.layout.lg_k();
        match compact.mode {
            CompactMode::Empty => {}
            CompactMode::Sparse => {
                let mut previous: Option<usize> = None;
                for entry in compact.body.chunks_exact(4) {
                    let (index, value) = decode_sparse_entry(entry);
                    if index >= k || value == 0 || value > max_rank {
                        return Err(NdvError::CorruptSketch(format!(
                            "sparse entry ({}, {}) out of range",
                            index, value
                        )));
                    }
                    if previous.map_or(false, |p| p >= index) {
                        return Err(NdvError::CorruptSketch(
                            "sparse entries are not strictly ascending".to_string(),
                        ));
                    }
                    previous = Some(index);
                    self.update_register(index, value);
                }
            }
            CompactMode::Dense => {
                let hll_type = self.layout.hll_type();
                for index in 0..k {
                    let value = get_register(compact.body, hll_type, index);
                    if value > max_rank {
                        return Err(NdvError::CorruptSketch(format!(
                            "register {} holds {} (max {})",
                            index, value, max_rank
                        )));
                    }
                    if value != 0 {
                        self.update_register(index, value);
                    }
                }
            }
        }
        Ok(())
    }

    /// Borrow as a mutable view
    pub fn as_view_mut(&mut self) -> HllSketch<&mut [u8]> {
        HllSketch {
            mem: self.mem.as_mut(),
            layout: self.layout,
        }
    }
}

impl<S: AsRef<[u8]>> HllSketch<S> {
    /// Wrap memory that already holds an initialized sketch
    ///
    /// Only the preamble is validated; nothing is written.
    pub fn reopen(mem: S) -> Result<Self> {
        let image = mem.as_ref();
        if image.len() < PREAMBLE_BYTES {
            return Err(NdvError::CorruptSketch(format!(
                "backing memory of {} bytes cannot hold a preamble",
                image.len()
            )));
        }
        if image[0] != HLL_FAMILY_ID || image[1] != SERIAL_VERSION {
            return Err(NdvError::CorruptSketch(
                "backing memory was not initialized as a sketch".to_string(),
            ));
        }
        let hll_type = HllType::from_code(image[3])
            .ok_or_else(|| NdvError::CorruptSketch(format!("unknown HLL type {}", image[3])))?;
        let layout = SketchLayout::try_new(image[2], hll_type)
            .map_err(|e| NdvError::CorruptSketch(e.to_string()))?;
        if image.len() < layout.max_serialized_size() {
            return Err(NdvError::CorruptSketch(format!(
                "backing memory of {} bytes is smaller than the {} byte image",
                image.len(),
                layout.max_serialized_size()
            )));
        }
        Ok(Self { mem, layout })
    }

    pub fn layout(&self) -> SketchLayout {
        self.layout
    }

    pub fn lg_k(&self) -> u8 {
        self.layout.lg_k()
    }

    pub fn hll_type(&self) -> HllType {
        self.layout.hll_type()
    }

    fn registers(&self) -> &[u8] {
        &self.mem.as_ref()[PREAMBLE_BYTES..self.layout.max_serialized_size()]
    }

    /// Number of registers that have seen at least one value
    pub fn nonzero_registers(&self) -> usize {
        read_nonzero(self.mem.as_ref()) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.nonzero_registers() == 0
    }

    /// Value of one register
    pub fn register(&self, index: usize) -> u8 {
        get_register(self.registers(), self.layout.hll_type(), index)
    }

    /// Estimated number of distinct values added
    pub fn estimate(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let k = self.layout.num_registers();
        let q = 64 - self.layout.lg_k() as usize;
        let registers = self.registers();
        let hll_type = self.layout.hll_type();

        let mut histogram = vec![0u32; q + 2];
        for index in 0..k {
            let value = get_register(registers, hll_type, index) as usize;
            histogram[value.min(q + 1)] += 1;
        }

        let m = k as f64;
        let mut z = m * hll_tau((m - histogram[q + 1] as f64) / m);
        for count in histogram[1..=q].iter().rev() {
            z += *count as f64;
            z *= 0.5;
        }
        z += m * hll_sigma(histogram[0] as f64 / m);

        0.5 / 2_f64.ln() * m * m / z
    }

    /// Exact length of the compact form
    pub fn serialized_size(&self) -> usize {
        compact_size(&self.layout, self.nonzero_registers())
    }

    pub fn compact_mode(&self) -> CompactMode {
        CompactMode::for_sketch(&self.layout, self.nonzero_registers())
    }

    /// Append the compact form to `out`, returning the bytes written
    pub fn write_compact(&self, out: &mut Vec<u8>) -> Result<usize> {
        let start = out.len();
        let mode = self.compact_mode();
        out.reserve(self.serialized_size());
        write_header(out, &self.layout, mode);

        match mode {
            CompactMode::Empty => {}
            CompactMode::Sparse => {
                let hll_type = self.layout.hll_type();
                let registers = self.registers();
                for index in 0..self.layout.num_registers() {
                    let value = get_register(registers, hll_type, index);
                    if value != 0 {
                        out.extend_from_slice(&encode_sparse_entry(index, value));
                    }
                }
            }
            CompactMode::Dense => out.extend_from_slice(self.registers()),
        }

        let written = out.len() - start;
        let bound = self.layout.max_serialized_size();
        if written > bound || written != self.serialized_size() {
            return Err(NdvError::Serialization(format!(
                "wrote {} bytes, expected {} (bound {})",
                written,
                self.serialized_size(),
                bound
            )));
        }
        Ok(written)
    }

    /// Compact form as a fresh byte vector
    pub fn to_compact_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.serialized_size());
        self.write_compact(&mut out)?;
        Ok(out)
    }

    /// Borrow as a read-only view
    pub fn as_view(&self) -> HllSketch<&[u8]> {
        HllSketch {
            mem: self.mem.as_ref(),
            layout: self.layout,
        }
    }
}

impl<S: AsRef<[u8]>> fmt::Debug for HllSketch<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HllSketch")
            .field("lg_k", &self.lg_k())
            .field("hll_type", &self.hll_type())
            .field("nonzero_registers", &self.nonzero_registers())
            .field("estimate", &self.estimate())
            .finish()
    }
}

fn write_preamble(image: &mut [u8], layout: &SketchLayout) {
    image[0] = HLL_FAMILY_ID;
    image[1] = SERIAL_VERSION;
    image[2] = layout.lg_k();
    image[3] = layout.hll_type().code();
    image[4..8].copy_from_slice(&0u32.to_le_bytes());
}

fn read_nonzero(image: &[u8]) -> u32 {
    u32::from_le_bytes([image[4], image[5], image[6], image[7]])
}

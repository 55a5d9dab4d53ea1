//! Compact serialized form of an HLL sketch
//!
//! ```text
//! header: [family, version, lg_k, type, mode, 0, 0, 0]
//! Empty:  no body
//! Sparse: one u32 LE per set register, `index << 8 | value`, ascending
//! Dense:  the packed register array as stored in the updatable image
//! ```
//!
//! The writer picks whichever of Sparse and Dense is smaller, so the compact
//! form never exceeds [`SketchLayout::max_serialized_size`].

use super::{HllType, SketchLayout, HLL_FAMILY_ID, SERIAL_VERSION};
use crate::error::{NdvError, Result};

pub(crate) const COMPACT_HEADER_BYTES: usize = 8;
pub(crate) const SPARSE_ENTRY_BYTES: usize = 4;

/// Body encoding of a compact sketch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactMode {
    Empty,
    Sparse,
    Dense,
}

impl CompactMode {
    fn code(self) -> u8 {
        match self {
            CompactMode::Empty => 0,
            CompactMode::Sparse => 1,
            CompactMode::Dense => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(CompactMode::Empty),
            1 => Some(CompactMode::Sparse),
            2 => Some(CompactMode::Dense),
            _ => None,
        }
    }

    /// Mode used for a sketch with `nonzero` set registers
    pub(crate) fn for_sketch(layout: &SketchLayout, nonzero: usize) -> Self {
        if nonzero == 0 {
            CompactMode::Empty
        } else if nonzero * SPARSE_ENTRY_BYTES < layout.register_bytes() {
            CompactMode::Sparse
        } else {
            CompactMode::Dense
        }
    }
}

/// Exact compact size of a sketch with `nonzero` set registers
pub(crate) fn compact_size(layout: &SketchLayout, nonzero: usize) -> usize {
    COMPACT_HEADER_BYTES
        + match CompactMode::for_sketch(layout, nonzero) {
            CompactMode::Empty => 0,
            CompactMode::Sparse => nonzero * SPARSE_ENTRY_BYTES,
            CompactMode::Dense => layout.register_bytes(),
        }
}

pub(crate) fn write_header(out: &mut Vec<u8>, layout: &SketchLayout, mode: CompactMode) {
    out.extend_from_slice(&[
        HLL_FAMILY_ID,
        SERIAL_VERSION,
        layout.lg_k(),
        layout.hll_type().code(),
        mode.code(),
        0,
        0,
        0,
    ]);
}

#[inline]
pub(crate) fn encode_sparse_entry(index: usize, value: u8) -> [u8; SPARSE_ENTRY_BYTES] {
    (((index as u32) << 8) | value as u32).to_le_bytes()
}

#[inline]
pub(crate) fn decode_sparse_entry(entry: &[u8]) -> (usize, u8) {
    let raw = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
    ((raw >> 8) as usize, (raw & 0xff) as u8)
}

/// A validated view over compact bytes
#[derive(Debug)]
pub(crate) struct CompactSketch<'a> {
    pub layout: SketchLayout,
    pub mode: CompactMode,
    pub body: &'a [u8],
}

pub(crate) fn parse_compact(bytes: &[u8]) -> Result<CompactSketch<'_>> {
    if bytes.len() < COMPACT_HEADER_BYTES {
        return Err(NdvError::CorruptSketch(format!(
            "compact sketch needs at least {} bytes, got {}",
            COMPACT_HEADER_BYTES,
            bytes.len()
        )));
    }
    if bytes[0] != HLL_FAMILY_ID {
        return Err(NdvError::CorruptSketch(format!(
            "unexpected family id {}",
            bytes[0]
        )));
    }
    if bytes[1] != SERIAL_VERSION {
        return Err(NdvError::CorruptSketch(format!(
            "unsupported serial version {}",
            bytes[1]
        )));
    }
    let hll_type = HllType::from_code(bytes[3])
        .ok_or_else(|| NdvError::CorruptSketch(format!("unknown HLL type {}", bytes[3])))?;
    let layout = SketchLayout::try_new(bytes[2], hll_type)
        .map_err(|e| NdvError::CorruptSketch(e.to_string()))?;
    let mode = CompactMode::from_code(bytes[4])
        .ok_or_else(|| NdvError::CorruptSketch(format!("unknown compact mode {}", bytes[4])))?;

    let body = &bytes[COMPACT_HEADER_BYTES..];
    let body_ok = match mode {
        CompactMode::Empty => body.is_empty(),
        CompactMode::Sparse => !body.is_empty() && body.len() % SPARSE_ENTRY_BYTES == 0,
        CompactMode::Dense => body.len() == layout.register_bytes(),
    };
    if !body_ok {
        return Err(NdvError::CorruptSketch(format!(
            "{:?} body of {} bytes does not fit lg_k={} {:?}",
            mode,
            body.len(),
            layout.lg_k(),
            layout.hll_type()
        )));
    }

    Ok(CompactSketch { layout, mode, body })
}

//! Serialization of a batch of sketches into output columns

use super::accumulator::NdvAccumulator;
use super::holder::BatchHolder;
use crate::error::{NdvError, Result};
use crate::execution::{MemoryReservation, SharedMemoryPool};
use arrow::array::{ArrayBuilder, BinaryArray, BinaryBuilder, Int64Builder};
use log::debug;
use std::fmt;

/// Destination of a flush: one variable-length cell per group
pub trait VariableWidthColumn {
    /// Replace the column's storage with room for `value_count` cells
    /// holding `data_bytes` bytes in total
    fn allocate_new(&mut self, data_bytes: usize, value_count: usize) -> Result<()>;

    /// Write cell `index`; cells must be written in order without gaps
    fn set(&mut self, index: usize, value: &[u8]) -> Result<()>;

    /// Cells written since the last `allocate_new`
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload bytes written since the last `allocate_new`
    fn data_len(&self) -> usize;
}

/// Arrow `Binary` column whose storage is charged to a memory pool
pub struct VarBinaryColumn {
    pool: SharedMemoryPool,
    builder: BinaryBuilder,
    data_len: usize,
    data_capacity: usize,
    reservation: Option<MemoryReservation>,
}

impl VarBinaryColumn {
    pub fn new(pool: SharedMemoryPool) -> Self {
        Self {
            pool,
            builder: BinaryBuilder::new(),
            data_len: 0,
            data_capacity: 0,
            reservation: None,
        }
    }

    /// Bytes currently charged to the pool
    pub fn reserved_bytes(&self) -> usize {
        self.reservation.as_ref().map_or(0, |r| r.size())
    }

    /// Take the written cells as an array and release the reservation
    pub fn finish(&mut self) -> BinaryArray {
        self.reservation = None;
        self.data_len = 0;
        self.data_capacity = 0;
        self.builder.finish()
    }
}

impl VariableWidthColumn for VarBinaryColumn {
    fn allocate_new(&mut self, data_bytes: usize, value_count: usize) -> Result<()> {
        // Offsets are i32
        if data_bytes > i32::MAX as usize {
            return Err(NdvError::ResourceExhausted(format!(
                "{} bytes exceed the capacity of a binary column",
                data_bytes
            )));
        }

        // The previous cells go with their reservation, even if this one fails
        self.reservation = None;
        self.builder = BinaryBuilder::new();
        self.data_len = 0;
        self.data_capacity = 0;

        let charge = value_count
            .checked_add(1)
            .and_then(|n| n.checked_mul(std::mem::size_of::<i32>()))
            .and_then(|offsets| offsets.checked_add(value_count.div_ceil(8)))
            .and_then(|overhead| overhead.checked_add(data_bytes));
        let reservation = charge
            .and_then(|charge| self.pool.try_allocate(charge))
            .ok_or_else(|| {
                NdvError::ResourceExhausted(format!(
                    "cannot reserve {} data bytes for {} output cells ({} available)",
                    data_bytes,
                    value_count,
                    self.pool.available()
                ))
            })?;

        self.builder = BinaryBuilder::with_capacity(value_count, data_bytes);
        self.reservation = Some(reservation);
        self.data_capacity = data_bytes;
        Ok(())
    }

    fn set(&mut self, index: usize, value: &[u8]) -> Result<()> {
        let next = self.builder.len();
        if index != next {
            return Err(NdvError::invalid_index("output column cell", index, next));
        }
        if self.data_len + value.len() > self.data_capacity {
            return Err(NdvError::ResourceExhausted(format!(
                "cell {} of {} bytes overflows the {} allocated bytes",
                index,
                value.len(),
                self.data_capacity
            )));
        }
        self.builder.append_value(value);
        self.data_len += value.len();
        Ok(())
    }

    fn len(&self) -> usize {
        self.builder.len()
    }

    fn data_len(&self) -> usize {
        self.data_len
    }
}

impl fmt::Debug for VarBinaryColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VarBinaryColumn")
            .field("len", &self.builder.len())
            .field("data_len", &self.data_len)
            .field("data_capacity", &self.data_capacity)
            .finish()
    }
}

impl<H: BatchHolder> NdvAccumulator<H> {
    /// Write the compact sketch of every slot of `batch_index` into `column`
    ///
    /// Cell `i` holds the sketch at offset `i` of the batch. The column is
    /// sized once from a first pass over the sketch sizes.
    pub fn flush_batch(
        &self,
        batch_index: usize,
        column: &mut dyn VariableWidthColumn,
    ) -> Result<()> {
        let holder = self.holder(batch_index)?;
        let slots = holder.slot_count();

        let mut total_bytes = 0;
        for index in 0..slots {
            total_bytes += holder.sketch(index)?.serialized_size();
        }

        column.allocate_new(total_bytes, slots)?;

        let mut buffer = Vec::with_capacity(self.layout().max_serialized_size());
        let mut written = 0;
        for index in 0..slots {
            buffer.clear();
            written += holder.sketch(index)?.write_compact(&mut buffer)?;
            column.set(index, &buffer)?;
        }

        if written != total_bytes {
            return Err(NdvError::Serialization(format!(
                "batch {} serialized to {} bytes, sized for {}",
                batch_index, written, total_bytes
            )));
        }

        debug!(
            "Flushed NDV batch {}: {} sketches, {} bytes",
            batch_index, slots, total_bytes
        );
        Ok(())
    }

    /// Append the rounded estimate of every slot of `batch_index`
    pub fn flush_estimates(&self, batch_index: usize, builder: &mut Int64Builder) -> Result<()> {
        let holder = self.holder(batch_index)?;
        let slots = holder.slot_count();
        for index in 0..slots {
            builder.append_value(holder.sketch(index)?.estimate().round() as i64);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::create_memory_pool;
    use arrow::array::Array;

    #[test]
    fn test_column_writes_in_order() {
        let pool = create_memory_pool(1024);
        let mut column = VarBinaryColumn::new(pool.clone());

        column.allocate_new(6, 3).unwrap();
        assert!(column.is_empty());
        assert_eq!(pool.used(), column.reserved_bytes());

        column.set(0, b"ab").unwrap();
        column.set(1, b"").unwrap();
        assert!(matches!(
            column.set(3, b"x"),
            Err(NdvError::InvalidIndex { index: 3, .. })
        ));
        column.set(2, b"cdef").unwrap();
        assert_eq!(column.data_len(), 6);

        let array = column.finish();
        assert_eq!(array.len(), 3);
        assert_eq!(array.value(0), b"ab");
        assert_eq!(array.value(1), b"");
        assert_eq!(array.value(2), b"cdef");
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_column_rejects_overflowing_cell() {
        let mut column = VarBinaryColumn::new(create_memory_pool(1024));
        column.allocate_new(2, 2).unwrap();
        column.set(0, b"a").unwrap();
        assert!(matches!(
            column.set(1, b"bc"),
            Err(NdvError::ResourceExhausted(_))
        ));
    }

    #[test]
    fn test_column_reservation_failure() {
        let pool = create_memory_pool(64);
        let mut column = VarBinaryColumn::new(pool.clone());
        assert!(matches!(
            column.allocate_new(100, 4),
            Err(NdvError::ResourceExhausted(_))
        ));
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_failed_reallocation_drops_previous_cells() {
        let pool = create_memory_pool(64);
        let mut column = VarBinaryColumn::new(pool.clone());
        column.allocate_new(8, 2).unwrap();
        column.set(0, b"abcd").unwrap();
        assert!(pool.used() > 0);

        assert!(matches!(
            column.allocate_new(100, 4),
            Err(NdvError::ResourceExhausted(_))
        ));
        assert!(column.is_empty());
        assert_eq!(column.data_len(), 0);
        assert_eq!(column.reserved_bytes(), 0);
        assert_eq!(pool.used(), 0);
        assert!(column.set(0, b"x").is_err());
        assert_eq!(column.finish().len(), 0);

        assert!(matches!(
            column.allocate_new(8, usize::MAX),
            Err(NdvError::ResourceExhausted(_))
        ));
    }
}

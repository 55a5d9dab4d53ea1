//! Typed input: feeding Arrow columns into the per-group sketches
//!
//! Numbers are hashed in a canonical form so the same value counts once
//! whatever column width it arrived in.

use super::accumulator::NdvAccumulator;
use super::holder::BatchHolder;
use crate::error::{NdvError, Result};
use crate::sketch::hash_value;
use arrow::array::{Array, ArrayAccessor, AsArray};
use arrow::datatypes::{
    DataType, Date32Type, Date64Type, Decimal128Type, Float32Type, Float64Type, Int16Type,
    Int32Type, Int64Type, Int8Type, TimeUnit, TimestampMicrosecondType,
    TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType, UInt16Type,
    UInt32Type, UInt64Type, UInt8Type,
};

#[inline]
fn hash_integer<T: Into<i128>>(value: T) -> u64 {
    hash_value(&value.into())
}

/// `-0.0` folds into `0.0` and every NaN into one NaN
#[inline]
fn hash_float(value: f64) -> u64 {
    let canonical = if value == 0.0 {
        0.0f64
    } else if value.is_nan() {
        f64::NAN
    } else {
        value
    };
    hash_value(&canonical.to_bits())
}

impl<H: BatchHolder> NdvAccumulator<H> {
    /// Add `values[i]` to the sketch of group `ordinals[i]`, skipping nulls
    ///
    /// Every ordinal is checked against the current capacity before any
    /// sketch is touched.
    pub fn update_batch(&mut self, ordinals: &[u32], values: &dyn Array) -> Result<()> {
        if ordinals.len() != values.len() {
            return Err(NdvError::InvalidArgument(format!(
                "{} ordinals for {} values",
                ordinals.len(),
                values.len()
            )));
        }
        if let Some(&max) = ordinals.iter().max() {
            let (batch_index, _) = self.slot(max as usize);
            if batch_index >= self.num_batches() {
                return Err(NdvError::invalid_index(
                    "accumulator batch",
                    batch_index,
                    self.num_batches(),
                ));
            }
        }

        match values.data_type() {
            DataType::Null => Ok(()),
            DataType::Boolean => self.update_with(ordinals, values.as_boolean(), |v: bool| {
                hash_value(&v)
            }),
            DataType::Int8 => {
                self.update_with(ordinals, values.as_primitive::<Int8Type>(), hash_integer)
            }
            DataType::Int16 => {
                self.update_with(ordinals, values.as_primitive::<Int16Type>(), hash_integer)
            }
            DataType::Int32 => {
                self.update_with(ordinals, values.as_primitive::<Int32Type>(), hash_integer)
            }
            DataType::Int64 => {
                self.update_with(ordinals, values.as_primitive::<Int64Type>(), hash_integer)
            }
            DataType::UInt8 => {
                self.update_with(ordinals, values.as_primitive::<UInt8Type>(), hash_integer)
            }
            DataType::UInt16 => {
                self.update_with(ordinals, values.as_primitive::<UInt16Type>(), hash_integer)
            }
            DataType::UInt32 => {
                self.update_with(ordinals, values.as_primitive::<UInt32Type>(), hash_integer)
            }
            DataType::UInt64 => {
                self.update_with(ordinals, values.as_primitive::<UInt64Type>(), hash_integer)
            }
            DataType::Float32 => self.update_with(
                ordinals,
                values.as_primitive::<Float32Type>(),
                |v: f32| hash_float(v as f64),
            ),
            DataType::Float64 => {
                self.update_with(ordinals, values.as_primitive::<Float64Type>(), hash_float)
            }
            DataType::Date32 => {
                self.update_with(ordinals, values.as_primitive::<Date32Type>(), hash_integer)
            }
            DataType::Date64 => {
                self.update_with(ordinals, values.as_primitive::<Date64Type>(), hash_integer)
            }
            DataType::Timestamp(unit, _) => match unit {
                TimeUnit::Second => self.update_with(
                    ordinals,
                    values.as_primitive::<TimestampSecondType>(),
                    hash_integer,
                ),
                TimeUnit::Millisecond => self.update_with(
                    ordinals,
                    values.as_primitive::<TimestampMillisecondType>(),
                    hash_integer,
                ),
                TimeUnit::Microsecond => self.update_with(
                    ordinals,
                    values.as_primitive::<TimestampMicrosecondType>(),
                    hash_integer,
                ),
                TimeUnit::Nanosecond => self.update_with(
                    ordinals,
                    values.as_primitive::<TimestampNanosecondType>(),
                    hash_integer,
                ),
            },
            DataType::Decimal128(_, _) => {
                self.update_with(ordinals, values.as_primitive::<Decimal128Type>(), hash_integer)
            }
            DataType::Utf8 => {
                self.update_with(ordinals, values.as_string::<i32>(), |v: &str| hash_value(v))
            }
            DataType::LargeUtf8 => {
                self.update_with(ordinals, values.as_string::<i64>(), |v: &str| hash_value(v))
            }
            DataType::Utf8View => {
                self.update_with(ordinals, values.as_string_view(), |v: &str| hash_value(v))
            }
            DataType::Binary => {
                self.update_with(ordinals, values.as_binary::<i32>(), |v: &[u8]| hash_value(v))
            }
            DataType::LargeBinary => {
                self.update_with(ordinals, values.as_binary::<i64>(), |v: &[u8]| hash_value(v))
            }
            DataType::BinaryView => {
                self.update_with(ordinals, values.as_binary_view(), |v: &[u8]| hash_value(v))
            }
            other => Err(NdvError::NotImplemented(format!(
                "NDV accumulation over {}",
                other
            ))),
        }
    }

    fn update_with<A, F>(&mut self, ordinals: &[u32], values: A, hash: F) -> Result<()>
    where
        A: ArrayAccessor,
        F: Fn(A::Item) -> u64,
    {
        for (row, &ordinal) in ordinals.iter().enumerate() {
            if values.is_null(row) {
                continue;
            }
            self.insert_hash(ordinal as usize, hash(values.value(row)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{create_memory_pool, NdvConfig, SlabAllocator};
    use crate::physical::ndv::PackedBatchHolder;
    use arrow::array::{
        BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array, LargeStringArray,
        StringArray, UInt8Array,
    };
    use arrow::datatypes::IntervalUnit;

    fn accumulator() -> NdvAccumulator<PackedBatchHolder> {
        let config = NdvConfig::new().with_batch_capacity(4).with_lg_k(10);
        let allocator = SlabAllocator::new(create_memory_pool(usize::MAX));
        let mut acc = NdvAccumulator::try_new(&config, allocator).unwrap();
        acc.grow(8).unwrap();
        acc
    }

    #[test]
    fn test_strings_by_group() {
        let mut acc = accumulator();
        let values = StringArray::from(vec![
            Some("a"),
            Some("b"),
            Some("a"),
            None,
            Some("c"),
            Some("a"),
        ]);
        acc.update_batch(&[0, 0, 0, 0, 5, 5], &values).unwrap();

        assert_eq!(acc.estimate(0).unwrap().round(), 2.0);
        assert_eq!(acc.estimate(5).unwrap().round(), 2.0);
        assert!(acc.sketch(1).unwrap().is_empty());
    }

    #[test]
    fn test_nulls_are_skipped() {
        let mut acc = accumulator();
        let values = Int64Array::from(vec![None, None, None]);
        acc.update_batch(&[2, 2, 2], &values).unwrap();
        assert!(acc.sketch(2).unwrap().is_empty());
    }

    #[test]
    fn test_integer_widths_hash_alike() {
        let mut acc = accumulator();
        acc.update_batch(&[0, 0], &Int32Array::from(vec![7, 9]))
            .unwrap();
        acc.update_batch(&[0, 0], &Int64Array::from(vec![7, 9]))
            .unwrap();
        acc.update_batch(&[0], &UInt8Array::from(vec![7])).unwrap();
        assert_eq!(acc.estimate(0).unwrap().round(), 2.0);
    }

    #[test]
    fn test_float_canonicalization() {
        let mut acc = accumulator();
        acc.update_batch(
            &[1, 1, 1, 1],
            &Float64Array::from(vec![0.0, -0.0, f64::NAN, -f64::NAN]),
        )
        .unwrap();
        acc.update_batch(&[1], &Float32Array::from(vec![0.0f32]))
            .unwrap();
        assert_eq!(acc.estimate(1).unwrap().round(), 2.0);
    }

    #[test]
    fn test_string_offsets_hash_alike() {
        let mut acc = accumulator();
        acc.update_batch(&[3], &StringArray::from(vec!["x"])).unwrap();
        acc.update_batch(&[3], &LargeStringArray::from(vec!["x"]))
            .unwrap();
        acc.update_batch(&[3], &BooleanArray::from(vec![true]))
            .unwrap();
        assert_eq!(acc.estimate(3).unwrap().round(), 2.0);
    }

    #[test]
    fn test_rejects_bad_input() {
        let mut acc = accumulator();
        let values = Int64Array::from(vec![1, 2]);
        assert!(matches!(
            acc.update_batch(&[0], &values),
            Err(NdvError::InvalidArgument(_))
        ));

        // Ordinal 8 is past capacity: nothing is written, not even row 0
        assert!(matches!(
            acc.update_batch(&[0, 8], &values),
            Err(NdvError::InvalidIndex { .. })
        ));
        assert!(acc.sketch(0).unwrap().is_empty());

        let intervals = arrow::array::new_empty_array(&DataType::Interval(IntervalUnit::DayTime));
        assert!(matches!(
            acc.update_batch(&[], intervals.as_ref()),
            Err(NdvError::NotImplemented(_))
        ));
    }
}

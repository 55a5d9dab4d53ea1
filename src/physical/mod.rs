//! Physical execution state owned by aggregation operators

pub mod ndv;

pub use ndv::*;

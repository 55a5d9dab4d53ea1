//! Execution resources: memory accounting, slice allocation and settings

mod allocator;
mod config;
mod memory;

pub use allocator::*;
pub use config::*;
pub use memory::*;

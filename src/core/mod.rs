mod allocator;
mod generator;

pub use allocator::DrawAllocator;
pub use generator::{random_code, GenerateError, PoolGenerator, PoolReport};

pub mod cli;
pub mod config;
pub mod core;
pub mod storage;

pub use config::Config;
pub use core::{DrawAllocator, GenerateError, PoolGenerator, PoolReport};
pub use storage::{AllocateError, Allocation, Storage};

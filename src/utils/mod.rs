//! Utility helpers: math extensions, allocators, logging, SIMD helpers and the task pool.

pub mod allocator;
pub mod logging;
pub mod math;
pub mod simd;
pub mod task_pool;

pub use allocator::{Arena, Handle};
pub use math::*;
pub use task_pool::{TaskPool, TaskPriority};

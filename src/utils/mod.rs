//! Utility helpers: math extensions, the generational arena, logging, and the
//! 4-wide AABB helpers used by the broadphase.

pub mod allocator;
pub mod logging;
pub mod math;
pub mod profiling;
pub mod simd;

pub use allocator::{Arena, ArenaId};
pub use math::*;

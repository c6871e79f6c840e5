//! Buddy system frame allocator
//!
//! Manages a single contiguous region as power-of-two blocks across orders
//! `0..=MAX_ORDER`, with:
//! - One intrusive free list per order
//! - A per-minimum-block allocation bitmap carved from the region prefix
//! - Splitting on allocation and XOR-based coalescing on free

pub mod allocator;
pub mod stats;

pub use allocator::BuddyAllocator;
pub use stats::BuddyStats;

/// Highest allowed order: top blocks span `2^MAX_ORDER` minimum blocks
/// (4 MiB with the default 4 KiB minimum).
pub const MAX_ORDER: usize = 10;

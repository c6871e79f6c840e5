//! Statistics snapshot for the buddy allocator

use super::MAX_ORDER;

/// Buddy system statistics.
///
/// Produced by [`super::BuddyAllocator::get_stats`]; the snapshot is not
/// atomic with respect to other operations, so readers either hold the
/// same external serialization as mutators or accept torn reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuddyStats {
    /// Total managed bytes (after the bitmap prefix was deducted).
    pub total_bytes: usize,
    /// Bytes currently on the free lists.
    pub free_bytes: usize,
    /// Bytes currently handed out to callers.
    pub allocated_bytes: usize,
    /// Running count of successful allocations.
    pub total_allocations: usize,
    /// Running count of accepted frees.
    pub total_frees: usize,
    /// Number of free blocks per order.
    pub free_blocks_by_order: [usize; MAX_ORDER + 1],
}

impl BuddyStats {
    pub const fn new() -> Self {
        Self {
            total_bytes: 0,
            free_bytes: 0,
            allocated_bytes: 0,
            total_allocations: 0,
            total_frees: 0,
            free_blocks_by_order: [0; MAX_ORDER + 1],
        }
    }

    /// Total number of free blocks across all orders.
    pub fn free_block_count(&self) -> usize {
        let mut total = 0;
        for &count in self.free_blocks_by_order.iter() {
            total += count;
        }
        total
    }
}

impl Default for BuddyStats {
    fn default() -> Self {
        Self::new()
    }
}

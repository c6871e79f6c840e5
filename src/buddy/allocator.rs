//! Single-region buddy allocator
//!
//! The region prefix is reserved for the allocation bitmap; the remainder
//! is managed as power-of-two blocks. While a block is free, its leading
//! bytes overlay a header carrying the free-list node and the block order;
//! the header ceases to exist the moment the block is handed to a caller
//! and is re-established on free.

use crate::{align_up, is_aligned, AllocError, AllocResult, BaseAllocator, BlockAllocator};
use crate::{Bitmap, LinkedList, ListNode};

#[cfg(feature = "log")]
use log::{debug, error, info, warn};

use super::{stats::BuddyStats, MAX_ORDER};

/// Header overlaying the first bytes of a free block.
///
/// The node sits at offset 0, so a node address is the block address.
#[repr(C)]
struct FreeBlockHeader {
    node: ListNode,
    order: usize,
}

/// Buddy allocator over one contiguous region.
///
/// `PAGE_SIZE` is the minimum block size (a power of two; the hardware
/// page size when used as a frame allocator). Order `k` blocks span
/// `2^k * PAGE_SIZE` bytes and are aligned to their size relative to the
/// managed-region base.
///
/// The allocator is single-context: callers serialize all operations
/// externally. Every public mutator is a no-op (or an error) until
/// [`BuddyAllocator::init`] succeeds.
pub struct BuddyAllocator<const PAGE_SIZE: usize = { crate::DEFAULT_PAGE_SIZE }> {
    /// Base of the managed region, past the bitmap prefix.
    region_base: usize,
    region_end: usize,
    /// Managed bytes, after deducting the bitmap prefix.
    total_bytes: usize,
    /// Bit `i` is set iff minimum-slot `i` is part of an allocated block.
    bitmap: Bitmap,
    /// One free list per order.
    free_lists: [LinkedList; MAX_ORDER + 1],
    free_bytes: usize,
    allocated_bytes: usize,
    total_allocations: usize,
    total_frees: usize,
    initialized: bool,
}

impl<const PAGE_SIZE: usize> BuddyAllocator<PAGE_SIZE> {
    /// Create an uninitialized allocator (must call init()).
    pub const fn new() -> Self {
        Self {
            region_base: 0,
            region_end: 0,
            total_bytes: 0,
            bitmap: Bitmap::new(),
            free_lists: [const { LinkedList::new() }; MAX_ORDER + 1],
            free_bytes: 0,
            allocated_bytes: 0,
            total_allocations: 0,
            total_frees: 0,
            initialized: false,
        }
    }

    /// Smallest order whose blocks hold at least `size` bytes, or `None`
    /// when no order up to [`MAX_ORDER`] does. `size = 0` maps to order 0;
    /// zero-byte requests are rejected by [`BuddyAllocator::alloc`] itself.
    pub fn size_to_order(size: usize) -> Option<usize> {
        let blocks = size / PAGE_SIZE + (size % PAGE_SIZE != 0) as usize;
        if blocks <= 1 {
            return Some(0);
        }
        let order = blocks.next_power_of_two().trailing_zeros() as usize;
        if order > MAX_ORDER {
            None
        } else {
            Some(order)
        }
    }

    /// Block size in bytes at `order`, or 0 when the order is out of range.
    pub const fn order_to_size(order: usize) -> usize {
        if order > MAX_ORDER {
            0
        } else {
            (1 << order) * PAGE_SIZE
        }
    }

    /// Whether `addr` lies inside the managed region.
    pub fn addr_in_region(&self, addr: usize) -> bool {
        addr >= self.region_base && addr < self.region_end
    }

    /// Base address of the managed region (past the bitmap prefix).
    pub fn region_base(&self) -> usize {
        self.region_base
    }

    fn slot_index(&self, addr: usize) -> usize {
        (addr - self.region_base) / PAGE_SIZE
    }

    fn write_free_header(&mut self, addr: usize, order: usize) {
        unsafe {
            core::ptr::write(
                addr as *mut FreeBlockHeader,
                FreeBlockHeader {
                    node: ListNode::new(),
                    order,
                },
            );
        }
    }

    /// Initialize with the physical region `[start, start + size)`.
    ///
    /// The start is rounded up to a `PAGE_SIZE` multiple, the prefix is
    /// reserved for the allocation bitmap (whole minimum blocks), and the
    /// remaining slots are seeded into the free lists low-to-high at the
    /// largest order that both fits the tail and is aligned relative to
    /// the managed-region base. Up to `PAGE_SIZE - 1` trailing bytes of
    /// the caller's region are never managed; size the region to a
    /// multiple of `2^MAX_ORDER * PAGE_SIZE` for zero waste.
    pub fn init(&mut self, start: usize, size: usize) -> AllocResult {
        debug_assert!(PAGE_SIZE.is_power_of_two());
        if start == 0 || size < 2 * PAGE_SIZE {
            return Err(AllocError::InvalidParam);
        }
        let end = start.checked_add(size).ok_or(AllocError::InvalidParam)?;
        let aligned_start = align_up(start, PAGE_SIZE);
        if aligned_start >= end {
            return Err(AllocError::InvalidParam);
        }

        let slots = (end - aligned_start) / PAGE_SIZE;
        let bitmap_bytes = (slots + 7) / 8;
        let bitmap_blocks = (bitmap_bytes + PAGE_SIZE - 1) / PAGE_SIZE;
        if bitmap_blocks >= slots {
            return Err(AllocError::InvalidParam);
        }
        let managed_slots = slots - bitmap_blocks;

        self.bitmap.init(aligned_start, managed_slots)?;
        self.free_lists = [const { LinkedList::new() }; MAX_ORDER + 1];
        self.region_base = aligned_start + bitmap_blocks * PAGE_SIZE;
        self.region_end = self.region_base + managed_slots * PAGE_SIZE;
        self.total_bytes = managed_slots * PAGE_SIZE;
        self.free_bytes = self.total_bytes;
        self.allocated_bytes = 0;
        self.total_allocations = 0;
        self.total_frees = 0;

        // Seed the canonical decomposition: at each step the largest order
        // that fits the remaining tail and keeps the offset aligned.
        let mut offset = 0;
        while offset < managed_slots {
            let remaining = managed_slots - offset;
            let order_fit = (usize::BITS - 1 - remaining.leading_zeros()) as usize;
            let order_align = if offset == 0 {
                MAX_ORDER
            } else {
                offset.trailing_zeros() as usize
            };
            let order = MAX_ORDER.min(order_fit).min(order_align);

            let addr = self.region_base + offset * PAGE_SIZE;
            self.write_free_header(addr, order);
            self.free_lists[order].push_back(addr);
            offset += 1 << order;
        }

        self.initialized = true;
        info!(
            "buddy allocator: managing [{:#x}, {:#x}), {} slots of {:#x} bytes ({} bitmap blocks reserved)",
            self.region_base, self.region_end, managed_slots, PAGE_SIZE, bitmap_blocks
        );
        Ok(())
    }

    /// Whether [`BuddyAllocator::init`] has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Allocate one block of the given order. Returns its address.
    ///
    /// Scans the free lists upward from `order`, pops the head of the
    /// lowest non-empty list and splits it down, retaining the lower half
    /// and freeing the upper half at each step.
    pub fn alloc_order(&mut self, order: usize) -> AllocResult<usize> {
        if !self.initialized {
            return Err(AllocError::Uninitialized);
        }
        if order > MAX_ORDER {
            return Err(AllocError::InvalidParam);
        }

        let mut found = None;
        for k in order..=MAX_ORDER {
            if !self.free_lists[k].is_empty() {
                found = Some(k);
                break;
            }
        }
        let Some(mut k) = found else {
            debug!(
                "buddy allocator: out of memory at order {} ({:#x} bytes)",
                order,
                Self::order_to_size(order)
            );
            return Err(AllocError::NoMemory);
        };

        let addr = match self.free_lists[k].pop_front() {
            Some(addr) => addr,
            None => return Err(AllocError::NoMemory),
        };

        while k > order {
            k -= 1;
            let upper = addr + Self::order_to_size(k);
            self.write_free_header(upper, k);
            self.free_lists[k].push_front(upper);
        }

        self.bitmap.set_range(self.slot_index(addr), 1 << order);
        let size = Self::order_to_size(order);
        self.free_bytes -= size;
        self.allocated_bytes += size;
        self.total_allocations += 1;
        Ok(addr)
    }

    /// Allocate a block of at least `size` bytes.
    ///
    /// Rejects zero-size and requests above `2^MAX_ORDER * PAGE_SIZE`.
    pub fn alloc(&mut self, size: usize) -> AllocResult<usize> {
        if size == 0 {
            return Err(AllocError::InvalidParam);
        }
        let order = Self::size_to_order(size).ok_or(AllocError::InvalidParam)?;
        self.alloc_order(order)
    }

    /// Free the block of the given order at `addr`.
    ///
    /// Precondition violations (uninitialized, null or out-of-region
    /// address, out-of-range order, misalignment) are logged no-ops.
    /// Freeing a block that was not allocated with exactly this order is
    /// undefined; only `debug_assert` guards watch for it.
    pub fn free_order(&mut self, addr: usize, order: usize) {
        if !self.initialized {
            warn!("buddy allocator: free before init, addr {:#x}", addr);
            return;
        }
        if addr == 0 || order > MAX_ORDER {
            warn!(
                "buddy allocator: rejected free, addr {:#x}, order {}",
                addr, order
            );
            return;
        }
        if !self.addr_in_region(addr) {
            error!(
                "buddy allocator: addr {:#x} not in managed region [{:#x}, {:#x})",
                addr, self.region_base, self.region_end
            );
            return;
        }
        let size = Self::order_to_size(order);
        if !is_aligned(addr - self.region_base, size) {
            error!(
                "buddy allocator: addr {:#x} not aligned to {:#x} relative to region base",
                addr, size
            );
            return;
        }
        if addr + size > self.region_end {
            error!(
                "buddy allocator: block [{:#x}, {:#x}) exceeds region end {:#x}",
                addr,
                addr + size,
                self.region_end
            );
            return;
        }

        let index = self.slot_index(addr);
        debug_assert!(
            !self.bitmap.is_range_clear(index, 1 << order),
            "freeing an already-free extent"
        );
        self.bitmap.clear_range(index, 1 << order);
        self.free_bytes += size;
        debug_assert!(self.allocated_bytes >= size);
        self.allocated_bytes -= size;
        self.total_frees += 1;

        // Coalesce upward. The bitmap alone cannot tell "free as one
        // order-k block" from "free but split into smaller blocks"; the
        // free-list membership check disambiguates, so both checks stay.
        let mut block = addr;
        let mut k = order;
        while k < MAX_ORDER {
            let block_size = Self::order_to_size(k);
            let buddy = self.region_base + ((block - self.region_base) ^ block_size);
            if buddy + block_size > self.region_end {
                break;
            }
            if !self.bitmap.is_range_clear(self.slot_index(buddy), 1 << k) {
                break;
            }
            if !self.free_lists[k].contains(buddy) {
                break;
            }
            debug_assert_eq!(
                unsafe { core::ptr::read(buddy as *const FreeBlockHeader).order },
                k,
                "free-list entry carries a stale order"
            );
            self.free_lists[k].remove(buddy);
            block = block.min(buddy);
            k += 1;
        }

        self.write_free_header(block, k);
        self.free_lists[k].push_front(block);
    }

    /// Free the block of at least `size` bytes at `addr`, as allocated by
    /// [`BuddyAllocator::alloc`] with the same `size`.
    pub fn free(&mut self, addr: usize, size: usize) {
        if size == 0 {
            warn!("buddy allocator: rejected zero-size free at {:#x}", addr);
            return;
        }
        match Self::size_to_order(size) {
            Some(order) => self.free_order(addr, order),
            None => warn!(
                "buddy allocator: rejected free of oversize block ({:#x} bytes) at {:#x}",
                size, addr
            ),
        }
    }

    /// Snapshot the counters and per-order free-block counts.
    ///
    /// The snapshot is not atomic with respect to mutators; readers that
    /// need a consistent view hold the same external serialization.
    pub fn get_stats(&self) -> BuddyStats {
        let mut stats = BuddyStats::new();
        stats.total_bytes = self.total_bytes;
        stats.free_bytes = self.free_bytes;
        stats.allocated_bytes = self.allocated_bytes;
        stats.total_allocations = self.total_allocations;
        stats.total_frees = self.total_frees;
        for order in 0..=MAX_ORDER {
            stats.free_blocks_by_order[order] = self.free_lists[order].len();
        }
        stats
    }

    /// Log the managed region, counters and free-block distribution.
    pub fn log_state(&self) {
        info!("========== Buddy Allocator State ==========");
        info!(
            "Managed region: [{:#x}, {:#x})",
            self.region_base, self.region_end
        );
        info!(
            "Total: {} KiB, free: {} KiB, allocated: {} KiB",
            self.total_bytes / 1024,
            self.free_bytes / 1024,
            self.allocated_bytes / 1024
        );
        info!(
            "Allocations: {}, frees: {}",
            self.total_allocations, self.total_frees
        );
        for order in 0..=MAX_ORDER {
            let count = self.free_lists[order].len();
            if count > 0 {
                info!(
                    "  Order {:2}: {} blocks ({:#x} bytes each)",
                    order,
                    count,
                    Self::order_to_size(order)
                );
            }
        }
        info!("===========================================");
    }
}

impl<const PAGE_SIZE: usize> Default for BuddyAllocator<PAGE_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const PAGE_SIZE: usize> BaseAllocator for BuddyAllocator<PAGE_SIZE> {
    fn init(&mut self, start: usize, size: usize) -> AllocResult {
        self.init(start, size)
    }

    fn is_initialized(&self) -> bool {
        self.is_initialized()
    }
}

impl<const PAGE_SIZE: usize> BlockAllocator for BuddyAllocator<PAGE_SIZE> {
    const MIN_BLOCK_SIZE: usize = PAGE_SIZE;

    fn alloc(&mut self, size: usize) -> AllocResult<usize> {
        self.alloc(size)
    }

    fn free(&mut self, addr: usize, size: usize) {
        self.free(addr, size)
    }

    fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    fn used_bytes(&self) -> usize {
        self.allocated_bytes
    }

    fn available_bytes(&self) -> usize {
        self.free_bytes
    }
}

//! Integration tests for the buddy frame allocator
//!
//! Exercises the allocator end to end: init decomposition, split and
//! coalesce cascades, exhaustion, conservation and alignment properties.

#![no_std]

extern crate alloc;
extern crate buddy_frame_allocator;

use alloc::vec::Vec;
use buddy_frame_allocator::{AllocError, Bitmap, BuddyAllocator, MAX_ORDER};
use core::alloc::Layout;

const PAGE_SIZE: usize = 0x1000;
/// One bitmap block plus exactly two max-order blocks.
const TWO_TOP_BLOCKS_HEAP: usize = (2 * (1 << MAX_ORDER) + 1) * PAGE_SIZE;
/// Two max-order blocks with no slack: the bitmap block is carved out of
/// the managed slots, leaving a mixed-order decomposition.
const MIXED_HEAP: usize = 2 * (1 << MAX_ORDER) * PAGE_SIZE;

/// Allocate test memory using system allocator
fn alloc_test_heap(size: usize) -> (*mut u8, Layout) {
    let layout = Layout::from_size_align(size, PAGE_SIZE).unwrap();
    let ptr = unsafe { alloc::alloc::alloc(layout) };
    assert!(!ptr.is_null(), "Failed to allocate test heap");
    (ptr, layout)
}

/// Deallocate test memory
fn dealloc_test_heap(ptr: *mut u8, layout: Layout) {
    unsafe { alloc::alloc::dealloc(ptr, layout) };
}

fn make_allocator(heap_addr: usize, size: usize) -> BuddyAllocator<PAGE_SIZE> {
    let mut allocator = BuddyAllocator::<PAGE_SIZE>::new();
    allocator.init(heap_addr, size).unwrap();
    allocator
}

#[test]
fn test_init_decomposition() {
    let (heap_ptr, heap_layout) = alloc_test_heap(TWO_TOP_BLOCKS_HEAP);
    let allocator = make_allocator(heap_ptr as usize, TWO_TOP_BLOCKS_HEAP);

    let stats = allocator.get_stats();
    assert!(stats.free_blocks_by_order[MAX_ORDER] >= 1);
    assert_eq!(stats.free_bytes, stats.total_bytes);
    assert_eq!(stats.allocated_bytes, 0);
    assert_eq!(stats.total_bytes, 2 * (1 << MAX_ORDER) * PAGE_SIZE);

    dealloc_test_heap(heap_ptr, heap_layout);
}

#[test]
fn test_mixed_order_decomposition() {
    let (heap_ptr, heap_layout) = alloc_test_heap(MIXED_HEAP);
    let allocator = make_allocator(heap_ptr as usize, MIXED_HEAP);

    // 2048 slots minus one bitmap block leaves 2047 = 0b111_1111_1111:
    // the canonical decomposition is one block of every order.
    let stats = allocator.get_stats();
    for order in 0..=MAX_ORDER {
        assert_eq!(
            stats.free_blocks_by_order[order], 1,
            "order {} should hold exactly one block",
            order
        );
    }
    assert_eq!(stats.total_bytes, ((1 << (MAX_ORDER + 1)) - 1) * PAGE_SIZE);

    dealloc_test_heap(heap_ptr, heap_layout);
}

#[test]
fn test_split_cascade() {
    let (heap_ptr, heap_layout) = alloc_test_heap(TWO_TOP_BLOCKS_HEAP);
    let mut allocator = make_allocator(heap_ptr as usize, TWO_TOP_BLOCKS_HEAP);

    let post_init = allocator.get_stats();
    let p = allocator.alloc_order(0).unwrap();
    assert_eq!(p, allocator.region_base(), "lower half is retained");

    let stats = allocator.get_stats();
    for order in 0..MAX_ORDER {
        assert_eq!(
            stats.free_blocks_by_order[order], 1,
            "order {} should hold one upper half from the cascade",
            order
        );
    }
    assert_eq!(
        stats.free_blocks_by_order[MAX_ORDER],
        post_init.free_blocks_by_order[MAX_ORDER] - 1
    );
    assert_eq!(stats.allocated_bytes, PAGE_SIZE);

    dealloc_test_heap(heap_ptr, heap_layout);
}

#[test]
fn test_coalesce_cascade() {
    let (heap_ptr, heap_layout) = alloc_test_heap(TWO_TOP_BLOCKS_HEAP);
    let mut allocator = make_allocator(heap_ptr as usize, TWO_TOP_BLOCKS_HEAP);

    let post_init = allocator.get_stats();
    let p = allocator.alloc_order(0).unwrap();
    allocator.free_order(p, 0);

    let stats = allocator.get_stats();
    assert_eq!(stats.free_bytes, post_init.free_bytes);
    assert_eq!(stats.free_blocks_by_order, post_init.free_blocks_by_order);

    dealloc_test_heap(heap_ptr, heap_layout);
}

#[test]
fn test_buddy_not_coalesced_while_sibling_allocated() {
    let (heap_ptr, heap_layout) = alloc_test_heap(TWO_TOP_BLOCKS_HEAP);
    let mut allocator = make_allocator(heap_ptr as usize, TWO_TOP_BLOCKS_HEAP);

    let p = allocator.alloc_order(0).unwrap();
    let q = allocator.alloc_order(0).unwrap();
    assert_eq!(q, p + PAGE_SIZE, "FIFO pop hands out the split sibling");

    allocator.free_order(p, 0);
    let stats = allocator.get_stats();
    assert_eq!(stats.free_blocks_by_order[0], 1, "no merge while q is live");
    assert_eq!(stats.allocated_bytes, PAGE_SIZE);

    allocator.free_order(q, 0);
    assert_eq!(allocator.get_stats().allocated_bytes, 0);

    dealloc_test_heap(heap_ptr, heap_layout);
}

#[test]
fn test_exhaustion_at_max_order() {
    let (heap_ptr, heap_layout) = alloc_test_heap(TWO_TOP_BLOCKS_HEAP);
    let mut allocator = make_allocator(heap_ptr as usize, TWO_TOP_BLOCKS_HEAP);

    let total = allocator.get_stats().total_bytes;
    let top_size = BuddyAllocator::<PAGE_SIZE>::order_to_size(MAX_ORDER);

    let mut blocks = Vec::new();
    loop {
        match allocator.alloc_order(MAX_ORDER) {
            Ok(addr) => blocks.push(addr),
            Err(err) => {
                assert_eq!(err, AllocError::NoMemory);
                break;
            }
        }
    }
    assert_eq!(blocks.len(), total / top_size);
    assert_eq!(allocator.get_stats().free_bytes, 0);

    for addr in blocks {
        allocator.free_order(addr, MAX_ORDER);
    }
    assert_eq!(allocator.get_stats().free_bytes, total);

    dealloc_test_heap(heap_ptr, heap_layout);
}

#[test]
fn test_exhaustion_at_intermediate_order() {
    let (heap_ptr, heap_layout) = alloc_test_heap(TWO_TOP_BLOCKS_HEAP);
    let mut allocator = make_allocator(heap_ptr as usize, TWO_TOP_BLOCKS_HEAP);

    let order = 7;
    let total = allocator.get_stats().total_bytes;
    let block_size = BuddyAllocator::<PAGE_SIZE>::order_to_size(order);

    let mut count = 0;
    while allocator.alloc_order(order).is_ok() {
        count += 1;
    }
    assert_eq!(count, total / block_size);

    dealloc_test_heap(heap_ptr, heap_layout);
}

#[test]
fn test_alignment_relative_to_region_base() {
    let (heap_ptr, heap_layout) = alloc_test_heap(TWO_TOP_BLOCKS_HEAP);
    let mut allocator = make_allocator(heap_ptr as usize, TWO_TOP_BLOCKS_HEAP);
    let base = allocator.region_base();

    for order in [0, 1, 3, 5, MAX_ORDER] {
        let addr = allocator.alloc_order(order).unwrap();
        let size = BuddyAllocator::<PAGE_SIZE>::order_to_size(order);
        assert_eq!(
            (addr - base) % size,
            0,
            "order {} block misaligned relative to region base",
            order
        );
        allocator.free_order(addr, order);
    }

    dealloc_test_heap(heap_ptr, heap_layout);
}

#[test]
fn test_allocated_extents_are_disjoint() {
    let (heap_ptr, heap_layout) = alloc_test_heap(TWO_TOP_BLOCKS_HEAP);
    let mut allocator = make_allocator(heap_ptr as usize, TWO_TOP_BLOCKS_HEAP);

    let mut extents: Vec<(usize, usize)> = Vec::new();
    for order in [0, 2, 0, 4, 1, 3, 0, 6] {
        let addr = allocator.alloc_order(order).unwrap();
        let size = BuddyAllocator::<PAGE_SIZE>::order_to_size(order);
        extents.push((addr, addr + size));
    }

    for (i, &(start_a, end_a)) in extents.iter().enumerate() {
        for &(start_b, end_b) in extents.iter().skip(i + 1) {
            assert!(
                end_a <= start_b || end_b <= start_a,
                "extents [{:#x},{:#x}) and [{:#x},{:#x}) overlap",
                start_a,
                end_a,
                start_b,
                end_b
            );
        }
    }

    dealloc_test_heap(heap_ptr, heap_layout);
}

#[test]
fn test_conservation_across_operation_stream() {
    let (heap_ptr, heap_layout) = alloc_test_heap(TWO_TOP_BLOCKS_HEAP);
    let mut allocator = make_allocator(heap_ptr as usize, TWO_TOP_BLOCKS_HEAP);
    let total = allocator.get_stats().total_bytes;

    let check = |a: &BuddyAllocator<PAGE_SIZE>| {
        let stats = a.get_stats();
        assert_eq!(stats.free_bytes + stats.allocated_bytes, total);
    };

    let mut live = Vec::new();
    for round in 0..4 {
        for order in [0, 1, 2, 0, 5, 3] {
            if let Ok(addr) = allocator.alloc_order(order) {
                live.push((addr, order));
            }
            check(&allocator);
        }
        // Free half each round, alternating ends.
        for _ in 0..live.len() / 2 {
            let (addr, order) = if round % 2 == 0 {
                live.remove(0)
            } else {
                live.pop().unwrap()
            };
            allocator.free_order(addr, order);
            check(&allocator);
        }
    }
    while let Some((addr, order)) = live.pop() {
        allocator.free_order(addr, order);
        check(&allocator);
    }

    // Everything merged back: the end state is the canonical decomposition.
    let stats = allocator.get_stats();
    assert_eq!(stats.free_bytes, total);
    assert_eq!(stats.free_blocks_by_order[MAX_ORDER], 2);
    for order in 0..MAX_ORDER {
        assert_eq!(stats.free_blocks_by_order[order], 0);
    }

    dealloc_test_heap(heap_ptr, heap_layout);
}

#[test]
fn test_merge_maximality_after_out_of_order_frees() {
    let (heap_ptr, heap_layout) = alloc_test_heap(TWO_TOP_BLOCKS_HEAP);
    let mut allocator = make_allocator(heap_ptr as usize, TWO_TOP_BLOCKS_HEAP);

    let mut pages = Vec::new();
    for _ in 0..16 {
        pages.push(allocator.alloc_order(0).unwrap());
    }
    // Free in a scattered order; every sibling pair must still merge.
    for &i in &[1, 14, 3, 12, 5, 10, 7, 8, 0, 15, 2, 13, 4, 11, 6, 9] {
        allocator.free_order(pages[i], 0);
    }

    let stats = allocator.get_stats();
    assert_eq!(stats.free_blocks_by_order[MAX_ORDER], 2);
    for order in 0..MAX_ORDER {
        assert_eq!(
            stats.free_blocks_by_order[order], 0,
            "unmerged buddies left at order {}",
            order
        );
    }

    dealloc_test_heap(heap_ptr, heap_layout);
}

#[test]
fn test_no_merge_across_order_boundary() {
    let (heap_ptr, heap_layout) = alloc_test_heap(TWO_TOP_BLOCKS_HEAP);
    let mut allocator = make_allocator(heap_ptr as usize, TWO_TOP_BLOCKS_HEAP);

    // Split the first top block down: p0 and p1 are sibling pages, the
    // rest of their order-1 parent's buddy is held at order 1.
    let p0 = allocator.alloc_order(0).unwrap();
    let p1 = allocator.alloc_order(0).unwrap();
    let q = allocator.alloc_order(1).unwrap();

    // Free p0 only: its order-0 buddy p1 is live, and the order-1 list
    // holds no entry for p0's parent, so nothing merges.
    allocator.free_order(p0, 0);
    let stats = allocator.get_stats();
    assert_eq!(stats.free_blocks_by_order[0], 1);

    allocator.free_order(p1, 0);
    allocator.free_order(q, 1);
    let stats = allocator.get_stats();
    assert_eq!(stats.free_blocks_by_order[MAX_ORDER], 2);

    dealloc_test_heap(heap_ptr, heap_layout);
}

#[test]
fn test_free_rejects_extent_past_region_end() {
    let (heap_ptr, heap_layout) = alloc_test_heap(MIXED_HEAP);
    let mut allocator = make_allocator(heap_ptr as usize, MIXED_HEAP);
    let before = allocator.get_stats();

    // 2047 managed slots: a max-order block at slot 1024 is aligned but
    // would run one slot past the region end.
    allocator.free_order(
        allocator.region_base() + (1 << MAX_ORDER) * PAGE_SIZE,
        MAX_ORDER,
    );
    assert_eq!(allocator.get_stats(), before);

    dealloc_test_heap(heap_ptr, heap_layout);
}

#[test]
fn test_round_trip_by_size() {
    let (heap_ptr, heap_layout) = alloc_test_heap(TWO_TOP_BLOCKS_HEAP);
    let mut allocator = make_allocator(heap_ptr as usize, TWO_TOP_BLOCKS_HEAP);
    let post_init = allocator.get_stats();

    for size in [1, PAGE_SIZE, PAGE_SIZE + 1, 7 * PAGE_SIZE, 100 * PAGE_SIZE] {
        let addr = allocator.alloc(size).unwrap();
        allocator.free(addr, size);
        let stats = allocator.get_stats();
        assert_eq!(stats.free_bytes, post_init.free_bytes);
        assert_eq!(stats.allocated_bytes, 0);
        assert_eq!(stats.free_blocks_by_order, post_init.free_blocks_by_order);
    }

    let stats = allocator.get_stats();
    assert_eq!(stats.total_allocations, 5);
    assert_eq!(stats.total_frees, 5);

    dealloc_test_heap(heap_ptr, heap_layout);
}

#[test]
fn test_allocated_memory_is_writable() {
    let (heap_ptr, heap_layout) = alloc_test_heap(TWO_TOP_BLOCKS_HEAP);
    let mut allocator = make_allocator(heap_ptr as usize, TWO_TOP_BLOCKS_HEAP);

    let addr = allocator.alloc_order(2).unwrap();
    let size = BuddyAllocator::<PAGE_SIZE>::order_to_size(2);
    unsafe {
        core::ptr::write_bytes(addr as *mut u8, 0x5A, size);
        assert_eq!(*(addr as *const u8), 0x5A);
        assert_eq!(*((addr + size - 1) as *const u8), 0x5A);
    }
    allocator.free_order(addr, 2);

    // The freed block's leading bytes now belong to the allocator again.
    let again = allocator.alloc_order(2).unwrap();
    assert_eq!(again, addr);

    dealloc_test_heap(heap_ptr, heap_layout);
}

#[test]
fn test_bitmap_reference_scenario() {
    // End-to-end check of the documented LSB-first convention.
    let mut backing = [0u8; 3];
    let mut bm = Bitmap::new();
    bm.init(backing.as_mut_ptr() as usize, 20).unwrap();

    bm.set(3);
    bm.set(4);
    bm.set(10);
    assert_eq!(bm.find_contiguous_zeros(5), Some(5));
    assert_eq!(bm.find_contiguous_zeros(8), Some(11));
    assert_eq!(bm.count_set(), 3);
    assert_eq!(bm.count_clear(), 17);
    assert_eq!(bm.find_first_set(), Some(3));
    assert_eq!(bm.find_first_zero(), Some(0));
}

//! Bitmap-backed buddy frame allocator
//!
//! This crate implements the physical memory manager of a small kernel:
//! - A packed bit vector tracking allocation state per minimum-size block
//! - An intrusive doubly linked list threaded through free blocks
//! - A buddy system allocator with per-order free lists, splitting on
//!   allocation and XOR-based coalescing on free
//!
//! The allocator owns a single contiguous, page-aligned physical region
//! handed to it once at boot. It contains no locking: callers serialize
//! all operations externally (interrupts masked around each entry point).
//! For zero structural waste, size the region to a multiple of
//! `2^MAX_ORDER * PAGE_SIZE`.

#![no_std]

extern crate alloc;

// Logging support - conditionally import log crate
#[cfg(feature = "log")]
extern crate log;

// Stub macros when log is disabled - these become no-ops
#[cfg(not(feature = "log"))]
macro_rules! error {
    ($($arg:tt)*) => {{}};
}
#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($arg:tt)*) => {{}};
}
#[cfg(not(feature = "log"))]
macro_rules! info {
    ($($arg:tt)*) => {{}};
}
#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($arg:tt)*) => {{}};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {{}};
}

/// Default minimum block size, equal to the x86 page size.
pub const DEFAULT_PAGE_SIZE: usize = 0x1000;

/// The error type used for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The allocator has not been initialized yet.
    Uninitialized,
    /// Invalid `size`, order, pointer or region parameter.
    InvalidParam,
    /// No free block at or above the requested order.
    NoMemory,
}

/// A [`Result`] type with [`AllocError`] as the error type.
pub type AllocResult<T = ()> = Result<T, AllocError>;

/// The base allocator inherited by other allocators.
pub trait BaseAllocator {
    /// Initialize the allocator with a free memory region.
    fn init(&mut self, start: usize, size: usize) -> AllocResult;

    /// Whether the allocator has been initialized.
    fn is_initialized(&self) -> bool;
}

/// Block-granularity allocator operating on whole minimum-size blocks.
pub trait BlockAllocator: BaseAllocator {
    /// The minimum block size in bytes.
    const MIN_BLOCK_SIZE: usize;

    /// Allocate a block of at least `size` bytes. Returns its address.
    fn alloc(&mut self, size: usize) -> AllocResult<usize>;

    /// Free a block previously returned by [`BlockAllocator::alloc`] with
    /// the same `size`.
    fn free(&mut self, addr: usize, size: usize);

    /// Returns total managed memory size in bytes.
    fn total_bytes(&self) -> usize;

    /// Returns allocated memory size in bytes.
    fn used_bytes(&self) -> usize;

    /// Returns available memory size in bytes.
    fn available_bytes(&self) -> usize;
}

#[inline]
#[allow(dead_code)]
const fn align_down(pos: usize, align: usize) -> usize {
    pos & !(align - 1)
}

#[inline]
const fn align_up(pos: usize, align: usize) -> usize {
    (pos + align - 1) & !(align - 1)
}

/// Checks whether the address has the demanded alignment.
///
/// Equivalent to `addr % align == 0`, but the alignment must be a power of two.
#[inline]
const fn is_aligned(base_addr: usize, align: usize) -> bool {
    base_addr & (align - 1) == 0
}

pub mod bitmap;
pub use bitmap::Bitmap;

pub mod list;
pub use list::{LinkedList, ListNode};

pub mod buddy;
pub use buddy::{BuddyAllocator, BuddyStats, MAX_ORDER};

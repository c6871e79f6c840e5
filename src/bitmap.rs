//! Packed bit vector over a caller-provided buffer
//!
//! Tracks one boolean per resource (here: one bit per minimum-size block),
//! packed 8 per byte, LSB-first within each byte. The backing buffer is
//! raw memory addressed as `usize`; the logical length in bits is fixed at
//! init and never reallocated.

use crate::{AllocError, AllocResult};

/// Number of bits per storage byte.
const BITS_PER_BYTE: usize = 8;

/// A fixed-length bit vector stored in a borrowed backing buffer.
///
/// Bit `i` lives in byte `i / 8` under the mask `1 << (i % 8)`. This
/// LSB-first convention is load-bearing: serialized bitmaps must stay
/// interoperable with reference test vectors.
///
/// Out-of-range indices are a silent no-op for mutators and read as clear;
/// higher layers perform their own range checks first.
pub struct Bitmap {
    /// Address of the backing buffer (`ceil(nbits / 8)` bytes).
    base: usize,
    /// Logical length in bits, immutable after [`Bitmap::init`].
    nbits: usize,
}

impl Bitmap {
    /// Create an empty bitmap (uninitialized, must call init())
    pub const fn new() -> Self {
        Self { base: 0, nbits: 0 }
    }

    /// Initialize over `nbits` bits backed by the buffer at `buffer`.
    ///
    /// The buffer must be valid for reads and writes of `ceil(nbits / 8)`
    /// bytes for as long as the bitmap is used. All bits start clear.
    pub fn init(&mut self, buffer: usize, nbits: usize) -> AllocResult {
        if buffer == 0 || nbits == 0 {
            return Err(AllocError::InvalidParam);
        }
        self.base = buffer;
        self.nbits = nbits;
        unsafe {
            core::ptr::write_bytes(buffer as *mut u8, 0, self.byte_len());
        }
        Ok(())
    }

    /// Logical length in bits.
    pub const fn len(&self) -> usize {
        self.nbits
    }

    /// Whether the bitmap has zero logical length (i.e. is uninitialized).
    pub const fn is_empty(&self) -> bool {
        self.nbits == 0
    }

    /// Number of backing bytes.
    const fn byte_len(&self) -> usize {
        (self.nbits + BITS_PER_BYTE - 1) / BITS_PER_BYTE
    }

    fn byte(&self, idx: usize) -> u8 {
        unsafe { *((self.base + idx) as *const u8) }
    }

    fn byte_mut(&mut self, idx: usize) -> &mut u8 {
        unsafe { &mut *((self.base + idx) as *mut u8) }
    }

    /// Set bit `index`. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize) {
        if index >= self.nbits {
            return;
        }
        *self.byte_mut(index / BITS_PER_BYTE) |= 1 << (index % BITS_PER_BYTE);
    }

    /// Clear bit `index`. Out-of-range indices are ignored.
    pub fn clear(&mut self, index: usize) {
        if index >= self.nbits {
            return;
        }
        *self.byte_mut(index / BITS_PER_BYTE) &= !(1 << (index % BITS_PER_BYTE));
    }

    /// Test bit `index`. Out-of-range indices read as clear.
    pub fn test(&self, index: usize) -> bool {
        if index >= self.nbits {
            return false;
        }
        self.byte(index / BITS_PER_BYTE) & (1 << (index % BITS_PER_BYTE)) != 0
    }

    /// Find the lowest clear bit, skipping all-set bytes.
    pub fn find_first_zero(&self) -> Option<usize> {
        for byte_idx in 0..self.byte_len() {
            let b = self.byte(byte_idx);
            if b == 0xFF {
                continue;
            }
            let index = byte_idx * BITS_PER_BYTE + (!b).trailing_zeros() as usize;
            if index >= self.nbits {
                // Only padding bits of the final byte are clear.
                return None;
            }
            return Some(index);
        }
        None
    }

    /// Find the lowest set bit, skipping all-clear bytes.
    pub fn find_first_set(&self) -> Option<usize> {
        for byte_idx in 0..self.byte_len() {
            let b = self.byte(byte_idx);
            if b == 0x00 {
                continue;
            }
            let index = byte_idx * BITS_PER_BYTE + b.trailing_zeros() as usize;
            if index >= self.nbits {
                return None;
            }
            return Some(index);
        }
        None
    }

    /// Find the lowest index `i` such that bits `i..i + count` are all
    /// clear. Returns `None` when `count` is 0, exceeds the length, or no
    /// such run exists.
    pub fn find_contiguous_zeros(&self, count: usize) -> Option<usize> {
        if count == 0 || count > self.nbits {
            return None;
        }

        let mut run_start = 0;
        let mut run_len = 0;
        let mut index = 0;
        while index < self.nbits {
            // Skip whole all-set bytes when not inside a run.
            if run_len == 0
                && index % BITS_PER_BYTE == 0
                && index + BITS_PER_BYTE <= self.nbits
                && self.byte(index / BITS_PER_BYTE) == 0xFF
            {
                index += BITS_PER_BYTE;
                continue;
            }

            if self.test(index) {
                run_len = 0;
            } else {
                if run_len == 0 {
                    run_start = index;
                }
                run_len += 1;
                if run_len == count {
                    return Some(run_start);
                }
            }
            index += 1;
        }
        None
    }

    /// Set bits `start..start + count`, clipped at the logical length.
    pub fn set_range(&mut self, start: usize, count: usize) {
        let end = self.nbits.min(start.saturating_add(count));
        for index in start..end {
            *self.byte_mut(index / BITS_PER_BYTE) |= 1 << (index % BITS_PER_BYTE);
        }
    }

    /// Clear bits `start..start + count`, clipped at the logical length.
    pub fn clear_range(&mut self, start: usize, count: usize) {
        let end = self.nbits.min(start.saturating_add(count));
        for index in start..end {
            *self.byte_mut(index / BITS_PER_BYTE) &= !(1 << (index % BITS_PER_BYTE));
        }
    }

    /// Whether bits `start..start + count` (clipped at the logical length)
    /// are all clear.
    pub fn is_range_clear(&self, start: usize, count: usize) -> bool {
        let end = self.nbits.min(start.saturating_add(count));
        let mut index = start;
        while index < end {
            // Whole-byte fast path.
            if index % BITS_PER_BYTE == 0 && index + BITS_PER_BYTE <= end {
                if self.byte(index / BITS_PER_BYTE) != 0 {
                    return false;
                }
                index += BITS_PER_BYTE;
                continue;
            }
            if self.test(index) {
                return false;
            }
            index += 1;
        }
        true
    }

    /// Count set bits. Padding bits of the final byte are excluded.
    pub fn count_set(&self) -> usize {
        let mut total = 0;
        let full_bytes = self.nbits / BITS_PER_BYTE;
        for byte_idx in 0..full_bytes {
            total += self.byte(byte_idx).count_ones() as usize;
        }
        let tail_bits = self.nbits % BITS_PER_BYTE;
        if tail_bits != 0 {
            let mask = (1u8 << tail_bits) - 1;
            total += (self.byte(full_bytes) & mask).count_ones() as usize;
        }
        total
    }

    /// Count clear bits within the logical length.
    pub fn count_clear(&self) -> usize {
        self.nbits - self.count_set()
    }
}

impl Default for Bitmap {
    fn default() -> Self {
        Self::new()
    }
}

//! Chunk layout and boundary tags.
//!
//! Every chunk begins with a two-word header:
//!
//! ```text
//!   +0  prev_size        -- size of the left neighbour, valid only if it's free
//!   +8  size_with_flags   -- this chunk's total size (header + payload), low 3 bits are flags
//!   +16 payload ...
//! ```
//!
//! While a chunk is free (and isn't the top), the first two words of what would be payload
//! are reused as the `fd`/`bk` links of the [`LlistNode`](crate::llist::LlistNode) threading it
//! through its bin. `MIN_CHUNK_SIZE` exists precisely so there's always room for those two
//! words in a freed chunk.

use core::mem::size_of;
use core::ptr::NonNull;

use crate::llist::LlistNode;

pub const WORD_SIZE: usize = size_of::<usize>();
/// Size of the two-word `{prev_size, size_with_flags}` header present in every chunk.
pub const HEADER_SIZE: usize = 2 * WORD_SIZE;
/// Smallest possible chunk: header plus room for a free chunk's `fd`/`bk` links.
pub const MIN_CHUNK_SIZE: usize = 4 * WORD_SIZE;
/// All in-band sizes are multiples of this.
pub const MEM_ALIGNMENT: usize = 16;

pub const PREV_INUSE: usize = 0x1;
pub const IS_MMAP: usize = 0x2;
pub const IS_INUSE: usize = 0x4;
const FLAG_MASK: usize = PREV_INUSE | IS_MMAP | IS_INUSE;
const SIZE_MASK: usize = !FLAG_MASK;

/// A pointer to a chunk header, i.e. the very start of a chunk (not its payload).
///
/// Thin wrapper around a raw pointer: chunks are plain offsets into memory the allocator
/// owns wholly, not Rust references, since their lifetime and aliasing don't fit the
/// borrow checker's model (two `ChunkPtr`s can legitimately alias the same bytes over time
/// as chunks are split, merged, and reused).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub(crate) struct ChunkPtr(pub(crate) NonNull<u8>);

impl ChunkPtr {
    #[inline]
    pub unsafe fn new(ptr: *mut u8) -> Self {
        debug_assert!(ptr as usize % MEM_ALIGNMENT == 0);
        Self(NonNull::new_unchecked(ptr))
    }

    #[inline]
    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }

    /// Recovers the chunk from a payload pointer previously handed to the client.
    ///
    /// # Safety
    /// `payload` must have been returned by this allocator's `alloc`.
    #[inline]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> Self {
        Self::new(payload.as_ptr().sub(HEADER_SIZE))
    }

    /// The pointer handed to the client: immediately past the two-word header.
    #[inline]
    pub fn payload(self) -> NonNull<u8> {
        // SAFETY: chunk pointers are never null, offsetting by the header can't make it so
        unsafe { NonNull::new_unchecked(self.as_ptr().add(HEADER_SIZE)) }
    }

    #[inline]
    fn prev_size_ptr(self) -> *mut usize {
        self.as_ptr().cast()
    }

    #[inline]
    fn size_with_flags_ptr(self) -> *mut usize {
        self.as_ptr().wrapping_add(WORD_SIZE).cast()
    }

    #[inline]
    pub fn prev_size(self) -> usize {
        unsafe { self.prev_size_ptr().read() }
    }

    #[inline]
    pub fn set_prev_size(self, size: usize) {
        unsafe { self.prev_size_ptr().write(size) }
    }

    #[inline]
    fn raw_size_with_flags(self) -> usize {
        unsafe { self.size_with_flags_ptr().read() }
    }

    #[inline]
    fn set_raw_size_with_flags(self, value: usize) {
        unsafe { self.size_with_flags_ptr().write(value) }
    }

    #[inline]
    pub fn size(self) -> usize {
        self.raw_size_with_flags() & SIZE_MASK
    }

    #[inline]
    pub fn set_size(self, size: usize) {
        debug_assert!(size % MEM_ALIGNMENT == 0);
        let flags = self.raw_size_with_flags() & FLAG_MASK;
        self.set_raw_size_with_flags(size | flags);
    }

    #[inline]
    pub fn prev_inuse(self) -> bool {
        self.raw_size_with_flags() & PREV_INUSE != 0
    }

    #[inline]
    pub fn set_prev_inuse(self, set: bool) {
        let v = self.raw_size_with_flags();
        self.set_raw_size_with_flags(if set { v | PREV_INUSE } else { v & !PREV_INUSE });
    }

    #[inline]
    pub fn is_mmap(self) -> bool {
        self.raw_size_with_flags() & IS_MMAP != 0
    }

    #[inline]
    pub fn set_is_mmap(self, set: bool) {
        let v = self.raw_size_with_flags();
        self.set_raw_size_with_flags(if set { v | IS_MMAP } else { v & !IS_MMAP });
    }

    #[inline]
    pub fn in_use(self) -> bool {
        self.raw_size_with_flags() & IS_INUSE != 0
    }

    #[inline]
    pub fn set_in_use(self, set: bool) {
        let v = self.raw_size_with_flags();
        self.set_raw_size_with_flags(if set { v | IS_INUSE } else { v & !IS_INUSE });
    }

    /// Initializes the full header of a brand new chunk.
    ///
    /// # Safety
    /// `self` must be writable for at least `HEADER_SIZE` bytes.
    #[inline]
    pub unsafe fn write_header(self, size: usize, prev_size: usize, prev_inuse: bool, in_use: bool, is_mmap: bool) {
        self.prev_size_ptr().write(prev_size);
        let mut flags = 0;
        if prev_inuse { flags |= PREV_INUSE; }
        if in_use { flags |= IS_INUSE; }
        if is_mmap { flags |= IS_MMAP; }
        self.set_raw_size_with_flags(size | flags);
    }

    /// The chunk immediately following this one in address order.
    #[inline]
    pub fn right_neighbor(self) -> ChunkPtr {
        unsafe { ChunkPtr::new(self.as_ptr().add(self.size())) }
    }

    /// The chunk immediately preceding this one, valid only when `prev_inuse()` is clear.
    #[inline]
    pub fn left_neighbor(self) -> ChunkPtr {
        debug_assert!(!self.prev_inuse());
        unsafe { ChunkPtr::new(self.as_ptr().sub(self.prev_size())) }
    }

    /// View this free chunk's payload as the bin's intrusive list node.
    #[inline]
    pub fn node_ptr(self) -> *mut LlistNode {
        self.payload().as_ptr().cast()
    }
}

#[inline]
pub const fn align_up(size: usize) -> usize {
    (size + (MEM_ALIGNMENT - 1)) & !(MEM_ALIGNMENT - 1)
}

/// `effective_size` from the spec: aligned, header-inclusive, never below `MIN_CHUNK_SIZE`.
///
/// Returns `None` on overflow.
#[inline]
pub fn effective_size(request: usize) -> Option<usize> {
    let with_header = request.checked_add(HEADER_SIZE)?;
    let aligned = align_up(with_header.max(MIN_CHUNK_SIZE));
    // align_up may itself overflow for requests near usize::MAX
    if aligned < with_header {
        None
    } else {
        Some(aligned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_size_floors_at_min_chunk() {
        assert_eq!(effective_size(0), Some(MIN_CHUNK_SIZE));
        assert_eq!(effective_size(1), Some(MIN_CHUNK_SIZE));
    }

    #[test]
    fn effective_size_aligns_up() {
        // 20 bytes + 16 byte header = 36, rounds up to 48
        assert_eq!(effective_size(20), Some(48));
    }

    #[test]
    fn effective_size_overflow_is_none() {
        assert_eq!(effective_size(usize::MAX), None);
        assert_eq!(effective_size(usize::MAX - 4), None);
    }
}

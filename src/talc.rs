//! The allocator core: top-chunk management, the allocation dispatcher, the release
//! dispatcher, and the coalescing engine that ties them together.

use core::ptr::NonNull;

use crate::bins::BinTable;
use crate::chunk::{effective_size, ChunkPtr, MIN_CHUNK_SIZE};
use crate::host::{round_up_to_page, Host, HEAP_PAGE};

#[cfg(feature = "counters")]
use crate::counters::Counters;

/// Requests at or below this many bytes of effective size are served from the sbrk
/// region (bins or top); above it, a chunk gets its own `mmap`.
pub const MMAP_THRESHOLD: usize = 131072;

/// The allocator's full mutable state: the bin table, the top chunk, and whatever
/// [`Host`] it talks to for more memory.
///
/// Deliberately holds no self-referential pointers (see [`crate::llist`]'s doc comment)
/// so it can be constructed on the stack and moved — into a `Box`, a `static`, wherever —
/// before its first use.
pub(crate) struct Talc<H: Host> {
    host: H,
    top: Option<ChunkPtr>,
    bins: BinTable,
    #[cfg(feature = "counters")]
    counters: Counters,
}

impl<H: Host> Talc<H> {
    pub const fn new(host: H) -> Self {
        Self {
            host,
            top: None,
            bins: BinTable::new(),
            #[cfg(feature = "counters")]
            counters: Counters::new(),
        }
    }

    /// A snapshot of this instance's lifetime allocation activity.
    #[cfg(feature = "counters")]
    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Services an `n`-byte request, returning a 16-byte-aligned payload pointer valid
    /// for at least `n` bytes, or `None` if the host is out of memory.
    pub fn allocate(&mut self, n: usize) -> Option<NonNull<u8>> {
        let m = effective_size(n)?;

        if m > MMAP_THRESHOLD {
            let p = self.allocate_mmapped(m)?;
            #[cfg(feature = "counters")]
            {
                self.counters.account_claim(round_up_to_page(m));
                self.counters.account_alloc(round_up_to_page(m));
            }
            return Some(p);
        }

        if let Some(chunk) = unsafe { self.bins.find_and_remove(m) } {
            chunk.set_in_use(true);
            chunk.right_neighbor().set_prev_inuse(true);
            #[cfg(feature = "counters")]
            self.counters.account_alloc(chunk.size());
            return Some(chunk.payload());
        }

        if self.top.is_none() {
            self.create_top()?;
        }
        if self.is_top_too_small(m) {
            self.extend_top(m)?;
        }

        let chunk = self.slice_top(m);
        #[cfg(feature = "counters")]
        self.counters.account_alloc(chunk.size());
        Some(chunk.payload())
    }

    /// Releases a payload pointer previously returned by `allocate`. `None` is a no-op.
    ///
    /// # Safety
    /// `p`, if present, must have been returned by this allocator's `allocate` and not
    /// already freed.
    pub unsafe fn free(&mut self, p: Option<NonNull<u8>>) {
        let Some(p) = p else { return };
        let chunk = ChunkPtr::from_payload(p);

        #[cfg(feature = "counters")]
        self.counters.account_dealloc(chunk.size());

        if chunk.is_mmap() {
            #[cfg(feature = "counters")]
            self.counters.account_unclaim(chunk.size());
            self.host.unmap(chunk.as_ptr(), chunk.size());
            return;
        }

        chunk.set_in_use(false);
        self.coalesce_and_dispose(chunk);
    }

    fn create_top(&mut self) -> Option<()> {
        debug_assert!(self.top.is_none());
        let span = unsafe { self.host.sbrk(HEAP_PAGE)? };
        let chunk = unsafe { ChunkPtr::new(span.base()) };
        unsafe { chunk.write_header(HEAP_PAGE, 0, true, false, false) };
        self.top = Some(chunk);
        #[cfg(feature = "counters")]
        self.counters.account_claim(HEAP_PAGE);
        Some(())
    }

    fn is_top_too_small(&self, m: usize) -> bool {
        let top = self.top.expect("top must exist before this check");
        top.size() < m + MIN_CHUNK_SIZE
    }

    fn extend_top(&mut self, m: usize) -> Option<()> {
        let top = self.top.expect("top must exist before extending");
        let needed = m + MIN_CHUNK_SIZE - top.size();
        let grown_by = round_up_to_page(needed);

        unsafe { self.host.sbrk(grown_by)? };
        top.set_size(top.size() + grown_by);
        #[cfg(feature = "counters")]
        self.counters.account_claim(grown_by);
        Some(())
    }

    /// Slices `m` bytes off the front of the top chunk, leaving a smaller valid top.
    fn slice_top(&mut self, m: usize) -> ChunkPtr {
        let top = self.top.expect("top must exist before slicing");
        debug_assert!(top.size() >= m + MIN_CHUNK_SIZE);

        let old_size = top.size();
        let prev_inuse = top.prev_inuse();
        unsafe { top.write_header(m, top.prev_size(), prev_inuse, true, false) };

        let new_top = top.right_neighbor();
        unsafe { new_top.write_header(old_size - m, m, true, false, false) };
        self.top = Some(new_top);

        top
    }

    fn allocate_mmapped(&mut self, m: usize) -> Option<NonNull<u8>> {
        let size = round_up_to_page(m);
        let span = unsafe { self.host.map(size)? };
        let chunk = unsafe { ChunkPtr::new(span.base()) };
        unsafe { chunk.write_header(span.size(), 0, true, true, true) };
        Some(chunk.payload())
    }

    /// The coalescing engine: left-merge, then right-merge, then check for top
    /// absorption, then either fold into the top or bin the result. Order matters:
    /// top-absorption must see the post-merge size.
    fn coalesce_and_dispose(&mut self, mut c: ChunkPtr) {
        if !c.prev_inuse() {
            let left = c.left_neighbor();
            unsafe { self.bins.remove(left) };
            c = merge(left, c);
        }

        let right = c.right_neighbor();
        if Some(right) != self.top && !right.in_use() && !right.is_mmap() {
            unsafe { self.bins.remove(right) };
            c = merge(c, right);
        }

        let right = c.right_neighbor();
        if Some(right) == self.top {
            let old_top = self.top.unwrap();
            let combined_size = c.size() + old_top.size();
            let prev_inuse = c.prev_inuse();
            unsafe { c.write_header(combined_size, 0, prev_inuse, false, false) };
            self.top = Some(c);
            return;
        }

        right.set_prev_size(c.size());
        right.set_prev_inuse(false);
        unsafe { self.bins.insert(c) };
    }
}

/// Merges two address-adjacent chunks `a` followed by `b` into one chunk based at `a`,
/// inheriting `a`'s `PREV_INUSE` bit.
fn merge(a: ChunkPtr, b: ChunkPtr) -> ChunkPtr {
    let combined_size = a.size() + b.size();
    let prev_inuse = a.prev_inuse();
    unsafe { a.write_header(combined_size, a.prev_size(), prev_inuse, false, false) };
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::MockHost;
    use std::vec::Vec;

    /// A `Talc` over a fixed arena, for exercising the core logic without touching the
    /// real process break. The backing `Vec` is returned alongside so it isn't dropped
    /// (and its heap buffer freed) while `talc` still holds raw pointers into it.
    fn new_talc() -> (Talc<MockHost>, Vec<u8>) {
        let mut arena = std::vec![0u8; 1 << 20];
        let host = unsafe { MockHost::new(arena.as_mut_ptr(), arena.len()) };
        (Talc::new(host), arena)
    }

    #[test]
    fn top_reuse_absorbs_freed_chunk() {
        let (mut talc, _arena) = new_talc();
        let p = talc.allocate(32).unwrap();
        unsafe { talc.free(Some(p)) };

        // the only non-top chunk merged back into top; a second allocate slices the
        // same address straight off top again.
        let q = talc.allocate(32).unwrap();
        assert_eq!(p, q);
    }

    #[test]
    fn binning_under_barrier_then_reuse() {
        let (mut talc, _arena) = new_talc();
        let p = talc.allocate(32).unwrap();
        let _barrier = talc.allocate(32).unwrap();
        unsafe { talc.free(Some(p)) };

        // effective size of a 32-byte request is 48 bytes, which bins at 48/16 = 3.
        let freed = unsafe { ChunkPtr::from_payload(p) };
        assert_eq!(unsafe { talc.bins.head(3) }, Some(freed));

        let r = talc.allocate(32).unwrap();
        assert_eq!(p, r);
    }

    #[test]
    fn large_path_chunk_bins_at_120() {
        let (mut talc, _arena) = new_talc();
        let p = talc.allocate(65536).unwrap();
        let _barrier = talc.allocate(32).unwrap();
        unsafe { talc.free(Some(p)) };

        let freed = unsafe { ChunkPtr::from_payload(p) };
        assert_eq!(unsafe { talc.bins.head(120) }, Some(freed));

        let q = talc.allocate(65536).unwrap();
        assert_eq!(p, q);
    }

    #[test]
    fn three_way_coalesce_merges_into_one_chunk() {
        let (mut talc, _arena) = new_talc();
        let a = talc.allocate(512).unwrap();
        let b = talc.allocate(512).unwrap();
        let c = talc.allocate(512).unwrap();
        let _barrier = talc.allocate(512).unwrap();

        unsafe {
            talc.free(Some(a));
            talc.free(Some(b));
            talc.free(Some(c));
        }

        // 3 chunks of effective size 528 coalesce into one 1584-byte chunk.
        let merged_chunk = unsafe { ChunkPtr::from_payload(a) };
        assert_eq!(merged_chunk.size(), 528 * 3);
        assert!(!merged_chunk.in_use());
    }

    #[test]
    fn large_request_routes_to_mmap_and_skips_bins() {
        let (mut talc, _arena) = new_talc();
        let p = talc.allocate(200_000).unwrap();
        let chunk = unsafe { ChunkPtr::from_payload(p) };
        assert!(chunk.is_mmap());
        unsafe { talc.free(Some(p)) };
    }

    #[test]
    fn zero_byte_request_yields_min_chunk() {
        let (mut talc, _arena) = new_talc();
        let p = talc.allocate(0).unwrap();
        let chunk = unsafe { ChunkPtr::from_payload(p) };
        assert_eq!(chunk.size(), MIN_CHUNK_SIZE);
        unsafe { talc.free(Some(p)) };
    }

    #[test]
    fn free_of_none_is_a_no_op() {
        let (mut talc, _arena) = new_talc();
        unsafe { talc.free(None) };
    }
}

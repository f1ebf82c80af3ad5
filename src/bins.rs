//! The bin table: 123 size-segregated free lists and the function that assigns a chunk
//! size to one of them.

use core::ptr::NonNull;

use crate::chunk::{ChunkPtr, MIN_CHUNK_SIZE};
use crate::llist::LlistNode;

/// Number of bin entries, including the unused sentinel at index 0 and the reserved,
/// never-populated "unsorted" slot at index 1 (see the indexing function's doc comment).
pub const BIN_COUNT: usize = 123;

const SMALL_MAX: usize = 1008;
const LARGE_64_MAX: usize = 3056;
const LARGE_512_MAX: usize = 11248;
const LARGE_4096_MAX: usize = 44016;
const LARGE_32768_MAX: usize = 142320;

#[inline]
fn ceil_div(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

/// Maps an aligned, header-inclusive chunk size to its bin index.
///
/// Bin 1 is reserved as an "unsorted" bin in dlmalloc lineage but this allocator never
/// defers insertion there: every free chunk is binned immediately on release, so the
/// indexing function never produces 1.
#[inline]
pub(crate) fn bin_index(size: usize) -> usize {
    debug_assert!(size >= MIN_CHUNK_SIZE);
    debug_assert!(size % 16 == 0);

    if size <= SMALL_MAX {
        size / 16
    } else if size <= LARGE_64_MAX {
        63 + ceil_div(size - SMALL_MAX, 64)
    } else if size <= LARGE_512_MAX {
        95 + ceil_div(size - LARGE_64_MAX, 512)
    } else if size <= LARGE_4096_MAX {
        111 + ceil_div(size - LARGE_512_MAX, 4096)
    } else if size <= LARGE_32768_MAX {
        119 + ceil_div(size - LARGE_4096_MAX, 32768)
    } else {
        BIN_COUNT - 1
    }
}

/// The 123-entry table of free-chunk lists.
///
/// Plain `Option<NonNull<LlistNode>>` heads rather than a sentinel-per-bin design: this
/// keeps `BinTable` freely movable (e.g. while it's still being built on the stack, before
/// being parked in a `static`), since nothing points back into the table itself.
pub(crate) struct BinTable {
    heads: [Option<NonNull<LlistNode>>; BIN_COUNT],
}

impl BinTable {
    pub const fn new() -> Self {
        Self { heads: [None; BIN_COUNT] }
    }

    /// Inserts a free chunk into its bin, keeping the bin in non-decreasing size order
    /// (ties are appended after the run of equal-size chunks, so the head is always the
    /// smallest candidate for a first-fit walk).
    ///
    /// # Safety
    /// `chunk` must be a valid free chunk not currently linked into any bin.
    pub unsafe fn insert(&mut self, chunk: ChunkPtr) {
        let bin = bin_index(chunk.size());
        let head = &mut self.heads[bin];
        let node = chunk.node_ptr();
        let new_size = chunk.size();

        let mut prev: Option<NonNull<LlistNode>> = None;
        let mut cur = *head;
        while let Some(c) = cur {
            if chunk_of_node(c).size() > new_size {
                break;
            }
            prev = Some(c);
            cur = (*c.as_ptr()).fd;
        }

        node.write(LlistNode { fd: cur, bk: prev });

        match prev {
            Some(p) => (*p.as_ptr()).fd = NonNull::new(node),
            None => *head = NonNull::new(node),
        }

        if let Some(c) = cur {
            (*c.as_ptr()).bk = NonNull::new(node);
        }
    }

    /// Removes a known free chunk from its bin.
    ///
    /// # Safety
    /// `chunk` must currently be linked into the bin `bin_index(chunk.size())`.
    pub unsafe fn remove(&mut self, chunk: ChunkPtr) {
        let bin = bin_index(chunk.size());
        LlistNode::unlink(&mut self.heads[bin], chunk.node_ptr());
    }

    /// First-fit lookup: starting from `bin_index(m)`, walks bins in ascending order and,
    /// within each, the list head-first, removing and returning the first chunk with
    /// `size >= m`. Returns `None` if no bin through 122 has a fit.
    ///
    /// # Safety
    /// Every node reachable from `self.heads` must be a valid, currently-binned free chunk.
    pub unsafe fn find_and_remove(&mut self, m: usize) -> Option<ChunkPtr> {
        for bin in bin_index(m)..BIN_COUNT {
            let mut cur = self.heads[bin];
            while let Some(c) = cur {
                let chunk = chunk_of_node(c);
                if chunk.size() >= m {
                    LlistNode::unlink(&mut self.heads[bin], c.as_ptr());
                    return Some(chunk);
                }
                cur = (*c.as_ptr()).fd;
            }
        }

        None
    }

    /// Returns the head chunk of `bin`, if any, without removing it. Exposed for testing
    /// and debug validation of bin-membership invariants.
    #[cfg(any(test, debug_assertions))]
    pub unsafe fn head(&self, bin: usize) -> Option<ChunkPtr> {
        self.heads[bin].map(chunk_of_node)
    }

    /// Iterates every chunk bin-by-bin, for debug-mode invariant scanning.
    #[cfg(any(test, debug_assertions))]
    pub unsafe fn iter_all(&self) -> impl Iterator<Item = (usize, ChunkPtr)> + '_ {
        self.heads.iter().enumerate().flat_map(|(bin, &head)| {
            LlistNode::iter(head).map(move |node| (bin, chunk_of_node(node)))
        })
    }
}

#[inline]
unsafe fn chunk_of_node(node: NonNull<LlistNode>) -> ChunkPtr {
    ChunkPtr::from_payload(node.cast())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_index_boundaries() {
        assert_eq!(bin_index(32), 2);
        assert_eq!(bin_index(48), 3);
        assert_eq!(bin_index(1008), 63);
        assert_eq!(bin_index(1009), 64);
        assert_eq!(bin_index(1072), 64);
        assert_eq!(bin_index(3056), 95);
        assert_eq!(bin_index(3057), 96);
        assert_eq!(bin_index(11248), 111);
        assert_eq!(bin_index(11249), 112);
        assert_eq!(bin_index(44016), 119);
        assert_eq!(bin_index(44017), 120);
        assert_eq!(bin_index(65536), 120);
        assert_eq!(bin_index(200_000), 122);
    }

    /// Builds `n` adjacent chunks of the given sizes inside `buf`, each already marked
    /// free (`IS_INUSE` clear) with a sane `prev_inuse`/`prev_size` so `ChunkPtr` methods
    /// stay well-defined, and returns their `ChunkPtr`s in address order.
    fn lay_out_chunks(buf: &mut [u8], sizes: &[usize]) -> std::vec::Vec<ChunkPtr> {
        let mut chunks = std::vec::Vec::new();
        let mut offset = 0usize;
        for &size in sizes {
            let chunk = unsafe { ChunkPtr::new(buf.as_mut_ptr().add(offset)) };
            unsafe { chunk.write_header(size, 0, true, false, false) };
            chunks.push(chunk);
            offset += size;
        }
        chunks
    }

    #[test]
    fn insert_keeps_bin_sorted_and_iter_all_sees_every_chunk() {
        let mut buf = std::vec![0u8; 4096];
        // three same-size-class chunks plus one from a different small bin.
        let chunks = lay_out_chunks(&mut buf, &[48, 32, 48, 48]);
        let mut bins = BinTable::new();

        for &c in &chunks {
            unsafe { bins.insert(c) };
        }

        // bin 2 (size 32) holds exactly one chunk; bin 3 (size 48) holds three, in the
        // order they were inserted since all three tie on size.
        assert_eq!(unsafe { bins.head(2) }, Some(chunks[1]));
        assert_eq!(unsafe { bins.head(3) }, Some(chunks[0]));

        let seen: std::vec::Vec<(usize, ChunkPtr)> = unsafe { bins.iter_all().collect() };
        assert_eq!(seen.len(), chunks.len());
        for (bin, chunk) in seen {
            assert_eq!(bin, bin_index(chunk.size()));
        }
    }

    #[test]
    fn find_and_remove_is_first_fit_and_unlinks() {
        let mut buf = std::vec![0u8; 4096];
        let chunks = lay_out_chunks(&mut buf, &[48, 64]);
        let mut bins = BinTable::new();
        for &c in &chunks {
            unsafe { bins.insert(c) };
        }

        let found = unsafe { bins.find_and_remove(48) };
        assert_eq!(found, Some(chunks[0]));
        // removed from its bin; a second search for the same size now has to cross into
        // the next bin up and finds the 64-byte chunk instead.
        assert_eq!(unsafe { bins.head(3) }, None);
        assert_eq!(unsafe { bins.find_and_remove(48) }, Some(chunks[1]));
    }
}

//! A dlmalloc-style, boundary-tag dynamic memory allocator.
//!
//! The allocator services a single-threaded client out of a contiguous program-break
//! region (the "top" chunk, grown page by page via `sbrk`) plus a direct-`mmap` escape
//! hatch for requests above [`talc::MMAP_THRESHOLD`]. Freed chunks are threaded through
//! 123 size-segregated bins and coalesced eagerly with their address-adjacent neighbors,
//! so fragmentation never compounds across frees.
//!
//! ```no_run
//! use brkalloc::Allocator;
//!
//! let mut arena = Allocator::new();
//! let p = arena.allocate(128);
//! assert!(!p.is_null());
//! unsafe { arena.free(p) };
//! ```
//!
//! Enable the `global` feature (on by default) to get [`global::GlobalTalc`], a
//! `#[global_allocator]`-ready wrapper synchronized by a caller-chosen
//! [`lock_api::RawMutex`]. Enable `allocator` for an `allocator_api2::alloc::Allocator`
//! impl usable with collections on stable Rust.
//!
//! Thread safety, `realloc`, and `calloc` are out of scope: this crate hands out whole
//! chunks and never resizes in place. Zero-byte requests succeed, returning a minimally
//! sized chunk rather than a sentinel.
//!
//! `sbrk` is a POSIX primitive, so the only [`host::Host`] implementation shipped today
//! is unix-backed; the host is reached exclusively through that trait, so porting to
//! another platform is a matter of adding an implementation, not touching C1–C8.

#![no_std]

#[cfg(test)]
extern crate std;

mod bins;
mod chunk;
#[cfg(feature = "counters")]
mod counters;
mod host;
mod llist;
mod span;
mod talc;

#[cfg(any(feature = "global", feature = "allocator"))]
pub mod global;

pub use chunk::MEM_ALIGNMENT;
pub use host::HEAP_PAGE;
pub use talc::MMAP_THRESHOLD;
#[cfg(feature = "counters")]
pub use counters::Counters;

use core::ptr::NonNull;

use host::UnixHost;
use talc::Talc;

/// An unsynchronized allocator instance, for embedding directly rather than installing
/// as `#[global_allocator]`. See [`global::GlobalTalc`] for the synchronized wrapper.
pub struct Allocator {
    inner: Talc<UnixHost>,
}

impl Allocator {
    /// Creates an empty allocator. No memory is claimed from the OS until the first call
    /// to [`allocate`](Allocator::allocate).
    pub const fn new() -> Self {
        Self { inner: Talc::new(UnixHost) }
    }

    /// Returns a 16-byte-aligned pointer valid for reads and writes of at least `n`
    /// bytes, or null if the host is out of memory. `n == 0` still returns a valid,
    /// freeable pointer.
    pub fn allocate(&mut self, n: usize) -> *mut u8 {
        match self.inner.allocate(n) {
            Some(p) => p.as_ptr(),
            None => core::ptr::null_mut(),
        }
    }

    /// Releases a pointer previously returned by [`allocate`](Allocator::allocate). A
    /// null `p` is a no-op.
    ///
    /// # Safety
    /// `p` must be null or a pointer this allocator handed out that hasn't already been
    /// freed.
    pub unsafe fn free(&mut self, p: *mut u8) {
        unsafe { self.inner.free(NonNull::new(p)) };
    }

    /// A snapshot of this instance's lifetime allocation activity.
    #[cfg(feature = "counters")]
    pub fn counters(&self) -> Counters {
        self.inner.counters()
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

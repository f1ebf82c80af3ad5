//! The operating-system interface: extending the program break for the top chunk, and
//! mapping/unmapping anonymous pages for the large-allocation escape hatch.
//!
//! Kept as a trait so the core allocator logic in [`crate::talc`] never touches `libc`
//! directly and can be exercised against a fake in tests.

use crate::span::Span;

/// Program-break extension and anonymous page mapping.
///
/// # Safety
/// Implementors must return memory that is readable/writable for the full requested
/// length and not aliased by anything else, or `Err` if no such memory is available.
pub(crate) unsafe trait Host {
    /// Extends the program break by `delta` bytes, returning the span of the newly
    /// available region. `delta` is always a multiple of the page size.
    unsafe fn sbrk(&self, delta: usize) -> Option<Span>;

    /// Maps a fresh, zeroed, anonymous region of at least `size` bytes.
    unsafe fn map(&self, size: usize) -> Option<Span>;

    /// Unmaps a region previously returned by `map` with the same size.
    unsafe fn unmap(&self, base: *mut u8, size: usize);
}

/// The page size the top chunk grows by and that mmap requests are rounded up to.
pub const HEAP_PAGE: usize = 32768;

#[inline]
pub(crate) fn round_up_to_page(size: usize) -> usize {
    (size + (HEAP_PAGE - 1)) & !(HEAP_PAGE - 1)
}

#[cfg(unix)]
pub(crate) use unix::UnixHost;

#[cfg(unix)]
mod unix {
    use super::Host;

    /// The only real [`Host`]: extends the break via `libc::sbrk` and maps large
    /// requests with anonymous, private `mmap`, matching how a freestanding allocator
    /// would talk to the kernel on any unix-like target.
    #[derive(Debug, Default, Clone, Copy)]
    pub(crate) struct UnixHost;

    unsafe impl Host for UnixHost {
        unsafe fn sbrk(&self, delta: usize) -> Option<Span> {
            if delta == 0 {
                return None;
            }

            let prev = libc::sbrk(delta as libc::intptr_t);
            if prev == usize::MAX as *mut libc::c_void {
                None
            } else {
                Some(Span::from_base_size(prev.cast(), delta))
            }
        }

        unsafe fn map(&self, size: usize) -> Option<Span> {
            let ptr = libc::mmap(
                core::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );

            if ptr == libc::MAP_FAILED {
                None
            } else {
                Some(Span::from_base_size(ptr.cast(), size))
            }
        }

        unsafe fn unmap(&self, base: *mut u8, size: usize) {
            libc::munmap(base.cast(), size);
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! A host backed by a fixed, already-allocated buffer, for tests that exercise the
    //! chunk/bin machinery without asking the real OS for memory.

    use super::Host;
    use crate::span::Span;
    use core::cell::Cell;

    pub(crate) struct MockHost {
        arena: *mut u8,
        len: usize,
        used: Cell<usize>,
    }

    impl MockHost {
        /// # Safety
        /// `arena` must be valid for reads and writes for `len` bytes for the host's
        /// entire lifetime.
        pub(crate) unsafe fn new(arena: *mut u8, len: usize) -> Self {
            Self { arena, len, used: Cell::new(0) }
        }
    }

    unsafe impl Host for MockHost {
        unsafe fn sbrk(&self, delta: usize) -> Option<Span> {
            let used = self.used.get();
            if used + delta > self.len {
                return None;
            }
            let base = self.arena.add(used);
            self.used.set(used + delta);
            Some(Span::from_base_size(base, delta))
        }

        unsafe fn map(&self, size: usize) -> Option<Span> {
            // Mmap requests are served from the same mock arena for tests; real
            // separation from the sbrk region isn't needed to exercise the logic.
            self.sbrk(super::round_up_to_page(size))
        }

        unsafe fn unmap(&self, _base: *mut u8, _size: usize) {}
    }
}

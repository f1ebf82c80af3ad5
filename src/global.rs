//! A `#[global_allocator]`-ready wrapper around [`Talc`], synchronized by a
//! caller-chosen [`lock_api::RawMutex`].
//!
//! Mirrors the shape of a typical `lock_api`-based global allocator wrapper: the core
//! logic stays single-threaded and oblivious to locking, and this module is the only
//! place that knows about synchronization at all.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;

use lock_api::{Mutex, RawMutex};

use crate::chunk::MEM_ALIGNMENT;
use crate::host::UnixHost;
use crate::talc::Talc;

/// Wraps a [`Talc`] behind a `lock_api` mutex so it can back `#[global_allocator]`.
///
/// `R` is left generic so embedders can plug in [`lock_api::RawMutex`] impls other than
/// the thread-blocking default, e.g. a single-threaded `AssumeUnlockable` for targets
/// that genuinely never contend. There is no `OomHandler` hook: the allocator either has
/// memory or it doesn't, and `GlobalAlloc` surfaces that as a null/abort exactly as
/// `alloc` expects.
pub struct GlobalTalc<R: RawMutex> {
    inner: Mutex<R, Talc<UnixHost>>,
}

impl<R: RawMutex> GlobalTalc<R> {
    /// Creates a new, empty allocator. No memory is claimed from the OS until the first
    /// allocation.
    pub const fn new() -> Self {
        Self { inner: Mutex::new(Talc::new(UnixHost)) }
    }
}

impl<R: RawMutex> Default for GlobalTalc<R> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<R: RawMutex> GlobalAlloc for GlobalTalc<R> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > MEM_ALIGNMENT {
            return core::ptr::null_mut();
        }

        match self.inner.lock().allocate(layout.size()) {
            Some(p) => p.as_ptr(),
            None => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { self.inner.lock().free(NonNull::new(ptr)) };
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = self.alloc(layout);
        if !ptr.is_null() {
            core::ptr::write_bytes(ptr, 0, layout.size());
        }
        ptr
    }
}

#[cfg(feature = "allocator")]
unsafe impl<R: RawMutex> allocator_api2::alloc::Allocator for GlobalTalc<R> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, allocator_api2::alloc::AllocError> {
        if layout.align() > MEM_ALIGNMENT {
            return Err(allocator_api2::alloc::AllocError);
        }

        match self.inner.lock().allocate(layout.size()) {
            Some(p) => {
                let slice = core::ptr::slice_from_raw_parts_mut(p.as_ptr(), layout.size());
                // SAFETY: `p` is non-null, so the fat pointer built from it is too.
                Ok(unsafe { NonNull::new_unchecked(slice) })
            }
            None => Err(allocator_api2::alloc::AllocError),
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _layout: Layout) {
        unsafe { self.inner.lock().free(Some(ptr)) };
    }
}

/// A dummy [`RawMutex`] for targets that are provably single-threaded, skipping any
/// synchronization overhead. Taking this lock can never actually be contended; using it
/// from more than one thread is undefined behavior.
pub struct AssumeUnlockable;

unsafe impl RawMutex for AssumeUnlockable {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = AssumeUnlockable;

    type GuardMarker = lock_api::GuardSend;

    fn lock(&self) {}

    fn try_lock(&self) -> bool {
        true
    }

    unsafe fn unlock(&self) {}
}

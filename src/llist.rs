//! The intrusive doubly linked list used to thread free chunks through a bin.
//!
//! Unlike a sentinel-based circular list, each bin simply holds `Option<NonNull<LlistNode>>`
//! as its head — there's no node embedded in the allocator's own state, so the allocator is
//! free to move in memory (e.g. live on the stack before being parked in a `static`) without
//! invalidating any self-referential pointers. The cost is one extra branch on
//! insert/remove at the list boundaries, which is cheap next to a free-list walk.
//!
//! # Safety
//! `LlistNode`s are self- and inter-referential via raw pointers into chunk payloads. They
//! must never be moved once linked; doing so leaves dangling `fd`/`bk` pointers in neighbours.

use core::ptr::NonNull;

#[derive(Debug, Clone, Copy)]
pub(crate) struct LlistNode {
    pub fd: Option<NonNull<LlistNode>>,
    pub bk: Option<NonNull<LlistNode>>,
}

impl LlistNode {
    /// Unlinks `node` from the list whose head is `*head`.
    ///
    /// # Safety
    /// `node` must currently be linked into the list `*head` refers to.
    #[inline]
    pub unsafe fn unlink(head: &mut Option<NonNull<LlistNode>>, node: *mut LlistNode) {
        let fd = (*node).fd;
        let bk = (*node).bk;

        match bk {
            Some(bk) => (*bk.as_ptr()).fd = fd,
            None => *head = fd,
        }

        if let Some(fd) = fd {
            (*fd.as_ptr()).bk = bk;
        }
    }

    /// Iterates every node in the list head-first.
    ///
    /// # Safety
    /// The list must remain valid for the duration of iteration.
    pub unsafe fn iter(head: Option<NonNull<LlistNode>>) -> IterMut {
        IterMut { cur: head }
    }
}

#[derive(Debug, Clone, Copy)]
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub(crate) struct IterMut {
    cur: Option<NonNull<LlistNode>>,
}

impl Iterator for IterMut {
    type Item = NonNull<LlistNode>;

    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.cur?;
        self.cur = unsafe { (*cur.as_ptr()).fd };
        Some(cur)
    }
}

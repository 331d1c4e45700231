//! Segments: one contiguous byte range inside one block.

use crate::memory::{HeapBlock, SlotId};
use crate::pool::PoolShared;
use std::ptr::NonNull;
use std::sync::Arc;

/// What keeps a segment's bytes alive.
pub(crate) enum Backing {
    /// One reference on raw block `block` of `pool`.
    Pooled {
        pool: Arc<PoolShared>,
        block: SlotId,
    },
    /// Shared heap allocation.
    Heap(Arc<HeapBlock>),
    /// Reference handed back to the pool in a batch; nothing to release.
    Detached,
}

/// A `(block, pointer, length)` view of bytes inside one raw block.
///
/// Each segment owns one reference on its block: cloning a pooled segment
/// increments the block's refcount, dropping it decrements it, and the
/// block goes back on the free list when the count reaches zero. Several
/// segments, in the same or different records, may point into the same
/// block with overlapping or disjoint ranges.
///
/// Segments are `Send` so that records can move between threads as a
/// [`SendBuffer`](super::SendBuffer). They are not `Sync`: the bytes are
/// written through shared views under the single-writer rule of records.
pub struct Segment {
    backing: Backing,
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the backing keeps the memory alive independently of the thread
// that dropped or cloned it; pooled refcounts are updated under the pool
// mutex. Byte access follows the record's single-writer rule.
unsafe impl Send for Segment {}

impl Segment {
    /// Adopt an existing reference on pooled block `block`.
    pub(crate) fn pooled(pool: Arc<PoolShared>, block: SlotId, ptr: NonNull<u8>, len: usize) -> Self {
        Self {
            backing: Backing::Pooled { pool, block },
            ptr,
            len,
        }
    }

    /// A segment covering all of a heap block.
    pub(crate) fn heap(block: Arc<HeapBlock>) -> Self {
        let ptr = block.as_ptr();
        let len = block.len();
        Self {
            backing: Backing::Heap(block),
            ptr,
            len,
        }
    }

    /// Length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length segment.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Start of the segment's bytes.
    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Raw block id, `None` for heap-backed segments.
    #[inline]
    pub fn block_id(&self) -> Option<SlotId> {
        match &self.backing {
            Backing::Pooled { block, .. } => Some(*block),
            _ => None,
        }
    }

    /// Id of the owning pool, `None` for heap-backed segments.
    pub fn pool_id(&self) -> Option<u64> {
        match &self.backing {
            Backing::Pooled { pool, .. } => Some(pool.id()),
            _ => None,
        }
    }

    /// True if the bytes live in a pool's data arena.
    #[inline]
    pub fn is_pooled(&self) -> bool {
        matches!(self.backing, Backing::Pooled { .. })
    }

    /// Borrow the segment's bytes.
    ///
    /// # Safety
    ///
    /// Nothing may write to these bytes while the slice is alive. That
    /// includes [`BufferHandle::write_at`](super::BufferHandle::write_at)
    /// and cursor copies through this record or through any record sharing
    /// the block, on any thread.
    #[inline]
    pub unsafe fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr..ptr+len lies inside the block kept alive by
        // `backing`; the caller rules out writers.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Block id if this segment belongs to `pool`.
    #[inline]
    pub(crate) fn block_in(&self, pool: &Arc<PoolShared>) -> Option<SlotId> {
        match &self.backing {
            Backing::Pooled { pool: owner, block } if Arc::ptr_eq(owner, pool) => Some(*block),
            _ => None,
        }
    }

    /// Hand this segment's block reference to the caller, who releases it
    /// in a batch. The segment is left detached and drops as a no-op.
    pub(crate) fn detach_from(&mut self, pool: &Arc<PoolShared>) -> Option<SlotId> {
        let block = self.block_in(pool)?;
        self.backing = Backing::Detached;
        Some(block)
    }

    /// Copy of this segment that does not take a block reference; the
    /// caller must already hold one for it.
    pub(crate) fn shallow_copy(&self) -> Segment {
        let backing = match &self.backing {
            Backing::Pooled { pool, block } => Backing::Pooled {
                pool: Arc::clone(pool),
                block: *block,
            },
            Backing::Heap(block) => Backing::Heap(Arc::clone(block)),
            Backing::Detached => Backing::Detached,
        };
        Segment {
            backing,
            ptr: self.ptr,
            len: self.len,
        }
    }

    /// Drop the first `n` bytes in place. Same block, same reference.
    #[inline]
    pub(crate) fn advance(&mut self, n: usize) {
        assert!(n <= self.len, "advance {n} past segment of {} bytes", self.len);
        // SAFETY: n <= len keeps the pointer inside (or one past) the range.
        self.ptr = unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(n)) };
        self.len -= n;
    }

    /// Keep only the first `len` bytes.
    #[inline]
    pub(crate) fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    /// Split at `at`: `self` keeps `[0, at)`, the returned segment covers
    /// `[at, len)` with its own block reference.
    pub(crate) fn split_off(&mut self, at: usize) -> Segment {
        let mut right = self.clone();
        right.advance(at);
        self.len = at;
        right
    }
}

impl Clone for Segment {
    fn clone(&self) -> Self {
        if let Backing::Pooled { pool, block } = &self.backing {
            pool.retain_blocks(std::slice::from_ref(block));
        }
        self.shallow_copy()
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if let Backing::Pooled { pool, block } = &self.backing {
            pool.release_blocks(std::slice::from_ref(block));
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Segment");
        match &self.backing {
            Backing::Pooled { pool, block } => s.field("pool", &pool.id()).field("block", block),
            Backing::Heap(_) => s.field("heap", &true),
            Backing::Detached => s.field("detached", &true),
        };
        s.field("ptr", &self.ptr).field("len", &self.len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_segment() {
        let segment = Segment::heap(Arc::new(HeapBlock::from_vec(b"abcdef".to_vec())));
        assert_eq!(segment.len(), 6);
        assert!(!segment.is_pooled());
        assert_eq!(segment.block_id(), None);
        assert_eq!(unsafe { segment.as_slice() }, b"abcdef");
    }

    #[test]
    fn test_advance_and_truncate() {
        let mut segment = Segment::heap(Arc::new(HeapBlock::from_vec(b"abcdef".to_vec())));
        segment.advance(2);
        assert_eq!(unsafe { segment.as_slice() }, b"cdef");
        segment.truncate(3);
        assert_eq!(unsafe { segment.as_slice() }, b"cde");
        segment.truncate(10);
        assert_eq!(segment.len(), 3);
    }

    #[test]
    fn test_split_off_heap() {
        let mut left = Segment::heap(Arc::new(HeapBlock::from_vec(b"abcdef".to_vec())));
        let right = left.split_off(4);
        assert_eq!(unsafe { left.as_slice() }, b"abcd");
        assert_eq!(unsafe { right.as_slice() }, b"ef");
    }

    #[test]
    #[should_panic(expected = "past segment")]
    fn test_advance_past_end() {
        let mut segment = Segment::heap(Arc::new(HeapBlock::from_vec(vec![0; 4])));
        segment.advance(5);
    }
}

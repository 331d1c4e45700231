//! Heap-backed blocks for records that live outside any pool.
//!
//! Externally supplied memory (`BufferHandle::from_vec`) is wrapped in a
//! `HeapBlock` and shared between segments through an `Arc`. The block is
//! freed when the last segment referencing it is dropped.

use std::ptr::NonNull;

/// An owned, fixed-size heap allocation.
///
/// The allocation is held as a raw pointer rather than a `Box` so that
/// segments can write through [`HeapBlock::as_ptr`] while the block itself
/// is shared.
pub struct HeapBlock {
    ptr: NonNull<u8>,
    len: usize,
}

impl HeapBlock {
    /// Take ownership of an existing vector.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let boxed = data.into_boxed_slice();
        let len = boxed.len();
        let raw = Box::into_raw(boxed).cast::<u8>();
        // SAFETY: Box::into_raw never returns null.
        let ptr = unsafe { NonNull::new_unchecked(raw) };
        Self { ptr, len }
    }

    /// Pointer to the start of the block.
    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the block holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for HeapBlock {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from Box::into_raw of a boxed slice in from_vec.
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.len,
            )));
        }
    }
}

// SAFETY: HeapBlock uniquely owns its allocation; concurrent access to the
// bytes follows the same single-writer rule as pooled blocks.
unsafe impl Send for HeapBlock {}
unsafe impl Sync for HeapBlock {}

impl std::fmt::Debug for HeapBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapBlock").field("len", &self.len).finish()
    }
}

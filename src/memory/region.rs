//! memfd-backed memory region for the data arena.
//!
//! The data arena is one `memfd_create` + `mmap` region subdivided into
//! equally sized raw blocks. One file descriptor covers every block, so a
//! collaborator that registers memory with I/O hardware (or shares it with
//! another process) registers the arena once instead of once per buffer.
//!
//! # Memory Layout
//!
//! ```text
//! ┌─────────┬─────────┬─────────┬─────────┬─────────┐
//! │ Block 0 │ Block 1 │ Block 2 │   ...   │ Block N │
//! └─────────┴─────────┴─────────┴─────────┴─────────┘
//! ^                                                  ^
//! base                                     base + len
//! ```
//!
//! Block `i` starts at `base + i * stride`, where `stride` is the block size
//! rounded up to the configured alignment. The mapping is page aligned.

use crate::error::{Error, Result};
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use rustix::mm::{MapFlags, ProtFlags};
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr::NonNull;

/// A shared, read-write mapping of an anonymous memfd.
pub struct MappedRegion {
    /// The memfd file descriptor.
    fd: OwnedFd,
    /// Base pointer to the mapping.
    base: NonNull<u8>,
    /// Length of the mapping in bytes.
    len: usize,
}

impl MappedRegion {
    /// Create and map a zero-filled region of `len` bytes.
    pub fn new(name: &str, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::AllocationFailed("region length must be > 0".into()));
        }

        let fd = rustix::fs::memfd_create(name, rustix::fs::MemfdFlags::CLOEXEC)?;
        rustix::fs::ftruncate(&fd, len as u64)?;

        // SAFETY: fresh mapping of a file we just sized; no existing memory
        // is aliased.
        let base = unsafe {
            rustix::mm::mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )?
        };

        let base = NonNull::new(base.cast::<u8>())
            .ok_or_else(|| Error::AllocationFailed("mmap returned null".into()))?;

        Ok(Self { fd, base, len })
    }

    /// Base address of the mapping.
    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Pointer `offset` bytes into the mapping.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is past the end of the region.
    #[inline]
    pub fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(offset < self.len, "offset {offset} outside region of {} bytes", self.len);
        // SAFETY: offset checked against the mapping length above.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }

    /// Length of the mapping in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; zero-length regions are rejected at creation.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The raw file descriptor.
    #[inline]
    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Touch every page so later block accesses do not fault.
    pub fn prefault(&self) {
        let page_size = rustix::param::page_size();
        let ptr = self.base.as_ptr();
        for offset in (0..self.len).step_by(page_size) {
            // SAFETY: offset < len, inside the mapping.
            unsafe {
                std::ptr::read_volatile(ptr.add(offset));
            }
        }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: base/len describe the mapping created in `new`, and the pool
        // only drops a region once no block in it is referenced.
        unsafe {
            let _ = rustix::mm::munmap(self.base.as_ptr().cast(), self.len);
        }
    }
}

// SAFETY: the region is a plain shared mapping; access to individual blocks
// is coordinated by the pool's refcounts.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl AsFd for MappedRegion {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("fd", &self.raw_fd())
            .field("len", &self.len)
            .finish()
    }
}

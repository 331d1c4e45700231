//! Backing memory for segbuf.
//!
//! This module provides the storage layer underneath the pool:
//!
//! - [`MappedRegion`]: one memfd mapping that holds every raw block of a data arena
//! - [`HeapBlock`]: heap storage for externally supplied or pool-less buffers
//! - [`Slab`]: refcounts and FIFO free list shared by both arena kinds
//! - [`defaults`]: sizes a pool uses when it configures itself lazily
//!
//! # Example
//!
//! ```rust,ignore
//! use segbuf::memory::{MappedRegion, Slab};
//!
//! // 16 blocks of 64KB in one fd
//! let region = MappedRegion::new("readout", 16 * 64 * 1024)?;
//! let mut slab = Slab::new(64 * 1024, 16);
//!
//! let id = slab.pop_free().expect("slab not exhausted");
//! let block = region.ptr_at(id as usize * slab.slot_size());
//! ```

pub mod defaults;
mod heap;
mod region;
mod slab;

pub use heap::HeapBlock;
pub use region::MappedRegion;
pub use slab::{Slab, SlotId};

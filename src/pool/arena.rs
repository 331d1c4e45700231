//! The pool's two arenas.
//!
//! - [`BlockArena`]: raw payload blocks, one memfd region sliced by stride
//! - [`DescriptorArena`]: segment tables for buffer records
//!
//! Both are a [`Slab`] plus their own storage. A descriptor block's storage
//! is a segment table (`Vec<Segment>` with room for `max_segments`) that is
//! parked in the arena while the block is free and lent to a record while
//! it is in use, so recycling a descriptor recycles its allocation too.

use super::PoolConfig;
use crate::buffer::Segment;
use crate::error::{Error, Result};
use crate::memory::{MappedRegion, Slab, SlotId};
use std::ptr::NonNull;

/// Raw data blocks.
pub(crate) struct BlockArena {
    slab: Slab,
    region: MappedRegion,
    stride: usize,
}

impl BlockArena {
    pub(crate) fn new(config: &PoolConfig) -> Result<Self> {
        let stride = config.block_stride();
        let region = MappedRegion::new(&config.name, stride * config.block_count)?;
        Ok(Self {
            slab: Slab::new(config.block_size, config.block_count),
            region,
            stride,
        })
    }

    /// Start of raw block `id`.
    #[inline]
    pub(crate) fn block_ptr(&self, id: SlotId) -> NonNull<u8> {
        self.region.ptr_at(id as usize * self.stride)
    }

    #[inline]
    pub(crate) fn slab(&self) -> &Slab {
        &self.slab
    }

    #[inline]
    pub(crate) fn slab_mut(&mut self) -> &mut Slab {
        &mut self.slab
    }

    #[inline]
    pub(crate) fn region(&self) -> &MappedRegion {
        &self.region
    }
}

/// Descriptor blocks holding record segment tables.
pub(crate) struct DescriptorArena {
    slab: Slab,
    /// Parked tables, indexed by descriptor id. `None` until first use.
    tables: Vec<Option<Vec<Segment>>>,
    max_segments: usize,
}

impl DescriptorArena {
    pub(crate) fn new(config: &PoolConfig) -> Self {
        let count = config.descriptor_count();
        Self {
            slab: Slab::new(descriptor_slot_size(config.max_segments), count),
            tables: (0..count).map(|_| None).collect(),
            max_segments: config.max_segments,
        }
    }

    /// Pop the oldest free descriptor and lend out its table (empty).
    pub(crate) fn take(&mut self) -> Option<(SlotId, Vec<Segment>)> {
        let id = self.slab.pop_free()?;
        let table = self.tables[id as usize]
            .take()
            .unwrap_or_else(|| Vec::with_capacity(self.max_segments));
        Some((id, table))
    }

    /// Return a descriptor and its (emptied) table.
    ///
    /// A descriptor is never shared, so its refcount must be exactly 1 here.
    pub(crate) fn give_back(&mut self, id: SlotId, table: Vec<Segment>) -> Result<()> {
        match self.slab.refcount(id) {
            Some(1) => {}
            other => {
                return Err(Error::PoolCorrupted(format!(
                    "descriptor {id} released with refcount {other:?}"
                )));
            }
        }
        if !table.is_empty() {
            return Err(Error::PoolCorrupted(format!(
                "descriptor {id} released with {} live segments",
                table.len()
            )));
        }
        self.slab.release(id)?;
        if table.capacity() >= self.max_segments {
            self.tables[id as usize] = Some(table);
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn slab(&self) -> &Slab {
        &self.slab
    }

    #[inline]
    pub(crate) fn max_segments(&self) -> usize {
        self.max_segments
    }
}

/// Both arenas of a configured pool.
pub(crate) struct Arenas {
    pub(crate) blocks: BlockArena,
    pub(crate) descriptors: DescriptorArena,
}

impl Arenas {
    pub(crate) fn new(config: &PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            blocks: BlockArena::new(config)?,
            descriptors: DescriptorArena::new(config),
        })
    }

    pub(crate) fn block_size(&self) -> usize {
        self.blocks.slab().slot_size()
    }
}

/// Bytes one descriptor block accounts for: its segment table plus the
/// record header.
pub(crate) fn descriptor_slot_size(max_segments: usize) -> usize {
    max_segments * std::mem::size_of::<Segment>() + std::mem::size_of::<crate::buffer::Record>()
}

//! Fixed-size slot bookkeeping with a FIFO free list.
//!
//! Both pool arenas (raw data blocks and descriptor blocks) are a `Slab`:
//! `slot_count` slots of `slot_size` bytes, each with its own refcount.
//! The slab tracks identities only; the arena that embeds it owns the
//! actual storage.
//!
//! # Invariant
//!
//! At every point where the owning lock is released,
//! `refcount(id) == 0` if and only if `id` appears exactly once in the
//! free list. [`Slab::verify`] checks this.
//!
//! Slots leave the free list from the front and return to the back, so the
//! oldest-freed slot is reused first.

use crate::error::{Error, Result};
use std::collections::VecDeque;

/// Identity of a slot inside one slab.
pub type SlotId = u32;

/// Refcounts and FIFO free list for `slot_count` equally sized slots.
#[derive(Debug)]
pub struct Slab {
    /// Size of each slot in bytes.
    slot_size: usize,
    /// Per-slot reference count.
    refcounts: Vec<u32>,
    /// Free slots, oldest-freed first.
    free: VecDeque<SlotId>,
}

impl Slab {
    /// Create a slab with every slot free, in index order.
    ///
    /// # Panics
    ///
    /// Panics if `slot_count` does not fit a `SlotId`.
    pub fn new(slot_size: usize, slot_count: usize) -> Self {
        assert!(
            slot_count <= SlotId::MAX as usize,
            "slot count {slot_count} exceeds slot id range"
        );
        Self {
            slot_size,
            refcounts: vec![0; slot_count],
            free: (0..slot_count as SlotId).collect(),
        }
    }

    /// Pop the oldest free slot and give it a refcount of 1.
    pub fn pop_free(&mut self) -> Option<SlotId> {
        let id = self.free.pop_front()?;
        self.refcounts[id as usize] = 1;
        Some(id)
    }

    /// Add a reference to an in-use slot. Returns the new refcount.
    pub fn retain(&mut self, id: SlotId) -> Result<u32> {
        let count = self
            .refcounts
            .get_mut(id as usize)
            .ok_or_else(|| Error::PoolCorrupted(format!("retain of unknown slot {id}")))?;
        if *count == 0 {
            return Err(Error::PoolCorrupted(format!("retain of free slot {id}")));
        }
        *count = count
            .checked_add(1)
            .ok_or_else(|| Error::PoolCorrupted(format!("refcount overflow on slot {id}")))?;
        Ok(*count)
    }

    /// Drop a reference. Returns true if the slot went back on the free list.
    pub fn release(&mut self, id: SlotId) -> Result<bool> {
        let count = self
            .refcounts
            .get_mut(id as usize)
            .ok_or_else(|| Error::PoolCorrupted(format!("release of unknown slot {id}")))?;
        if *count == 0 {
            return Err(Error::PoolCorrupted(format!("refcount underflow on slot {id}")));
        }
        *count -= 1;
        if *count == 0 {
            self.free.push_back(id);
            return Ok(true);
        }
        Ok(false)
    }

    /// Current refcount of a slot, `None` for an unknown id.
    #[inline]
    pub fn refcount(&self, id: SlotId) -> Option<u32> {
        self.refcounts.get(id as usize).copied()
    }

    /// Ids currently on the free list, in the order they will be handed out.
    pub fn free_ids(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.free.iter().copied()
    }

    /// Size of each slot in bytes.
    #[inline]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Total number of slots.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.refcounts.len()
    }

    /// Number of free slots.
    #[inline]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Number of referenced slots.
    #[inline]
    pub fn used_count(&self) -> usize {
        self.slot_count() - self.free_count()
    }

    /// Bytes covered by the free slots.
    #[inline]
    pub fn free_bytes(&self) -> usize {
        self.free_count() * self.slot_size
    }

    /// Check the refcount/free-list invariant.
    pub fn verify(&self) -> Result<()> {
        let mut seen = vec![0u32; self.slot_count()];
        for &id in &self.free {
            let slot = seen
                .get_mut(id as usize)
                .ok_or_else(|| Error::PoolCorrupted(format!("unknown slot {id} on free list")))?;
            *slot += 1;
        }
        for (id, (&count, &listed)) in self.refcounts.iter().zip(seen.iter()).enumerate() {
            match (count, listed) {
                (0, 1) => {}
                (n, 0) if n > 0 => {}
                (n, l) => {
                    return Err(Error::PoolCorrupted(format!(
                        "slot {id} has refcount {n} and appears {l} times on the free list"
                    )));
                }
            }
        }
        Ok(())
    }
}

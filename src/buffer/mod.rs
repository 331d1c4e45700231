//! Buffer records, handles and cursors.
//!
//! A buffer is a **record**: an ordered list of [`Segment`]s with a fixed
//! segment capacity, the pool it came from (if any) and its descriptor
//! block. Records are reached through a [`BufferHandle`], a cheap `Rc`
//! clone. When the last handle goes away the record releases every
//! segment's block reference and returns its descriptor to the pool.
//!
//! # Threads
//!
//! `BufferHandle` is `!Send`: aliases of one record never cross threads, so
//! the single-writer rule for structural edits is enforced by the compiler.
//! To hand a buffer to another thread, convert a unique handle into a
//! [`SendBuffer`] ([`BufferHandle::try_into_send`]) or send a fresh
//! duplicate ([`BufferHandle::duplicate_for_send`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use segbuf::prelude::*;
//!
//! let pool = Pool::configured(PoolConfig::new(1024, 8))?;
//! let header = pool.take(16, false).unwrap();
//! let body = pool.take(2000, false).unwrap();
//!
//! let frame = pool.take_empty(4);
//! frame.append(&header, true)?;
//! frame.append(&body, false)?;
//! assert_eq!(frame.total_size(), 2016);
//! ```

mod cursor;
mod edit;
mod segment;

pub use cursor::Cursor;
pub use segment::Segment;

use crate::error::{Error, Result};
use crate::memory::{HeapBlock, SlotId, defaults};
use crate::pool::Pool;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;
use std::sync::Arc;

/// The segment list and bookkeeping behind a buffer.
pub(crate) struct Record {
    pub(crate) segments: Vec<Segment>,
    /// Fixed at creation; `segments.len() <= capacity` always holds.
    pub(crate) capacity: usize,
    /// Owning pool, `None` for heap records.
    pub(crate) pool: Option<Pool>,
    /// Pooled descriptor block, `None` for a heap segment table.
    pub(crate) descriptor: Option<SlotId>,
}

impl Record {
    pub(crate) fn new(
        segments: Vec<Segment>,
        capacity: usize,
        pool: Option<Pool>,
        descriptor: Option<SlotId>,
    ) -> Self {
        debug_assert!(segments.len() <= capacity);
        Self {
            segments,
            capacity,
            pool,
            descriptor,
        }
    }

    #[inline]
    pub(crate) fn total_size(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }
}

impl Drop for Record {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release_record(self);
        }
    }
}

// ============================================================================
// BufferHandle
// ============================================================================

/// A shared reference to a buffer record.
///
/// Cloning is cheap and aliases the same record: edits through one clone
/// are visible through all of them. Use [`BufferHandle::duplicate`] for an
/// independent record over the same bytes.
#[derive(Clone)]
pub struct BufferHandle {
    record: Rc<RefCell<Record>>,
}

impl BufferHandle {
    pub(crate) fn from_record(record: Record) -> Self {
        Self {
            record: Rc::new(RefCell::new(record)),
        }
    }

    /// Heap record holding `data` as one segment.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let segments = if data.is_empty() {
            Vec::new()
        } else {
            vec![Segment::heap(Arc::new(HeapBlock::from_vec(data)))]
        };
        Self::heap_from_segments(segments, defaults::MAX_SEGMENTS)
    }

    /// Heap record holding a copy of `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// Empty heap record with room for `capacity` segments.
    pub fn heap_empty(capacity: usize) -> Self {
        Self::heap_from_segments(Vec::with_capacity(capacity), capacity)
    }

    pub(crate) fn heap_from_segments(mut segments: Vec<Segment>, capacity: usize) -> Self {
        let capacity = capacity.max(segments.len());
        segments.reserve(capacity - segments.len());
        Self::from_record(Record::new(segments, capacity, None, None))
    }

    #[inline]
    pub(crate) fn record(&self) -> Ref<'_, Record> {
        self.record.borrow()
    }

    #[inline]
    pub(crate) fn record_mut(&self) -> RefMut<'_, Record> {
        self.record.borrow_mut()
    }

    /// Sum of all segment lengths.
    pub fn total_size(&self) -> usize {
        self.record().total_size()
    }

    /// Number of segments.
    #[inline]
    pub fn segment_count(&self) -> usize {
        self.record().segments.len()
    }

    /// Maximum number of segments, fixed at creation.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.record().capacity
    }

    /// True if the record holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.total_size() == 0
    }

    /// The owning pool, `None` for heap records.
    pub fn pool(&self) -> Option<Pool> {
        self.record().pool.clone()
    }

    /// True if the record belongs to a pool.
    pub fn is_pooled(&self) -> bool {
        self.record().pool.is_some()
    }

    /// True if the segment table lives in a pooled descriptor block.
    pub fn has_pooled_descriptor(&self) -> bool {
        self.record().descriptor.is_some()
    }

    /// True if both handles alias the same record.
    #[inline]
    pub fn same_record(&self, other: &BufferHandle) -> bool {
        Rc::ptr_eq(&self.record, &other.record)
    }

    /// Number of handles aliasing this record.
    #[inline]
    pub fn handle_count(&self) -> usize {
        Rc::strong_count(&self.record)
    }

    /// Borrow the segment list.
    pub fn segments(&self) -> Ref<'_, [Segment]> {
        Ref::map(self.record(), |record| record.segments.as_slice())
    }

    /// Copy of the bytes of segment `index`.
    ///
    /// Segment bytes are never lent out as `&[u8]`: writes through
    /// [`write_at`](Self::write_at) or a cursor take `&self`, and records
    /// sharing a block can write to it too.
    pub fn segment_to_vec(&self, index: usize) -> Option<Vec<u8>> {
        let record = self.record();
        let segment = record.segments.get(index)?;
        // SAFETY: the slice is copied out before the record borrow ends and
        // no write runs in between.
        Some(unsafe { segment.as_slice() }.to_vec())
    }

    /// Length of segment `index`.
    pub fn segment_len(&self, index: usize) -> Option<usize> {
        self.record().segments.get(index).map(Segment::len)
    }

    /// Raw block behind segment `index`, `None` if out of range or heap.
    pub fn block_id(&self, index: usize) -> Option<SlotId> {
        self.record().segments.get(index).and_then(Segment::block_id)
    }

    /// Copy the buffer's bytes into one vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let record = self.record();
        let mut out = Vec::with_capacity(record.total_size());
        for segment in &record.segments {
            // SAFETY: each slice is copied out immediately; no write runs
            // while the record is borrowed here.
            out.extend_from_slice(unsafe { segment.as_slice() });
        }
        out
    }

    /// Turn a unique handle into a [`SendBuffer`].
    ///
    /// Fails (returning the handle) if other handles alias the record.
    pub fn try_into_send(self) -> std::result::Result<SendBuffer, BufferHandle> {
        match Rc::try_unwrap(self.record) {
            Ok(cell) => Ok(SendBuffer {
                record: cell.into_inner(),
            }),
            Err(record) => Err(BufferHandle { record }),
        }
    }

    /// A fresh duplicate of this buffer, ready to move to another thread.
    pub fn duplicate_for_send(&self) -> Result<SendBuffer> {
        self.duplicate()?
            .try_into_send()
            .map_err(|_| Error::PoolCorrupted("fresh duplicate is aliased".into()))
    }
}

impl std::fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.record.try_borrow() {
            Ok(record) => f
                .debug_struct("BufferHandle")
                .field("total_size", &record.total_size())
                .field("segments", &record.segments.len())
                .field("capacity", &record.capacity)
                .field("pool", &record.pool.as_ref().map(Pool::id))
                .finish(),
            Err(_) => f.write_str("BufferHandle { <borrowed> }"),
        }
    }
}

// ============================================================================
// SendBuffer
// ============================================================================

/// A uniquely owned record that can move between threads.
///
/// Produced by [`BufferHandle::try_into_send`] or
/// [`BufferHandle::duplicate_for_send`]; turned back into a handle on the
/// receiving thread with [`SendBuffer::into_handle`]. Dropping it releases
/// the record like dropping the last handle would.
pub struct SendBuffer {
    record: Record,
}

impl SendBuffer {
    /// Resume working with the record on the current thread.
    pub fn into_handle(self) -> BufferHandle {
        BufferHandle::from_record(self.record)
    }

    /// Sum of all segment lengths.
    pub fn total_size(&self) -> usize {
        self.record.total_size()
    }

    /// Number of segments.
    pub fn segment_count(&self) -> usize {
        self.record.segments.len()
    }
}

impl std::fmt::Debug for SendBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendBuffer")
            .field("total_size", &self.total_size())
            .field("segments", &self.segment_count())
            .finish()
    }
}

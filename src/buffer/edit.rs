//! Structural edits on buffer records.
//!
//! Every edit validates its position and capacity before touching the
//! segment list, so a failed edit leaves the record exactly as it was.
//! Segments an edit removes are released after the record borrow ends,
//! in one batch per pool.

use super::{BufferHandle, Cursor, Record, Segment};
use crate::error::{Error, Result};
use crate::pool::Pool;

impl Record {
    /// Translate a byte offset into `(segment index, offset in segment)`.
    ///
    /// Offsets inside the buffer land in the segment that holds that byte.
    /// `pos == total_size()` yields `(segment count, 0)`.
    pub(crate) fn locate(&self, pos: usize) -> Result<(usize, usize)> {
        let mut rest = pos;
        for (index, segment) in self.segments.iter().enumerate() {
            if rest < segment.len() {
                return Ok((index, rest));
            }
            rest -= segment.len();
        }
        if rest == 0 {
            Ok((self.segments.len(), 0))
        } else {
            Err(Error::OutOfRange {
                position: pos,
                limit: self.total_size(),
            })
        }
    }

    /// Remove the first `len` bytes; returns the segments dropped whole.
    fn cut_front(&mut self, len: usize) -> Result<Vec<Segment>> {
        let total = self.total_size();
        if len > total {
            return Err(Error::OutOfRange {
                position: len,
                limit: total,
            });
        }
        let mut rest = len;
        let mut whole = 0;
        for segment in &self.segments {
            if segment.len() > rest {
                break;
            }
            rest -= segment.len();
            whole += 1;
        }
        let removed = self.segments.drain(..whole).collect();
        if rest > 0 {
            self.segments[0].advance(rest);
        }
        Ok(removed)
    }

    /// Keep the first `len` bytes; returns the segments dropped whole.
    fn truncate_to(&mut self, len: usize) -> Result<Vec<Segment>> {
        let total = self.total_size();
        if len > total {
            return Err(Error::OutOfRange {
                position: len,
                limit: total,
            });
        }
        let mut kept = 0;
        let mut keep = 0;
        while keep < self.segments.len() && kept < len {
            let segment = &mut self.segments[keep];
            if kept + segment.len() > len {
                segment.truncate(len - kept);
            }
            kept += segment.len();
            keep += 1;
        }
        Ok(self.segments.drain(keep..).collect())
    }

    /// Segments needed after inserting `incoming` segments at `offset`
    /// inside a segment (a mid-segment insert splits that segment in two).
    fn required_for_insert(&self, offset: usize, incoming: usize) -> usize {
        self.segments.len() + incoming + usize::from(offset > 0)
    }

    /// Splice `incoming` in at a located position. Capacity must already be
    /// checked.
    fn splice_in(&mut self, index: usize, offset: usize, incoming: Vec<Segment>) {
        let mut tail = self.segments.split_off(index);
        if offset > 0 {
            let right = tail[0].split_off(offset);
            self.segments.push(tail.remove(0));
            tail.insert(0, right);
        }
        self.segments.extend(incoming);
        self.segments.extend(tail);
        debug_assert!(self.segments.len() <= self.capacity);
    }

    /// True if every segment's block belongs to `pool`.
    fn all_in(&self, pool: &Pool) -> bool {
        self.segments
            .iter()
            .all(|segment| segment.block_in(pool.shared()).is_some())
    }
}

/// Release segments removed from a record of `pool`.
fn release_removed(pool: Option<Pool>, removed: Vec<Segment>) {
    match pool {
        Some(pool) => {
            pool.decrease_segment_refs(removed);
        }
        None => drop(removed),
    }
}

impl BufferHandle {
    /// Translate a byte offset into `(segment index, offset in segment)`.
    ///
    /// `pos == total_size()` yields `(segment_count(), 0)`; anything past
    /// that is [`Error::OutOfRange`].
    pub fn locate(&self, pos: usize) -> Result<(usize, usize)> {
        self.record().locate(pos)
    }

    /// Drop the first `len` bytes.
    ///
    /// Whole segments are released; a segment cut in the middle is advanced
    /// in place and keeps its block reference.
    pub fn cut_from_begin(&self, len: usize) -> Result<()> {
        let (pool, removed) = {
            let mut record = self.record_mut();
            let removed = record.cut_front(len)?;
            (record.pool.clone(), removed)
        };
        release_removed(pool, removed);
        Ok(())
    }

    /// Truncate to `len` bytes. Growing is [`Error::OutOfRange`]; use
    /// [`insert`](Self::insert) or [`append`](Self::append) instead.
    pub fn set_total_size(&self, len: usize) -> Result<()> {
        let (pool, removed) = {
            let mut record = self.record_mut();
            let removed = record.truncate_to(len)?;
            (record.pool.clone(), removed)
        };
        release_removed(pool, removed);
        Ok(())
    }

    /// Splice the segments of `src` in at byte offset `pos`.
    ///
    /// With `move_refs` the source's segments are moved out (the source is
    /// left empty) instead of taking new block references. If `src` holds
    /// memory this record's pool does not manage, its bytes are first
    /// copied into this pool. An insert into the middle of a segment splits
    /// it, which costs one extra segment of capacity.
    ///
    /// Fails with [`Error::InsufficientCapacity`] if the result would not fit
    /// the record's fixed capacity; the record is then unchanged.
    pub fn insert(&self, pos: usize, src: &BufferHandle, move_refs: bool) -> Result<()> {
        let (index, offset) = self.locate(pos)?;
        let pool = self.pool();
        let same = self.same_record(src);

        let copied = match &pool {
            Some(pool) if !same && !src.record().all_in(pool) => Some(pool.copy_deep(src)?),
            _ => None,
        };
        let source = copied.as_ref().unwrap_or(src);

        let incoming_count = source.segment_count();
        {
            let record = self.record();
            let required = record.required_for_insert(offset, incoming_count);
            if required > record.capacity {
                return Err(Error::InsufficientCapacity {
                    required,
                    capacity: record.capacity,
                });
            }
        }

        let incoming = if !same && (move_refs || copied.is_some()) {
            source.record_mut().segments.drain(..).collect()
        } else {
            let record = source.record();
            match &pool {
                Some(pool) => pool.increase_segment_refs(&record.segments),
                None => record.segments.clone(),
            }
        };
        self.record_mut().splice_in(index, offset, incoming);
        Ok(())
    }

    /// Insert `src` at the end.
    pub fn append(&self, src: &BufferHandle, move_refs: bool) -> Result<()> {
        self.insert(self.total_size(), src, move_refs)
    }

    /// Insert `src` at the start.
    pub fn prepend(&self, src: &BufferHandle, move_refs: bool) -> Result<()> {
        self.insert(0, src, move_refs)
    }

    /// A new record sharing all of this record's bytes.
    pub fn duplicate(&self) -> Result<BufferHandle> {
        match self.pool() {
            Some(pool) => pool.duplicate(self, 0, self.segment_count()),
            None => {
                let record = self.record();
                Ok(BufferHandle::heap_from_segments(
                    record.segments.clone(),
                    record.capacity,
                ))
            }
        }
    }

    /// A new record covering the next `len` bytes at `cursor`, then advance
    /// the cursor past them.
    ///
    /// The first and last segments are trimmed to the exact range and share
    /// their blocks with this record. Without `allow_segmented` the range
    /// must lie in one segment ([`Error::NotContiguous`] otherwise).
    pub fn get_next_part(
        &self,
        cursor: &mut Cursor<'_>,
        len: usize,
        allow_segmented: bool,
    ) -> Result<BufferHandle> {
        if !cursor.handle().same_record(self) {
            return Err(Error::ForeignCursor);
        }
        let start = cursor.position();
        let pool = self.pool();

        let parts = if len == 0 {
            Vec::new()
        } else {
            let record = self.record();
            let total = record.total_size();
            if start.checked_add(len).is_none_or(|end| end > total) {
                return Err(Error::OutOfRange {
                    position: start.saturating_add(len),
                    limit: total,
                });
            }
            let (first, offset) = record.locate(start)?;
            let mut last = first;
            let mut covered = record.segments[first].len() - offset;
            while covered < len {
                last += 1;
                covered += record.segments[last].len();
            }

            let range = &record.segments[first..=last];
            let touched = range.iter().filter(|s| !s.is_empty()).count();
            if !allow_segmented && touched > 1 {
                return Err(Error::NotContiguous { segments: touched });
            }

            let mut parts = match &pool {
                Some(pool) => pool.increase_segment_refs(range),
                None => range.to_vec(),
            };
            drop(record);

            parts[0].advance(offset);
            let tail = parts.len() - 1;
            let excess = covered - len;
            let keep = parts[tail].len() - excess;
            parts[tail].truncate(keep);
            parts.retain(|segment| !segment.is_empty());
            parts
        };

        cursor.shift(len)?;
        Ok(match pool {
            Some(pool) => pool.record_from_segments(parts),
            None => BufferHandle::heap_from_segments(parts, crate::memory::defaults::MAX_SEGMENTS),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_segments() -> BufferHandle {
        let handle = BufferHandle::heap_empty(8);
        handle.append(&BufferHandle::from_slice(b"abcd"), true).unwrap();
        handle.append(&BufferHandle::from_slice(b"efg"), true).unwrap();
        handle.append(&BufferHandle::from_slice(b"hi"), true).unwrap();
        handle
    }

    #[test]
    fn test_locate() {
        let handle = three_segments();
        assert_eq!(handle.locate(0).unwrap(), (0, 0));
        assert_eq!(handle.locate(3).unwrap(), (0, 3));
        assert_eq!(handle.locate(4).unwrap(), (1, 0));
        assert_eq!(handle.locate(8).unwrap(), (2, 1));
        assert_eq!(handle.locate(9).unwrap(), (3, 0));
        assert!(matches!(
            handle.locate(10),
            Err(Error::OutOfRange { position: 10, limit: 9 })
        ));
    }

    #[test]
    fn test_cut_from_begin() {
        let handle = three_segments();
        handle.cut_from_begin(5).unwrap();
        assert_eq!(handle.segment_count(), 2);
        assert_eq!(handle.to_vec(), b"fghi");
        assert!(handle.cut_from_begin(5).is_err());
        assert_eq!(handle.to_vec(), b"fghi");
        handle.cut_from_begin(4).unwrap();
        assert_eq!(handle.segment_count(), 0);
    }

    #[test]
    fn test_set_total_size() {
        let handle = three_segments();
        handle.set_total_size(6).unwrap();
        assert_eq!(handle.to_vec(), b"abcdef");
        assert_eq!(handle.segment_count(), 2);
        assert!(matches!(
            handle.set_total_size(7),
            Err(Error::OutOfRange { position: 7, limit: 6 })
        ));
        handle.set_total_size(4).unwrap();
        assert_eq!(handle.segment_count(), 1);
        handle.set_total_size(0).unwrap();
        assert_eq!(handle.segment_count(), 0);
    }

    #[test]
    fn test_insert_mid_segment_splits() {
        let handle = three_segments();
        handle.insert(2, &BufferHandle::from_slice(b"XY"), false).unwrap();
        assert_eq!(handle.to_vec(), b"abXYcdefghi");
        assert_eq!(handle.segment_count(), 5);
        assert_eq!(handle.segment_len(0), Some(2));
        assert_eq!(handle.segment_len(2), Some(2));
    }

    #[test]
    fn test_insert_at_boundary_does_not_split() {
        let handle = three_segments();
        handle.insert(4, &BufferHandle::from_slice(b"XY"), false).unwrap();
        assert_eq!(handle.to_vec(), b"abcdXYefghi");
        assert_eq!(handle.segment_count(), 4);
    }

    #[test]
    fn test_insert_capacity_checked_first() {
        let handle = BufferHandle::heap_empty(3);
        handle.append(&BufferHandle::from_slice(b"abcd"), true).unwrap();
        handle.append(&BufferHandle::from_slice(b"ef"), true).unwrap();
        // Mid-segment insert needs 2 + 1 + 1 = 4 segments.
        let err = handle
            .insert(1, &BufferHandle::from_slice(b"Z"), false)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientCapacity { required: 4, capacity: 3 }
        ));
        assert_eq!(handle.to_vec(), b"abcdef");
        assert_eq!(handle.segment_count(), 2);
        // At a boundary it fits.
        handle.insert(4, &BufferHandle::from_slice(b"Z"), false).unwrap();
        assert_eq!(handle.to_vec(), b"abcdZef");
    }

    #[test]
    fn test_move_refs_empties_source() {
        let dst = BufferHandle::heap_empty(4);
        let src = BufferHandle::from_slice(b"abc");
        dst.append(&src, true).unwrap();
        assert_eq!(src.segment_count(), 0);
        assert_eq!(dst.to_vec(), b"abc");
    }

    #[test]
    fn test_insert_self() {
        let handle = BufferHandle::heap_empty(4);
        handle.append(&BufferHandle::from_slice(b"ab"), true).unwrap();
        handle.append(&handle.clone(), true).unwrap();
        assert_eq!(handle.to_vec(), b"abab");
    }

    #[test]
    fn test_get_next_part() {
        let handle = three_segments();
        let mut cursor = handle.cursor();
        let part = handle.get_next_part(&mut cursor, 2, false).unwrap();
        assert_eq!(part.to_vec(), b"ab");
        assert_eq!(cursor.position(), 2);

        assert!(matches!(
            handle.get_next_part(&mut cursor, 4, false),
            Err(Error::NotContiguous { segments: 2 })
        ));
        assert_eq!(cursor.position(), 2);

        let part = handle.get_next_part(&mut cursor, 6, true).unwrap();
        assert_eq!(part.to_vec(), b"cdefgh");
        assert_eq!(part.segment_count(), 3);
        assert_eq!(cursor.position(), 8);

        assert!(handle.get_next_part(&mut cursor, 2, true).is_err());
        let empty = handle.get_next_part(&mut cursor, 0, false).unwrap();
        assert_eq!(empty.total_size(), 0);
    }

    #[test]
    fn test_get_next_part_foreign_cursor() {
        let a = three_segments();
        let b = three_segments();
        let mut cursor = b.cursor();
        assert!(matches!(
            a.get_next_part(&mut cursor, 1, false),
            Err(Error::ForeignCursor)
        ));
    }
}

//! Position-tracking traversal over a buffer's segments.

use super::{BufferHandle, Segment};
use crate::error::{Error, Result};
use std::ptr::{self, NonNull};

/// A byte position in a buffer, stored as `(segment, offset)`.
///
/// The cursor borrows its handle and cannot outlive it. It keeps no state
/// besides its position, so re-creating it from the same handle restarts
/// the traversal. Copies move one contiguous run at a time, bounded by the
/// current segment of each side.
///
/// # Example
///
/// ```rust,ignore
/// let mut cursor = buffer.cursor();
/// cursor.shift(16)?;                    // skip a header
/// let mut body = vec![0u8; cursor.remaining()];
/// cursor.copy_to(&mut body);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct Cursor<'a> {
    handle: &'a BufferHandle,
    segment: usize,
    offset: usize,
}

/// Normalize a position so that `offset < segments[segment].len()`, or the
/// position is `(segments.len(), 0)` at the end.
fn resolve(segments: &[Segment], mut segment: usize, mut offset: usize) -> (usize, usize) {
    while let Some(current) = segments.get(segment) {
        if offset < current.len() {
            return (segment, offset);
        }
        offset -= current.len();
        segment += 1;
    }
    (segments.len(), 0)
}

impl BufferHandle {
    /// A cursor at the start of the buffer.
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(self)
    }

    /// A cursor at byte `pos`.
    pub fn cursor_at(&self, pos: usize) -> Result<Cursor<'_>> {
        let (segment, offset) = self.locate(pos)?;
        Ok(Cursor {
            handle: self,
            segment,
            offset,
        })
    }

    /// Overwrite bytes starting at `pos`. The range must lie inside the buffer.
    ///
    /// Blocks shared with other records (after [`duplicate`](Self::duplicate)
    /// or [`get_next_part`](Self::get_next_part)) see the write too. Writers
    /// of shared blocks must not run on two threads at once.
    pub fn write_at(&self, pos: usize, data: &[u8]) -> Result<()> {
        let total = self.total_size();
        if pos.checked_add(data.len()).is_none_or(|end| end > total) {
            return Err(Error::OutOfRange {
                position: pos.saturating_add(data.len()),
                limit: total,
            });
        }
        let mut cursor = self.cursor_at(pos)?;
        let mut rest = data;
        while !rest.is_empty() {
            let run = cursor.segment_remaining().min(rest.len());
            cursor.copy_from_raw(&rest[..run])?;
            rest = &rest[run..];
        }
        Ok(())
    }

    /// Read `dst.len()` bytes starting at `pos`.
    pub fn read_at(&self, pos: usize, dst: &mut [u8]) -> Result<()> {
        let mut cursor = self.cursor_at(pos)?;
        if cursor.remaining() < dst.len() {
            return Err(Error::OutOfRange {
                position: pos + dst.len(),
                limit: self.total_size(),
            });
        }
        cursor.copy_to(dst);
        Ok(())
    }
}

impl<'a> Cursor<'a> {
    /// A cursor at the start of `handle`.
    pub fn new(handle: &'a BufferHandle) -> Self {
        Self {
            handle,
            segment: 0,
            offset: 0,
        }
    }

    /// The handle this cursor walks.
    #[inline]
    pub fn handle(&self) -> &'a BufferHandle {
        self.handle
    }

    /// Index of the current segment.
    pub fn segment_index(&self) -> usize {
        let record = self.handle.record();
        resolve(&record.segments, self.segment, self.offset).0
    }

    /// Offset inside the current segment.
    pub fn intra_offset(&self) -> usize {
        let record = self.handle.record();
        resolve(&record.segments, self.segment, self.offset).1
    }

    /// Byte position from the start of the buffer.
    pub fn position(&self) -> usize {
        let record = self.handle.record();
        let (segment, offset) = resolve(&record.segments, self.segment, self.offset);
        record.segments[..segment]
            .iter()
            .map(Segment::len)
            .sum::<usize>()
            + offset
    }

    /// Bytes between the cursor and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.handle.total_size() - self.position()
    }

    /// True at the end of the buffer.
    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    /// Bytes left in the current segment.
    pub fn segment_remaining(&self) -> usize {
        let record = self.handle.record();
        let (segment, offset) = resolve(&record.segments, self.segment, self.offset);
        record
            .segments
            .get(segment)
            .map_or(0, |current| current.len() - offset)
    }

    /// Move back to the start.
    pub fn reset(&mut self) {
        self.segment = 0;
        self.offset = 0;
    }

    /// Advance by `len` bytes across segment boundaries.
    ///
    /// Fails with [`Error::OutOfRange`] (leaving the cursor in place) if that
    /// would pass the end of the buffer.
    pub fn shift(&mut self, len: usize) -> Result<()> {
        let handle = self.handle;
        let record = handle.record();
        let position = self.position();
        let total = record.total_size();
        let target = position
            .checked_add(len)
            .filter(|&target| target <= total)
            .ok_or(Error::OutOfRange {
                position: position.saturating_add(len),
                limit: total,
            })?;
        (self.segment, self.offset) = record.locate(target)?;
        Ok(())
    }

    /// The contiguous run at the cursor: start pointer and length.
    fn current_run(&mut self) -> Option<(NonNull<u8>, usize)> {
        let handle = self.handle;
        let record = handle.record();
        (self.segment, self.offset) = resolve(&record.segments, self.segment, self.offset);
        let current = record.segments.get(self.segment)?;
        // SAFETY: offset < current.len() after resolve.
        let start = unsafe { NonNull::new_unchecked(current.as_ptr().as_ptr().add(self.offset)) };
        Some((start, current.len() - self.offset))
    }

    /// Copy up to `len` bytes from `src` to this cursor; both advance.
    /// Returns the number of bytes copied, short if either side ends.
    pub fn copy_from(&mut self, src: &mut Cursor<'_>, len: usize) -> usize {
        let mut copied = 0;
        while copied < len {
            let Some((to, room)) = self.current_run() else {
                break;
            };
            let Some((from, available)) = src.current_run() else {
                break;
            };
            let n = room.min(available).min(len - copied);
            // SAFETY: both runs lie inside live segments; ranges may overlap
            // when both cursors walk the same bytes.
            unsafe { ptr::copy(from.as_ptr(), to.as_ptr(), n) };
            self.offset += n;
            src.offset += n;
            copied += n;
        }
        copied
    }

    /// Copy bytes at the cursor into `dst`, spanning segments. Returns the
    /// number of bytes copied, short at the end of the buffer.
    pub fn copy_to(&mut self, dst: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < dst.len() {
            let Some((from, available)) = self.current_run() else {
                break;
            };
            let n = available.min(dst.len() - copied);
            // SAFETY: the run lies inside a live segment; dst is a distinct
            // exclusive borrow.
            unsafe { ptr::copy_nonoverlapping(from.as_ptr(), dst[copied..].as_mut_ptr(), n) };
            self.offset += n;
            copied += n;
        }
        copied
    }

    /// Write `src` at the cursor and advance.
    ///
    /// Does not span segments: fails with [`Error::OutOfRange`] if `src` is
    /// longer than what is left of the current segment. Use
    /// [`copy_from`](Self::copy_from) or [`BufferHandle::write_at`] for
    /// writes that cross boundaries.
    pub fn copy_from_raw(&mut self, src: &[u8]) -> Result<()> {
        if src.is_empty() {
            return Ok(());
        }
        let (to, room) = self.current_run().unwrap_or((NonNull::dangling(), 0));
        if src.len() > room {
            return Err(Error::OutOfRange {
                position: src.len(),
                limit: room,
            });
        }
        // SAFETY: room checked above; src may alias segment memory.
        unsafe { ptr::copy(src.as_ptr(), to.as_ptr(), src.len()) };
        self.offset += src.len();
        Ok(())
    }

    /// Signed byte distance from this cursor to `other`.
    pub fn distance_to(&self, other: &Cursor<'_>) -> Result<isize> {
        if !self.handle.same_record(other.handle) {
            return Err(Error::ForeignCursor);
        }
        Ok(other.position() as isize - self.position() as isize)
    }

    /// Fraction of the buffer already traversed; 0.0 for an empty buffer.
    pub fn consumed_size(&self) -> f32 {
        let total = self.handle.total_size();
        if total == 0 {
            return 0.0;
        }
        self.position() as f32 / total as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segmented(parts: &[&[u8]]) -> BufferHandle {
        let handle = BufferHandle::heap_empty(parts.len());
        for part in parts {
            handle.append(&BufferHandle::from_slice(part), true).unwrap();
        }
        handle
    }

    #[test]
    fn test_shift_across_segments() {
        let handle = segmented(&[b"abc", b"de", b"fghi"]);
        let mut cursor = handle.cursor();
        cursor.shift(4).unwrap();
        assert_eq!(cursor.segment_index(), 1);
        assert_eq!(cursor.intra_offset(), 1);
        cursor.shift(1).unwrap();
        assert_eq!(cursor.segment_index(), 2);
        assert_eq!(cursor.intra_offset(), 0);
        assert!(cursor.shift(5).is_err());
        assert_eq!(cursor.position(), 5);
        cursor.shift(4).unwrap();
        assert!(cursor.is_at_end());
    }

    #[test]
    fn test_copy_to_spans_segments() {
        let handle = segmented(&[b"abc", b"de", b"fghi"]);
        let mut cursor = handle.cursor_at(2).unwrap();
        let mut out = [0u8; 5];
        assert_eq!(cursor.copy_to(&mut out), 5);
        assert_eq!(&out, b"cdefg");
        let mut rest = [0u8; 8];
        assert_eq!(cursor.copy_to(&mut rest), 2);
        assert_eq!(&rest[..2], b"hi");
    }

    #[test]
    fn test_copy_from_between_layouts() {
        let src = segmented(&[b"abc", b"de", b"fghi"]);
        let dst = segmented(&[b"......", b"...."]);
        let mut from = src.cursor();
        let mut to = dst.cursor_at(1).unwrap();
        assert_eq!(to.copy_from(&mut from, 9), 9);
        assert_eq!(dst.to_vec(), b".abcdefghi");
        assert_eq!(from.position(), 9);
        assert_eq!(to.position(), 10);
    }

    #[test]
    fn test_copy_from_short_source() {
        let src = segmented(&[b"ab"]);
        let dst = segmented(&[b"....."]);
        let mut from = src.cursor();
        let mut to = dst.cursor();
        assert_eq!(to.copy_from(&mut from, 5), 2);
        assert_eq!(dst.to_vec(), b"ab...");
    }

    #[test]
    fn test_copy_from_raw_is_single_segment() {
        let handle = segmented(&[b"abc", b"de"]);
        let mut cursor = handle.cursor_at(1).unwrap();
        assert!(matches!(
            cursor.copy_from_raw(b"XYZ"),
            Err(Error::OutOfRange { position: 3, limit: 2 })
        ));
        cursor.copy_from_raw(b"XY").unwrap();
        assert_eq!(cursor.position(), 3);
        assert_eq!(handle.to_vec(), b"aXYde");
    }

    #[test]
    fn test_write_and_read_at() {
        let handle = segmented(&[b"abc", b"de", b"fghi"]);
        handle.write_at(2, b"WXYZ").unwrap();
        assert_eq!(handle.to_vec(), b"abWXYZghi");
        let mut out = [0u8; 3];
        handle.read_at(4, &mut out).unwrap();
        assert_eq!(&out, b"YZg");
        assert!(handle.write_at(7, b"xyz").is_err());
        assert!(handle.read_at(8, &mut out).is_err());
    }

    #[test]
    fn test_distance_and_progress() {
        let handle = segmented(&[b"abc", b"de", b"fghi"]);
        let start = handle.cursor();
        let mut end = handle.cursor();
        end.shift(6).unwrap();
        assert_eq!(start.distance_to(&end).unwrap(), 6);
        assert_eq!(end.distance_to(&start).unwrap(), -6);
        assert!((end.consumed_size() - 6.0 / 9.0).abs() < f32::EPSILON);

        let other = segmented(&[b"abc"]);
        assert!(matches!(
            start.distance_to(&other.cursor()),
            Err(Error::ForeignCursor)
        ));

        let empty = BufferHandle::heap_empty(1);
        assert_eq!(empty.cursor().consumed_size(), 0.0);
    }
}

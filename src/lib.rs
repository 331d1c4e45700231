//! # segbuf
//!
//! Zero-copy segmented buffers over fixed-size memory pools.
//!
//! A [`Pool`](pool::Pool) owns a data arena of equally sized raw blocks
//! and a descriptor arena of segment tables. Buffers are ordered lists of
//! segments, each a byte range inside one raw block with its own reference
//! on that block, so buffers can be split, spliced, trimmed and duplicated
//! without copying payload bytes.
//!
//! ## Features
//!
//! - **Two-tier slab allocation**: raw blocks and descriptor blocks come from
//!   separate fixed arenas with FIFO free lists
//! - **Per-segment sharing**: independent buffers share overlapping ranges of
//!   the same blocks
//! - **In-place structural edits**: insert, append, prepend, cut and truncate
//!   that never leave a buffer half-edited
//! - **Non-blocking backpressure**: exhausted pools queue requests and wake
//!   consumers, oldest first, when memory is freed
//! - **memfd-backed arena**: one file descriptor covers every block, for
//!   registration with I/O hardware or other processes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use segbuf::prelude::*;
//!
//! let pool = Pool::configured(PoolConfig::new(1024, 4))?;
//!
//! let buffer = pool.take(2500, false).expect("pool has room");
//! assert_eq!(buffer.segment_count(), 3);   // 1024 + 1024 + 452
//!
//! buffer.cut_from_begin(1000)?;            // no bytes copied
//! let view = buffer.duplicate()?;          // shares the same blocks
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod buffer;
pub mod error;
pub mod memory;
pub mod observability;
pub mod pool;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::{BufferHandle, Cursor, SendBuffer, Segment};
    pub use crate::error::{Error, Result};
    pub use crate::pool::{ConsumerId, Pool, PoolConfig, PoolEvent, TakeOutcome};
}

pub use error::{Error, Result};

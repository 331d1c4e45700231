//! Error types for segbuf.

use thiserror::Error;

/// Result type alias using segbuf's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pool, buffer and cursor operations.
///
/// Exhaustion (`PoolExhausted`, `InsufficientTotalCapacity`) is an expected
/// outcome: the non-strict allocation paths turn it into `None` so callers
/// can register as pending and retry. Structural and range errors are
/// returned to the immediate caller and never leave a record half-edited.
#[derive(Error, Debug)]
pub enum Error {
    /// The pool has no arenas and lazy configuration is disabled.
    #[error("pool is not configured")]
    PoolNotConfigured,

    /// The pool already has arenas; they cannot be resized while live.
    #[error("pool is already configured")]
    AlreadyConfigured,

    /// No raw block is free and the caller demanded a reservation.
    #[error("memory pool exhausted: no free raw block")]
    PoolExhausted,

    /// Even a fully drained free list cannot cover the request.
    #[error("insufficient free capacity: requested {requested} bytes, {available} available")]
    InsufficientTotalCapacity {
        /// Requested size in bytes.
        requested: usize,
        /// Free bytes in the data arena.
        available: usize,
    },

    /// A structural edit would exceed the record's fixed segment capacity.
    #[error("insufficient segment capacity: {required} segments required, capacity is {capacity}")]
    InsufficientCapacity {
        /// Segments the edit needs.
        required: usize,
        /// The record's fixed capacity.
        capacity: usize,
    },

    /// Position or length outside a record's or cursor's bounds.
    #[error("position {position} out of range (limit {limit})")]
    OutOfRange {
        /// Offending position or end of the requested range.
        position: usize,
        /// The valid upper bound.
        limit: usize,
    },

    /// Cursors (or a cursor and a handle) refer to different records.
    #[error("cursor belongs to a different buffer")]
    ForeignCursor,

    /// A contiguous part was requested but the range spans several segments.
    #[error("range spans {segments} segments but a contiguous part was requested")]
    NotContiguous {
        /// Number of segments the range touches.
        segments: usize,
    },

    /// Teardown refused while blocks or descriptors are still referenced.
    #[error("pool still in use: {blocks} blocks and {descriptors} descriptors referenced")]
    PoolInUse {
        /// Raw blocks with a non-zero refcount.
        blocks: usize,
        /// Descriptor blocks with a non-zero refcount.
        descriptors: usize,
    },

    /// An internal pool invariant is broken (refcount underflow, stale id).
    #[error("pool corrupted: {0}")]
    PoolCorrupted(String),

    /// Invalid pool configuration.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// Backing memory could not be allocated.
    #[error("memory allocation failed: {0}")]
    AllocationFailed(String),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] rustix::io::Errno),
}

impl Error {
    /// True for the exhaustion outcomes a caller is expected to queue on.
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Error::PoolExhausted | Error::InsufficientTotalCapacity { .. }
        )
    }
}

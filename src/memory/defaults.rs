//! Default pool sizes and configuration constants.
//!
//! A pool that is asked for memory before anyone configured it sizes its
//! arenas from these values. They target a mid-sized readout node: a few
//! hundred megabytes of payload in blocks large enough for one network
//! receive, with descriptor blocks for in-flight splits and duplicates.
//!
//! # Usage
//!
//! ```rust,ignore
//! use segbuf::memory::defaults;
//! use segbuf::pool::PoolConfig;
//!
//! let config = PoolConfig::default()
//!     .with_block_size(defaults::EVENT_BLOCK_SIZE)
//!     .with_block_count(defaults::blocks_for_bytes(512 << 20, defaults::EVENT_BLOCK_SIZE));
//! ```

// =============================================================================
// Block Sizes (bytes)
// =============================================================================

/// Default raw block size (64KB, one large UDP datagram or a TCP read).
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Block size for event-builder pools that assemble full events.
pub const EVENT_BLOCK_SIZE: usize = 1024 * 1024;

/// Block size for small control and status messages.
pub const CONTROL_BLOCK_SIZE: usize = 4 * 1024;

// =============================================================================
// Counts and Ratios
// =============================================================================

/// Default number of raw blocks.
pub const BLOCK_COUNT: usize = 1024;

/// Default descriptor blocks per raw block.
///
/// Duplicates and splits consume fresh descriptors while sharing raw
/// blocks, so the descriptor arena is larger than the data arena.
pub const DESCRIPTOR_REFCOEF: usize = 2;

/// Default maximum number of segments one pooled descriptor can hold.
pub const MAX_SEGMENTS: usize = 8;

/// Default alignment of raw block starts.
pub const ALIGNMENT: usize = 64;

/// Default debug name for the arena memfd.
pub const POOL_NAME: &str = "segbuf-pool";

// =============================================================================
// Convenience Functions
// =============================================================================

/// Number of blocks of `block_size` needed to hold `bytes` bytes.
pub const fn blocks_for_bytes(bytes: usize, block_size: usize) -> usize {
    bytes.div_ceil(block_size)
}

/// Round `size` up to a multiple of `align` (a power of two).
pub const fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_for_bytes() {
        assert_eq!(blocks_for_bytes(2500, 1024), 3);
        assert_eq!(blocks_for_bytes(2048, 1024), 2);
        assert_eq!(blocks_for_bytes(0, 1024), 0);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(1000, 64), 1024);
        assert_eq!(align_up(1024, 64), 1024);
        assert_eq!(align_up(1, 8), 8);
    }

    #[test]
    fn test_defaults_are_consistent() {
        assert!(ALIGNMENT.is_power_of_two());
        assert_eq!(align_up(BLOCK_SIZE, ALIGNMENT), BLOCK_SIZE);
        assert!(DESCRIPTOR_REFCOEF >= 1);
        assert!(MAX_SEGMENTS >= 1);
    }
}

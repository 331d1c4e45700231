//! Pool configuration.

use crate::error::{Error, Result};
use crate::memory::defaults;

/// Sizing of a pool's two arenas.
///
/// How the values are obtained (process configuration, command line,
/// hard-coded) is up to the caller. A pool keeps its `PoolConfig` and uses
/// it when it has to configure itself lazily on first allocation.
///
/// # Example
///
/// ```rust
/// use segbuf::pool::PoolConfig;
///
/// let config = PoolConfig::default()
///     .with_name("readout")
///     .with_block_size(1024)
///     .with_block_count(4)
///     .with_max_segments(4);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.descriptor_count(), 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Debug name, used for the arena memfd and as the telemetry label.
    pub name: String,
    /// Size of each raw block in bytes.
    pub block_size: usize,
    /// Number of raw blocks in the data arena.
    pub block_count: usize,
    /// Descriptor blocks per raw block.
    pub descriptor_refcoef: usize,
    /// Maximum segments one pooled descriptor block holds.
    pub max_segments: usize,
    /// Alignment of raw block starts (power of two, at most a page).
    pub alignment: usize,
    /// Configure from this config on first allocation if still unconfigured.
    pub auto_configure: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: defaults::POOL_NAME.to_string(),
            block_size: defaults::BLOCK_SIZE,
            block_count: defaults::BLOCK_COUNT,
            descriptor_refcoef: defaults::DESCRIPTOR_REFCOEF,
            max_segments: defaults::MAX_SEGMENTS,
            alignment: defaults::ALIGNMENT,
            auto_configure: true,
        }
    }
}

impl PoolConfig {
    /// Config with the given block size and count, defaults otherwise.
    pub fn new(block_size: usize, block_count: usize) -> Self {
        Self::default()
            .with_block_size(block_size)
            .with_block_count(block_count)
    }

    /// Set the debug name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the raw block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the raw block count.
    pub fn with_block_count(mut self, block_count: usize) -> Self {
        self.block_count = block_count;
        self
    }

    /// Set the descriptor-to-block ratio.
    pub fn with_descriptor_refcoef(mut self, refcoef: usize) -> Self {
        self.descriptor_refcoef = refcoef;
        self
    }

    /// Set the per-descriptor segment limit.
    pub fn with_max_segments(mut self, max_segments: usize) -> Self {
        self.max_segments = max_segments;
        self
    }

    /// Set the block alignment.
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Enable or disable lazy configuration.
    pub fn with_auto_configure(mut self, auto_configure: bool) -> Self {
        self.auto_configure = auto_configure;
        self
    }

    /// Number of descriptor blocks (`block_count * descriptor_refcoef`).
    pub fn descriptor_count(&self) -> usize {
        self.block_count
            .saturating_mul(self.descriptor_refcoef.max(1))
    }

    /// Distance between consecutive block starts in the data arena.
    pub fn block_stride(&self) -> usize {
        defaults::align_up(self.block_size, self.alignment)
    }

    /// Check that the config describes arenas that can be built.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::InvalidConfig("block_size must be > 0".into()));
        }
        if self.block_count == 0 {
            return Err(Error::InvalidConfig("block_count must be > 0".into()));
        }
        if self.descriptor_refcoef == 0 {
            return Err(Error::InvalidConfig("descriptor_refcoef must be >= 1".into()));
        }
        if self.max_segments == 0 {
            return Err(Error::InvalidConfig("max_segments must be > 0".into()));
        }
        if !self.alignment.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "alignment {} is not a power of two",
                self.alignment
            )));
        }
        let page_size = rustix::param::page_size();
        if self.alignment > page_size {
            return Err(Error::InvalidConfig(format!(
                "alignment {} exceeds page size {page_size}",
                self.alignment
            )));
        }
        if self.block_count > u32::MAX as usize || self.descriptor_count() > u32::MAX as usize {
            return Err(Error::InvalidConfig("block or descriptor count exceeds u32".into()));
        }
        self.block_size
            .checked_add(self.alignment)
            .and_then(|_| self.block_stride().checked_mul(self.block_count))
            .ok_or_else(|| Error::InvalidConfig("data arena size overflows".into()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PoolConfig::default();
        config.validate().unwrap();
        assert!(config.auto_configure);
        assert_eq!(config.block_size, defaults::BLOCK_SIZE);
    }

    #[test]
    fn test_descriptor_count() {
        let config = PoolConfig::new(1024, 10).with_descriptor_refcoef(3);
        assert_eq!(config.descriptor_count(), 30);
    }

    #[test]
    fn test_block_stride_rounds_to_alignment() {
        let config = PoolConfig::new(1000, 4).with_alignment(64);
        assert_eq!(config.block_stride(), 1024);
        let config = PoolConfig::new(1000, 4).with_alignment(8);
        assert_eq!(config.block_stride(), 1000);
    }

    #[test]
    fn test_invalid_configs() {
        assert!(PoolConfig::new(0, 4).validate().is_err());
        assert!(PoolConfig::new(1024, 0).validate().is_err());
        assert!(PoolConfig::new(1024, 4).with_alignment(48).validate().is_err());
        assert!(PoolConfig::new(1024, 4).with_alignment(1 << 20).validate().is_err());
        assert!(PoolConfig::new(1024, 4).with_max_segments(0).validate().is_err());
        assert!(PoolConfig::new(1024, 4).with_descriptor_refcoef(0).validate().is_err());
        assert!(PoolConfig::new(usize::MAX / 2, 4).validate().is_err());
    }
}

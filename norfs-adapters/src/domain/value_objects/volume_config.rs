//! Volume geometry value object.

use crate::domain::error::ConfigError;

/// Smallest block the filesystem can keep its metadata commits in.
pub const MIN_BLOCK_SIZE: u32 = 128;

/// Two metadata pairs: the anchor pair and the directory pair.
pub const MIN_BLOCK_COUNT: u32 = 4;

/// Erase cycles a metadata block may accumulate before it is relocated.
///
/// Either a positive bound or unbounded (wear-leveling of metadata
/// disabled). The raw form follows the common `-1 = unbounded` convention.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockCycles(u32);

impl BlockCycles {
    /// Relocation disabled.
    pub const UNBOUNDED: Self = Self(0);

    /// A positive bound. Returns `None` for zero.
    pub const fn bounded(cycles: u32) -> Option<Self> {
        if cycles == 0 { None } else { Some(Self(cycles)) }
    }

    /// Parse the raw sentinel form: `-1` is unbounded, positive values are a
    /// bound, anything else is rejected.
    ///
    /// # Examples
    ///
    /// ```
    /// use norfs_adapters::BlockCycles;
    ///
    /// assert_eq!(BlockCycles::from_raw(-1).unwrap(), BlockCycles::UNBOUNDED);
    /// assert_eq!(BlockCycles::from_raw(500).unwrap().get(), Some(500));
    /// assert!(BlockCycles::from_raw(0).is_err());
    /// ```
    pub const fn from_raw(raw: i32) -> Result<Self, ConfigError> {
        if raw == -1 {
            Ok(Self::UNBOUNDED)
        } else if raw > 0 {
            Ok(Self(raw as u32))
        } else {
            Err(ConfigError::InvalidBlockCycles(raw))
        }
    }

    /// The bound, or `None` when unbounded.
    #[inline]
    pub const fn get(self) -> Option<u32> {
        if self.0 == 0 { None } else { Some(self.0) }
    }

    /// Raw sentinel form (`-1` when unbounded).
    pub const fn to_raw(self) -> i32 {
        if self.0 == 0 { -1 } else { self.0 as i32 }
    }
}

/// Geometry shared by the block device adapter and the filesystem.
///
/// Constructed once through [`VolumeConfig::builder`] (or the
/// [`w25q_reference`](VolumeConfig::w25q_reference) preset) and immutable
/// afterwards. All divisibility rules are checked at construction so no I/O
/// path ever has to re-validate them.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeConfig {
    read_size: u32,
    prog_size: u32,
    block_size: u32,
    block_count: u32,
    cache_size: u32,
    lookahead_size: u32,
    block_cycles: BlockCycles,
}

impl VolumeConfig {
    /// Reference geometry for a 512 KiB region of a W25Qxx serial NOR flash:
    /// 16-byte read/program/cache/lookahead granularity, 4096-byte sectors,
    /// 128 blocks, 500 erase cycles before metadata relocation.
    pub const fn w25q_reference() -> Self {
        Self {
            read_size: 16,
            prog_size: 16,
            block_size: 4096,
            block_count: 128,
            cache_size: 16,
            lookahead_size: 16,
            block_cycles: BlockCycles(500),
        }
    }

    /// Start a builder pre-filled with the reference geometry.
    ///
    /// # Examples
    ///
    /// ```
    /// use norfs_adapters::VolumeConfig;
    ///
    /// let config = VolumeConfig::builder()
    ///     .block_count(64)
    ///     .cache_size(64)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.capacity(), 64 * 4096);
    /// ```
    pub const fn builder() -> VolumeConfigBuilder {
        VolumeConfigBuilder {
            config: Self::w25q_reference(),
        }
    }

    /// Minimum read granularity in bytes.
    #[inline]
    pub const fn read_size(&self) -> u32 {
        self.read_size
    }

    /// Minimum program granularity in bytes.
    #[inline]
    pub const fn prog_size(&self) -> u32 {
        self.prog_size
    }

    /// Erase unit in bytes; one block maps to one flash sector.
    #[inline]
    pub const fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Number of blocks in the volume.
    #[inline]
    pub const fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Size of each cache buffer in bytes.
    #[inline]
    pub const fn cache_size(&self) -> u32 {
        self.cache_size
    }

    /// Size of the lookahead bitmap in bytes (tracks 8 blocks per byte).
    #[inline]
    pub const fn lookahead_size(&self) -> u32 {
        self.lookahead_size
    }

    /// Metadata relocation bound.
    #[inline]
    pub const fn block_cycles(&self) -> BlockCycles {
        self.block_cycles
    }

    /// Total bytes covered by the volume.
    #[inline]
    pub const fn capacity(&self) -> u64 {
        self.block_size as u64 * self.block_count as u64
    }

    /// Blocks covered by one lookahead window.
    #[inline]
    pub const fn lookahead_blocks(&self) -> u32 {
        let window = self.lookahead_size.saturating_mul(8);
        if window < self.block_count { window } else { self.block_count }
    }

    /// Volume-relative byte address of `offset` within `block`.
    ///
    /// Distinct in-range `(block, offset)` pairs never map to the same
    /// address.
    ///
    /// # Examples
    ///
    /// ```
    /// use norfs_adapters::VolumeConfig;
    ///
    /// let config = VolumeConfig::w25q_reference();
    /// assert_eq!(config.byte_address(2, 16), 2 * 4096 + 16);
    /// ```
    #[inline]
    pub const fn byte_address(&self, block: u32, offset: u32) -> u32 {
        block * self.block_size + offset
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("read_size", self.read_size),
            ("prog_size", self.prog_size),
            ("block_size", self.block_size),
            ("block_count", self.block_count),
            ("cache_size", self.cache_size),
            ("lookahead_size", self.lookahead_size),
        ];
        for (field, value) in sizes {
            if value == 0 {
                return Err(ConfigError::ZeroSize { field });
            }
        }

        let multiples = [
            ("block_size", self.block_size, self.read_size),
            ("block_size", self.block_size, self.prog_size),
            ("cache_size", self.cache_size, self.read_size),
            ("cache_size", self.cache_size, self.prog_size),
            ("block_size", self.block_size, self.cache_size),
            ("lookahead_size", self.lookahead_size, 8),
        ];
        for (field, value, granularity) in multiples {
            if value % granularity != 0 {
                return Err(ConfigError::Misaligned {
                    field,
                    value,
                    granularity,
                });
            }
        }

        if self.block_size < MIN_BLOCK_SIZE {
            return Err(ConfigError::BlockTooSmall {
                block_size: self.block_size,
                min: MIN_BLOCK_SIZE,
            });
        }
        if self.block_count < MIN_BLOCK_COUNT {
            return Err(ConfigError::TooFewBlocks {
                block_count: self.block_count,
                min: MIN_BLOCK_COUNT,
            });
        }
        if self.capacity() > u32::MAX as u64 {
            return Err(ConfigError::CapacityOverflow);
        }

        Ok(())
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self::w25q_reference()
    }
}

/// Builder for [`VolumeConfig`]; validation happens in [`build`](Self::build).
#[derive(Debug, Clone, Copy)]
pub struct VolumeConfigBuilder {
    config: VolumeConfig,
}

impl VolumeConfigBuilder {
    /// Set the read granularity.
    pub const fn read_size(mut self, read_size: u32) -> Self {
        self.config.read_size = read_size;
        self
    }

    /// Set the program granularity.
    pub const fn prog_size(mut self, prog_size: u32) -> Self {
        self.config.prog_size = prog_size;
        self
    }

    /// Set the block (erase sector) size.
    pub const fn block_size(mut self, block_size: u32) -> Self {
        self.config.block_size = block_size;
        self
    }

    /// Set the number of blocks.
    pub const fn block_count(mut self, block_count: u32) -> Self {
        self.config.block_count = block_count;
        self
    }

    /// Set the cache buffer size.
    pub const fn cache_size(mut self, cache_size: u32) -> Self {
        self.config.cache_size = cache_size;
        self
    }

    /// Set the lookahead bitmap size in bytes.
    pub const fn lookahead_size(mut self, lookahead_size: u32) -> Self {
        self.config.lookahead_size = lookahead_size;
        self
    }

    /// Set the metadata relocation bound.
    pub const fn block_cycles(mut self, block_cycles: BlockCycles) -> Self {
        self.config.block_cycles = block_cycles;
        self
    }

    /// Validate and produce the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first violated rule.
    pub fn build(self) -> Result<VolumeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_geometry() {
        let config = VolumeConfig::w25q_reference();
        assert_eq!(config.read_size(), 16);
        assert_eq!(config.prog_size(), 16);
        assert_eq!(config.block_size(), 4096);
        assert_eq!(config.block_count(), 128);
        assert_eq!(config.cache_size(), 16);
        assert_eq!(config.lookahead_size(), 16);
        assert_eq!(config.block_cycles().get(), Some(500));
        assert_eq!(config.capacity(), 512 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_accepts_larger_cache() {
        let config = VolumeConfig::builder().cache_size(256).build().unwrap();
        assert_eq!(config.cache_size(), 256);
    }

    #[test]
    fn test_zero_size_rejected() {
        let result = VolumeConfig::builder().block_count(0).build();
        assert_eq!(result, Err(ConfigError::ZeroSize { field: "block_count" }));
    }

    #[test]
    fn test_cache_must_be_multiple_of_granularity() {
        let result = VolumeConfig::builder().prog_size(32).cache_size(48).build();
        assert!(matches!(
            result,
            Err(ConfigError::Misaligned { field: "cache_size", .. })
        ));
    }

    #[test]
    fn test_block_must_be_multiple_of_read_size() {
        let result = VolumeConfig::builder().read_size(24).cache_size(48).build();
        assert!(matches!(
            result,
            Err(ConfigError::Misaligned { field: "block_size", value: 4096, granularity: 24 })
        ));
    }

    #[test]
    fn test_lookahead_multiple_of_eight() {
        let result = VolumeConfig::builder().lookahead_size(12).build();
        assert!(matches!(
            result,
            Err(ConfigError::Misaligned { field: "lookahead_size", .. })
        ));
    }

    #[test]
    fn test_minimums() {
        assert!(matches!(
            VolumeConfig::builder().block_count(3).build(),
            Err(ConfigError::TooFewBlocks { block_count: 3, .. })
        ));
        assert!(matches!(
            VolumeConfig::builder().block_size(64).build(),
            Err(ConfigError::BlockTooSmall { block_size: 64, .. })
        ));
    }

    #[test]
    fn test_capacity_overflow() {
        let result = VolumeConfig::builder().block_count(u32::MAX / 1024).build();
        assert_eq!(result, Err(ConfigError::CapacityOverflow));
    }

    #[test]
    fn test_block_cycles_raw() {
        assert_eq!(BlockCycles::from_raw(-1), Ok(BlockCycles::UNBOUNDED));
        assert_eq!(BlockCycles::from_raw(-2), Err(ConfigError::InvalidBlockCycles(-2)));
        assert_eq!(BlockCycles::from_raw(0), Err(ConfigError::InvalidBlockCycles(0)));
        assert_eq!(BlockCycles::UNBOUNDED.get(), None);
        assert_eq!(BlockCycles::UNBOUNDED.to_raw(), -1);
        assert_eq!(BlockCycles::bounded(0), None);
    }

    #[test]
    fn test_address_translation_is_injective() {
        let config = VolumeConfig::builder()
            .block_size(256)
            .block_count(8)
            .build()
            .unwrap();

        let mut seen = std::collections::HashSet::new();
        for block in 0..config.block_count() {
            for offset in 0..config.block_size() {
                assert!(seen.insert(config.byte_address(block, offset)));
            }
        }
        assert_eq!(seen.len() as u64, config.capacity());
        assert_eq!(config.byte_address(3, 5), 3 * 256 + 5);
    }

    #[test]
    fn test_lookahead_window_clamped() {
        let config = VolumeConfig::w25q_reference();
        assert_eq!(config.lookahead_blocks(), 128);

        let small = VolumeConfig::builder().lookahead_size(8).build().unwrap();
        assert_eq!(small.lookahead_blocks(), 64);
    }
}

//! NOR flash adapter for embedded-storage traits
//!
//! This module provides the block-device adapter: it wraps a type
//! implementing the `embedded-storage` NOR flash traits and exposes it as a
//! [`BlockDevice`] for the filesystem.
//!
//! # Example
//!
//! ```ignore
//! use norfs_adapters::{NorFlashAdapter, VolumeConfig};
//!
//! let flash = W25q::new(spi, cs);
//! let adapter = NorFlashAdapter::new(flash, VolumeConfig::w25q_reference())?;
//! ```

use embedded_storage::nor_flash::{NorFlash, NorFlashError as _};

use crate::domain::{
    BlockDevice, ConfigError, DeviceError, NoRetry, Operation, RetryPolicy, VolumeConfig,
};

/// Adapter that wraps embedded-storage NOR flash as a [`BlockDevice`].
///
/// Every block maps to exactly one erase sector:
/// `address = base + block * block_size + offset`.
/// Reads and programs are passed straight through (no read-modify-write,
/// no implicit erase) and `sync` is a no-op because the NOR flash traits
/// are write-through.
///
/// Geometry is checked against the chip once, in [`new`](Self::new) /
/// [`with_base`](Self::with_base); the per-call paths only debug-assert the
/// caller's preconditions.
///
/// # Example
///
/// ```ignore
/// use norfs_adapters::{NorFlashAdapter, RetryTimes, VolumeConfig};
///
/// let config = VolumeConfig::w25q_reference();
/// // Volume in the upper half of a 1 MiB chip, retrying flaky transfers twice
/// let adapter = NorFlashAdapter::with_base(flash, config, 0x8_0000)?
///     .with_retry(RetryTimes(2));
/// ```
pub struct NorFlashAdapter<F, R = NoRetry> {
    flash: F,
    config: VolumeConfig,
    base: u32,
    retry: R,
}

impl<F: NorFlash> NorFlashAdapter<F, NoRetry> {
    /// Create an adapter for a volume starting at flash address 0.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the geometry does not fit the chip: the
    /// block size differs from the erase size, a granularity is not a
    /// multiple of the chip's, or the volume exceeds the chip's capacity.
    pub fn new(flash: F, config: VolumeConfig) -> Result<Self, ConfigError> {
        Self::with_base(flash, config, 0)
    }

    /// Create an adapter for a volume starting at flash address `base`.
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new), plus [`ConfigError::UnalignedBase`] when `base`
    /// is not sector-aligned.
    pub fn with_base(flash: F, config: VolumeConfig, base: u32) -> Result<Self, ConfigError> {
        check_geometry(&flash, &config, base)?;
        debug!(
            "nor flash adapter: {} blocks of {} bytes at {:#x}",
            config.block_count(),
            config.block_size(),
            base
        );
        Ok(Self {
            flash,
            config,
            base,
            retry: NoRetry,
        })
    }
}

impl<F: NorFlash, R: RetryPolicy> NorFlashAdapter<F, R> {
    /// Replace the retry policy.
    pub fn with_retry<P: RetryPolicy>(self, retry: P) -> NorFlashAdapter<F, P> {
        NorFlashAdapter {
            flash: self.flash,
            config: self.config,
            base: self.base,
            retry,
        }
    }

    /// Flash byte address of `offset` within `block`.
    #[inline]
    pub fn physical_address(&self, block: u32, offset: u32) -> u32 {
        self.base + self.config.byte_address(block, offset)
    }

    /// Region base address.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Get a reference to the underlying flash.
    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Get a mutable reference to the underlying flash.
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Consume the adapter and return the underlying flash.
    pub fn into_inner(self) -> F {
        self.flash
    }

    #[inline]
    fn check_range(&self, block: u32, offset: u32, len: usize) {
        debug_assert!(block < self.config.block_count(), "block {} out of range", block);
        debug_assert!(
            offset as usize + len <= self.config.block_size() as usize,
            "access crosses block boundary"
        );
    }

    fn attempt(
        &mut self,
        operation: Operation,
        block: u32,
        mut op: impl FnMut(&mut F) -> Result<(), F::Error>,
    ) -> Result<(), DeviceError> {
        let mut failures = 0;
        loop {
            match op(&mut self.flash) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    failures += 1;
                    let error = DeviceError::new(operation, block, e.kind().into());
                    if !self.retry.should_retry(&error, failures) {
                        warn!("flash {} of block {} failed", operation, block);
                        return Err(error);
                    }
                    debug!("retrying flash {} of block {} ({})", operation, block, failures);
                }
            }
        }
    }
}

fn check_geometry<F: NorFlash>(
    flash: &F,
    config: &VolumeConfig,
    base: u32,
) -> Result<(), ConfigError> {
    if config.block_size() as usize != F::ERASE_SIZE {
        return Err(ConfigError::EraseSizeMismatch {
            block_size: config.block_size(),
            erase_size: F::ERASE_SIZE,
        });
    }
    let granularities = [
        ("read_size", config.read_size(), F::READ_SIZE),
        ("prog_size", config.prog_size(), F::WRITE_SIZE),
    ];
    for (field, value, chip) in granularities {
        if value as usize % chip != 0 {
            return Err(ConfigError::Misaligned {
                field,
                value,
                granularity: chip as u32,
            });
        }
    }
    if base as usize % F::ERASE_SIZE != 0 {
        return Err(ConfigError::UnalignedBase {
            base,
            erase_size: F::ERASE_SIZE,
        });
    }
    let required = base as u64 + config.capacity();
    let capacity = flash.capacity() as u64;
    if required > capacity || required > u32::MAX as u64 {
        return Err(ConfigError::ExceedsFlash { required, capacity });
    }
    Ok(())
}

impl<F: NorFlash, R: RetryPolicy> BlockDevice for NorFlashAdapter<F, R> {
    fn config(&self) -> &VolumeConfig {
        &self.config
    }

    fn read(&mut self, block: u32, offset: u32, buffer: &mut [u8]) -> Result<(), DeviceError> {
        self.check_range(block, offset, buffer.len());
        let address = self.physical_address(block, offset);
        trace!("read {} bytes at {:#x}", buffer.len(), address);
        self.attempt(Operation::Read, block, |flash| flash.read(address, &mut buffer[..]))
    }

    fn program(&mut self, block: u32, offset: u32, data: &[u8]) -> Result<(), DeviceError> {
        self.check_range(block, offset, data.len());
        let address = self.physical_address(block, offset);
        trace!("program {} bytes at {:#x}", data.len(), address);
        self.attempt(Operation::Program, block, |flash| flash.write(address, data))
    }

    fn erase(&mut self, block: u32) -> Result<(), DeviceError> {
        self.check_range(block, 0, 0);
        let from = self.physical_address(block, 0);
        let to = from + self.config.block_size();
        trace!("erase sector {:#x}..{:#x}", from, to);
        self.attempt(Operation::Erase, block, |flash| flash.erase(from, to))
    }

    fn sync(&mut self) -> Result<(), DeviceError> {
        // NOR flash writes are synchronous
        Ok(())
    }
}

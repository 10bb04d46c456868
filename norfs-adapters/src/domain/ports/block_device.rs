//! BlockDevice port - the callbacks a filesystem drives.
//!
//! Addresses are `(block, offset)` pairs relative to the volume; turning
//! them into flash byte addresses is the implementor's job.

use crate::domain::{error::DeviceError, value_objects::VolumeConfig};

/// Block-level storage as seen by the filesystem.
///
/// All operations are synchronous and block until the transfer completes.
/// Implementations are not reentrant: `&mut self` on every call makes the
/// single-owner requirement explicit.
///
/// # Contract
///
/// | Operation | Effect |
/// |-----------|--------|
/// | `read`    | fill `buffer` from `block_size * block + offset` |
/// | `program` | write `data` to `block_size * block + offset`; the region must be erased |
/// | `erase`   | erase the whole physical sector backing `block` |
/// | `sync`    | flush pending writes; a no-op for write-through devices |
///
/// Callers keep `offset + len <= block_size` and align offsets and lengths
/// to [`VolumeConfig::read_size`] / [`VolumeConfig::prog_size`].
pub trait BlockDevice {
    /// Geometry this device was built for.
    fn config(&self) -> &VolumeConfig;

    /// Read `buffer.len()` bytes at `offset` within `block`.
    ///
    /// # Errors
    ///
    /// Returns the driver fault as a [`DeviceError`].
    fn read(&mut self, block: u32, offset: u32, buffer: &mut [u8]) -> Result<(), DeviceError>;

    /// Program `data` at `offset` within `block`.
    ///
    /// No read-modify-write is performed: the target bytes must have been
    /// erased since they were last programmed.
    ///
    /// # Errors
    ///
    /// Returns the driver fault as a [`DeviceError`].
    fn program(&mut self, block: u32, offset: u32, data: &[u8]) -> Result<(), DeviceError>;

    /// Erase `block`, returning every byte to the erased state.
    ///
    /// # Errors
    ///
    /// Returns the driver fault as a [`DeviceError`].
    fn erase(&mut self, block: u32) -> Result<(), DeviceError>;

    /// Flush writes the device may still be holding.
    ///
    /// The default implementation is a no-op that always succeeds, which is
    /// correct for drivers that program synchronously.
    ///
    /// # Errors
    ///
    /// Returns the driver fault as a [`DeviceError`].
    fn sync(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    fn config(&self) -> &VolumeConfig {
        T::config(self)
    }

    fn read(&mut self, block: u32, offset: u32, buffer: &mut [u8]) -> Result<(), DeviceError> {
        T::read(self, block, offset, buffer)
    }

    fn program(&mut self, block: u32, offset: u32, data: &[u8]) -> Result<(), DeviceError> {
        T::program(self, block, offset, data)
    }

    fn erase(&mut self, block: u32) -> Result<(), DeviceError> {
        T::erase(self, block)
    }

    fn sync(&mut self) -> Result<(), DeviceError> {
        T::sync(self)
    }
}

//! Persistent boot counter.
//!
//! A 4-byte little-endian `u32` in [`BOOT_COUNT_FILE`]. Formatting the volume
//! is the only thing that resets it.

use norfs_adapters::BlockDevice;

use crate::error::Error;
use crate::file::OpenFlags;
use crate::volume::Volume;

/// Name of the counter file.
pub const BOOT_COUNT_FILE: &str = "boot_count";

/// Count one boot and return the new value.
///
/// The counter becomes durable when the file is closed; a power cut before
/// that leaves the previous value in place. A missing or short file reads
/// as 0, and the counter saturates at `u32::MAX`.
///
/// # Examples
///
/// ```
/// use norfs::{boot_count, RecoveryPolicy, Volume};
/// use norfs_adapters::{BufferPool, NorFlashAdapter, VolumeConfig, W25qRamFlash};
///
/// let config = VolumeConfig::w25q_reference();
/// let device = NorFlashAdapter::new(W25qRamFlash::new(128), config)?;
/// let mut volume = Volume::new(device, BufferPool::allocate(&config))?;
/// volume.mount_or_format(RecoveryPolicy::default())?;
///
/// assert_eq!(boot_count::record_boot(&mut volume)?, 1);
/// assert_eq!(boot_count::record_boot(&mut volume)?, 2);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn record_boot<D, B>(volume: &mut Volume<D, B>) -> Result<u32, Error>
where
    D: BlockDevice,
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    let mut file = volume.open(BOOT_COUNT_FILE, OpenFlags::READ_WRITE | OpenFlags::CREATE)?;
    let mut raw = [0u8; 4];
    let previous = match file.read_to_fill(&mut raw)? {
        4 => u32::from_le_bytes(raw),
        _ => 0,
    };
    let count = previous.saturating_add(1);
    file.rewind()?;
    file.write(&count.to_le_bytes())?;
    file.close()?;
    info!("boot count: {}", count);
    Ok(count)
}

/// The stored counter, 0 if there is none.
pub fn read_boot_count<D, B>(volume: &mut Volume<D, B>) -> Result<u32, Error>
where
    D: BlockDevice,
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    let mut file = match volume.open(BOOT_COUNT_FILE, OpenFlags::READ) {
        Ok(file) => file,
        Err(Error::NotFound) => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut raw = [0u8; 4];
    let count = match file.read_to_fill(&mut raw)? {
        4 => u32::from_le_bytes(raw),
        _ => 0,
    };
    file.close()?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use norfs_adapters::{BufferPool, NorFlashAdapter, VolumeConfig, W25qRamFlash};

    fn mounted() -> Volume<NorFlashAdapter<W25qRamFlash>, Vec<u8>> {
        let config = VolumeConfig::builder().block_count(16).build().unwrap();
        let device = NorFlashAdapter::new(W25qRamFlash::new(16), config).unwrap();
        let mut volume = Volume::new(device, BufferPool::allocate(&config)).unwrap();
        volume.format().unwrap();
        volume.mount().unwrap();
        volume
    }

    #[test]
    fn test_missing_counter_reads_zero() {
        let mut volume = mounted();
        assert_eq!(read_boot_count(&mut volume).unwrap(), 0);
    }

    #[test]
    fn test_short_file_counts_from_zero() {
        let mut volume = mounted();
        let mut file = volume.open(BOOT_COUNT_FILE, OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
        file.write(&[7, 7]).unwrap();
        file.close().unwrap();

        assert_eq!(record_boot(&mut volume).unwrap(), 1);
        assert_eq!(volume.metadata(BOOT_COUNT_FILE).unwrap().len(), 4);
    }

    #[test]
    fn test_counter_saturates() {
        let mut volume = mounted();
        let mut file = volume.open(BOOT_COUNT_FILE, OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
        file.write(&u32::MAX.to_le_bytes()).unwrap();
        file.close().unwrap();

        assert_eq!(record_boot(&mut volume).unwrap(), u32::MAX);
        assert_eq!(read_boot_count(&mut volume).unwrap(), u32::MAX);
    }
}

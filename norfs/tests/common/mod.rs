//! Volumes over the RAM flash simulator, shared by the integration tests.

#![allow(dead_code)]

use norfs::Volume;
use norfs_adapters::embedded_storage::nor_flash::NorFlash;
use norfs_adapters::{BlockCycles, BufferPool, NorFlashAdapter, RamNorFlash, VolumeConfig, W25qRamFlash};

pub type RamVolume<F = W25qRamFlash> = Volume<NorFlashAdapter<F>, Vec<u8>>;

/// Chip with 512-byte sectors, so metadata blocks fill up quickly.
pub type SmallSectorFlash = RamNorFlash<512>;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The 512 KiB reference volume on a blank chip.
pub fn reference_volume() -> anyhow::Result<RamVolume> {
    volume_on(W25qRamFlash::new(128), VolumeConfig::w25q_reference())
}

/// A 16-block volume on a blank chip.
pub fn small_volume() -> anyhow::Result<RamVolume> {
    let config = VolumeConfig::builder().block_count(16).build()?;
    volume_on(W25qRamFlash::new(16), config)
}

/// 32 blocks of 512 bytes, relocating the directory every `cycles`
/// compactions.
pub fn small_sector_volume(cycles: u32) -> anyhow::Result<RamVolume<SmallSectorFlash>> {
    let config = VolumeConfig::builder()
        .block_size(512)
        .block_count(32)
        .block_cycles(BlockCycles::bounded(cycles).ok_or_else(|| anyhow::anyhow!("zero cycles"))?)
        .build()?;
    volume_on(SmallSectorFlash::new(32), config)
}

pub fn volume_on<F: NorFlash>(flash: F, config: VolumeConfig) -> anyhow::Result<RamVolume<F>> {
    init_logger();
    let device = NorFlashAdapter::new(flash, config)?;
    Ok(Volume::new(device, BufferPool::allocate(&config))?)
}

/// Throw away all in-memory state, as a reset would, keeping the flash.
pub fn reboot<F: NorFlash>(volume: RamVolume<F>) -> anyhow::Result<RamVolume<F>> {
    let (device, buffers) = volume.into_parts();
    Ok(Volume::new(device, buffers)?)
}

/// Reopen a saved flash image with the reference geometry.
pub fn from_image(image: Vec<u8>) -> anyhow::Result<RamVolume> {
    volume_on(W25qRamFlash::from_image(image)?, VolumeConfig::w25q_reference())
}

/// The flash contents of a reference volume.
pub fn into_image(volume: RamVolume) -> Vec<u8> {
    let (device, _) = volume.into_parts();
    device.into_inner().into_image()
}

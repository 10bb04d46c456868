//! In-memory NOR flash simulator.
//!
//! Behaves like a serial NOR part: erased bytes read `0xFF`, programming can
//! only clear bits, and erase works on whole sectors. Used by tests and by
//! host tools that operate on flash image files.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use embedded_storage::nor_flash::{
    check_erase, check_read, check_write, ErrorType, NorFlash, NorFlashError, NorFlashErrorKind,
    ReadNorFlash,
};

/// Erased state of a NOR flash byte.
pub const ERASED_BYTE: u8 = 0xFF;

/// Simulated W25Qxx: 4 KiB sectors, byte-granular read and program.
pub type W25qRamFlash = RamNorFlash<4096>;

/// Failures to inject into upcoming operations.
///
/// Each counter makes that many of the next operations of its kind fail
/// with [`NorFlashErrorKind::Other`], then the chip behaves normally again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Reads to fail.
    pub fail_reads: u32,
    /// Writes to fail.
    pub fail_writes: u32,
    /// Writes that still succeed before `fail_writes` takes effect.
    pub pass_writes: u32,
    /// Erases to fail.
    pub fail_erases: u32,
}

/// Successful operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlashStats {
    /// Completed reads.
    pub reads: u64,
    /// Completed writes.
    pub writes: u64,
    /// Completed sector erases.
    pub erases: u64,
}

/// Error type for the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamFlashError(NorFlashErrorKind);

impl NorFlashError for RamFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        self.0
    }
}

impl fmt::Display for RamFlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "simulated NOR flash error: {:?}", self.0)
    }
}

impl core::error::Error for RamFlashError {}

/// RAM-backed NOR flash with `SECTOR_SIZE`-byte erase sectors.
pub struct RamNorFlash<const SECTOR_SIZE: usize> {
    data: Vec<u8>,
    erase_counts: Vec<u32>,
    faults: FaultPlan,
    stats: FlashStats,
}

impl<const SECTOR_SIZE: usize> RamNorFlash<SECTOR_SIZE> {
    /// A fully erased chip of `sectors` sectors.
    pub fn new(sectors: usize) -> Self {
        Self {
            data: vec![ERASED_BYTE; sectors * SECTOR_SIZE],
            erase_counts: vec![0; sectors],
            faults: FaultPlan::default(),
            stats: FlashStats::default(),
        }
    }

    /// Load a chip from a raw image.
    ///
    /// # Errors
    ///
    /// Fails with [`NorFlashErrorKind::NotAligned`] if the image is empty or
    /// not a whole number of sectors.
    pub fn from_image(image: Vec<u8>) -> Result<Self, RamFlashError> {
        if image.is_empty() || image.len() % SECTOR_SIZE != 0 {
            return Err(RamFlashError(NorFlashErrorKind::NotAligned));
        }
        let sectors = image.len() / SECTOR_SIZE;
        Ok(Self {
            data: image,
            erase_counts: vec![0; sectors],
            faults: FaultPlan::default(),
            stats: FlashStats::default(),
        })
    }

    /// Raw contents.
    pub fn image(&self) -> &[u8] {
        &self.data
    }

    /// Raw contents, writable without NOR semantics (for corrupting images
    /// in tests).
    pub fn image_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consume the chip and return its contents.
    pub fn into_image(self) -> Vec<u8> {
        self.data
    }

    /// Number of sectors.
    pub fn sectors(&self) -> usize {
        self.erase_counts.len()
    }

    /// Times `sector` has been erased since the simulator was created.
    pub fn erase_count(&self, sector: usize) -> u32 {
        self.erase_counts.get(sector).copied().unwrap_or(0)
    }

    /// Highest erase count over all sectors.
    pub fn max_erase_count(&self) -> u32 {
        self.erase_counts.iter().copied().max().unwrap_or(0)
    }

    /// Make upcoming operations fail.
    pub fn inject(&mut self, faults: FaultPlan) {
        self.faults = faults;
    }

    /// Operation counters.
    pub fn stats(&self) -> FlashStats {
        self.stats
    }

    fn take_fault(counter: &mut u32) -> Result<(), RamFlashError> {
        if *counter > 0 {
            *counter -= 1;
            return Err(RamFlashError(NorFlashErrorKind::Other));
        }
        Ok(())
    }
}

impl<const SECTOR_SIZE: usize> ErrorType for RamNorFlash<SECTOR_SIZE> {
    type Error = RamFlashError;
}

impl<const SECTOR_SIZE: usize> ReadNorFlash for RamNorFlash<SECTOR_SIZE> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len()).map_err(RamFlashError)?;
        Self::take_fault(&mut self.faults.fail_reads)?;
        let start = offset as usize;
        bytes.copy_from_slice(&self.data[start..start + bytes.len()]);
        self.stats.reads += 1;
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl<const SECTOR_SIZE: usize> NorFlash for RamNorFlash<SECTOR_SIZE> {
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to).map_err(RamFlashError)?;
        Self::take_fault(&mut self.faults.fail_erases)?;
        let (from, to) = (from as usize, to as usize);
        self.data[from..to].fill(ERASED_BYTE);
        for sector in from / SECTOR_SIZE..to / SECTOR_SIZE {
            self.erase_counts[sector] += 1;
            self.stats.erases += 1;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len()).map_err(RamFlashError)?;
        if self.faults.pass_writes > 0 {
            self.faults.pass_writes -= 1;
        } else {
            Self::take_fault(&mut self.faults.fail_writes)?;
        }
        let start = offset as usize;
        // Programming only clears bits
        for (cell, byte) in self.data[start..start + bytes.len()].iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        self.stats.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_chip_is_erased() {
        let flash = W25qRamFlash::new(4);
        assert_eq!(flash.capacity(), 4 * 4096);
        assert!(flash.image().iter().all(|&b| b == ERASED_BYTE));
    }

    #[test]
    fn test_program_only_clears_bits() {
        let mut flash = W25qRamFlash::new(1);
        flash.write(0, &[0b1010_1010]).unwrap();
        flash.write(0, &[0b0110_0110]).unwrap();

        let mut byte = [0u8];
        flash.read(0, &mut byte).unwrap();
        assert_eq!(byte[0], 0b0010_0010);
    }

    #[test]
    fn test_erase_whole_sectors_only() {
        let mut flash = W25qRamFlash::new(2);
        assert_eq!(
            flash.erase(0, 100).unwrap_err().kind(),
            NorFlashErrorKind::NotAligned
        );
        flash.write(4096, &[0]).unwrap();
        flash.erase(4096, 8192).unwrap();
        assert_eq!(flash.image()[4096], ERASED_BYTE);
        assert_eq!(flash.erase_count(1), 1);
        assert_eq!(flash.erase_count(0), 0);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut flash = W25qRamFlash::new(1);
        let mut buf = [0u8; 8];
        assert_eq!(
            flash.read(4092, &mut buf).unwrap_err().kind(),
            NorFlashErrorKind::OutOfBounds
        );
    }

    #[test]
    fn test_from_image_requires_whole_sectors() {
        assert!(W25qRamFlash::from_image(vec![0xFF; 100]).is_err());
        assert!(W25qRamFlash::from_image(Vec::new()).is_err());

        let flash = W25qRamFlash::from_image(vec![0x00; 8192]).unwrap();
        assert_eq!(flash.sectors(), 2);
        assert_eq!(flash.into_image().len(), 8192);
    }

    #[test]
    fn test_fault_injection_is_consumed() {
        let mut flash = W25qRamFlash::new(1);
        flash.inject(FaultPlan { fail_reads: 2, ..FaultPlan::default() });

        let mut buf = [0u8; 4];
        assert!(flash.read(0, &mut buf).is_err());
        assert!(flash.read(0, &mut buf).is_err());
        assert!(flash.read(0, &mut buf).is_ok());
        assert_eq!(flash.stats().reads, 1);
    }

    #[test]
    fn test_write_fault_after_passed_writes() {
        let mut flash = W25qRamFlash::new(1);
        flash.inject(FaultPlan {
            fail_writes: 1,
            pass_writes: 2,
            ..FaultPlan::default()
        });

        assert!(flash.write(0, &[0x00]).is_ok());
        assert!(flash.write(1, &[0x00]).is_ok());
        assert!(flash.write(2, &[0x00]).is_err());
        assert!(flash.write(2, &[0x00]).is_ok());
        assert_eq!(flash.stats().writes, 3);
        assert_eq!(&flash.image()[..4], &[0x00, 0x00, 0x00, 0xFF]);
    }
}

//! Domain-level errors.
//!
//! Two families live here: [`ConfigError`], raised once while a volume is
//! being assembled, and [`DeviceError`], the single signal a block device
//! hands back to the filesystem when the flash driver faults.

use core::fmt;
use embedded_storage::nor_flash::NorFlashErrorKind;

/// Which buffer of a [`BufferPool`](crate::BufferPool) a sizing error refers to.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Read cache.
    Read,
    /// Program cache.
    Program,
    /// Lookahead bitmap for the block allocator.
    Lookahead,
    /// Per-file cache.
    File,
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Program => "program",
            Self::Lookahead => "lookahead",
            Self::File => "file",
        };
        f.write_str(name)
    }
}

/// Geometry or sizing rule violated while constructing a volume.
///
/// Never produced by an I/O call: every check happens in
/// [`VolumeConfigBuilder::build`](crate::VolumeConfigBuilder::build),
/// [`BufferPool::new`](crate::BufferPool::new) or
/// [`NorFlashAdapter::new`](crate::NorFlashAdapter::new).
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A size field is zero.
    ZeroSize {
        /// Name of the field.
        field: &'static str,
    },
    /// A size is not a multiple of the granularity it must honour.
    Misaligned {
        /// Name of the offending field.
        field: &'static str,
        /// Its value.
        value: u32,
        /// The granularity it must be a multiple of.
        granularity: u32,
    },
    /// Blocks are too small to hold the filesystem's metadata commits.
    BlockTooSmall {
        /// Configured block size.
        block_size: u32,
        /// Minimum supported block size.
        min: u32,
    },
    /// Not enough blocks for the two metadata pairs.
    TooFewBlocks {
        /// Configured block count.
        block_count: u32,
        /// Minimum supported block count.
        min: u32,
    },
    /// `block_size * block_count` does not fit the 32-bit flash address space.
    CapacityOverflow,
    /// `block_cycles` must be positive or the unbounded sentinel `-1`.
    InvalidBlockCycles(i32),
    /// A pool buffer is smaller than the geometry requires.
    BufferTooSmall {
        /// Which buffer.
        buffer: BufferKind,
        /// Bytes required by the configuration.
        required: usize,
        /// Bytes supplied.
        actual: usize,
    },
    /// The flash chip's erase sector differs from the configured block size.
    EraseSizeMismatch {
        /// Configured block size.
        block_size: u32,
        /// Physical erase granularity of the chip.
        erase_size: usize,
    },
    /// The configured region does not fit in the flash chip.
    ExceedsFlash {
        /// Last byte address needed, exclusive.
        required: u64,
        /// Chip capacity in bytes.
        capacity: u64,
    },
    /// The region base is not aligned to an erase sector.
    UnalignedBase {
        /// Region base address.
        base: u32,
        /// Physical erase granularity of the chip.
        erase_size: usize,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroSize { field } => write!(f, "{} cannot be zero", field),
            Self::Misaligned {
                field,
                value,
                granularity,
            } => write!(f, "{} {} must be a multiple of {}", field, value, granularity),
            Self::BlockTooSmall { block_size, min } => {
                write!(f, "Block size {} is below the minimum of {}", block_size, min)
            }
            Self::TooFewBlocks { block_count, min } => {
                write!(f, "Block count {} is below the minimum of {}", block_count, min)
            }
            Self::CapacityOverflow => write!(f, "Volume capacity overflows the flash address space"),
            Self::InvalidBlockCycles(raw) => {
                write!(f, "block_cycles {} must be positive or -1 (unbounded)", raw)
            }
            Self::BufferTooSmall {
                buffer,
                required,
                actual,
            } => write!(
                f,
                "{} buffer holds {} bytes but {} are required",
                buffer, actual, required
            ),
            Self::EraseSizeMismatch {
                block_size,
                erase_size,
            } => write!(
                f,
                "Block size {} does not match the flash erase size {}",
                block_size, erase_size
            ),
            Self::ExceedsFlash { required, capacity } => write!(
                f,
                "Volume needs {} bytes of flash but the chip holds {}",
                required, capacity
            ),
            Self::UnalignedBase { base, erase_size } => write!(
                f,
                "Region base {:#x} is not aligned to the erase size {}",
                base, erase_size
            ),
        }
    }
}

impl core::error::Error for ConfigError {}

/// The block-device operation that failed.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Block read.
    Read,
    /// Block program.
    Program,
    /// Block erase.
    Erase,
    /// Device sync.
    Sync,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Program => "program",
            Self::Erase => "erase",
            Self::Sync => "sync",
        };
        f.write_str(name)
    }
}

/// Driver-reported fault class, mirrored from `NorFlashErrorKind`.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashFault {
    /// The driver rejected the alignment of the request.
    NotAligned,
    /// The request reached past the end of the chip.
    OutOfBounds,
    /// Any other driver failure.
    Other,
}

impl From<NorFlashErrorKind> for FlashFault {
    fn from(kind: NorFlashErrorKind) -> Self {
        match kind {
            NorFlashErrorKind::NotAligned => Self::NotAligned,
            NorFlashErrorKind::OutOfBounds => Self::OutOfBounds,
            _ => Self::Other,
        }
    }
}

/// I/O failure reported by a block device.
///
/// Carried upward unchanged; the adapter does not classify faults as
/// transient or permanent.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceError {
    /// Operation that failed.
    pub operation: Operation,
    /// Block the operation addressed.
    pub block: u32,
    /// What the driver reported.
    pub fault: FlashFault,
}

impl DeviceError {
    /// Create a device error.
    pub const fn new(operation: Operation, block: u32, fault: FlashFault) -> Self {
        Self {
            operation,
            block,
            fault,
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Flash {} of block {} failed ({:?})",
            self.operation, self.block, self.fault
        )
    }
}

impl core::error::Error for DeviceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_too_small_display() {
        let error = ConfigError::BufferTooSmall {
            buffer: BufferKind::File,
            required: 16,
            actual: 8,
        };

        let msg = format!("{}", error);
        assert!(msg.contains("file buffer"));
        assert!(msg.contains("16"));
        assert!(msg.contains("8"));
    }

    #[test]
    fn test_fault_from_kind() {
        assert_eq!(FlashFault::from(NorFlashErrorKind::NotAligned), FlashFault::NotAligned);
        assert_eq!(FlashFault::from(NorFlashErrorKind::OutOfBounds), FlashFault::OutOfBounds);
        assert_eq!(FlashFault::from(NorFlashErrorKind::Other), FlashFault::Other);
    }

    #[test]
    fn test_device_error_display() {
        let error = DeviceError::new(Operation::Erase, 7, FlashFault::Other);
        let msg = format!("{}", error);
        assert!(msg.contains("erase"));
        assert!(msg.contains("block 7"));
    }
}

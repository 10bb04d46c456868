use core::fmt;

use norfs_adapters::{ConfigError, DeviceError};

/// Error enum with all errors that can be returned by functions from this crate.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The block device failed.
    Io(DeviceError),
    /// Metadata failed its checksum or points outside the volume.
    Corrupt,
    /// The anchor blocks are erased: the volume was never formatted.
    NoFilesystem,
    /// A filesystem is present but was written with another version or geometry.
    Incompatible,
    /// The flash holds another filesystem's image (littlefs). It is never an
    /// [image failure](Error::is_image_failure), so only
    /// [`RecoveryPolicy::FormatOnFailure`](crate::RecoveryPolicy::FormatOnFailure)
    /// formats over it.
    ForeignFilesystem,
    /// No file with the given name exists.
    NotFound,
    /// A file with the given name already exists and `EXCL` was requested.
    Exists,
    /// Every block is in use, or a metadata commit does not fit its block.
    NoSpace,
    /// The file name is longer than [`NAME_MAX`](crate::NAME_MAX) bytes.
    NameTooLong,
    /// The file was not opened with [`OpenFlags::READ`](crate::OpenFlags::READ).
    NotOpenForRead,
    /// The file was not opened with [`OpenFlags::WRITE`](crate::OpenFlags::WRITE).
    NotOpenForWrite,
    /// An argument is invalid: empty name, bad flags, seek before the start.
    Invalid,
    /// The operation needs a mounted volume.
    NotMounted,
    /// The file would exceed the 32-bit size limit.
    FileTooLarge,
    /// The volume could not be assembled.
    Config(ConfigError),
}

impl Error {
    /// Whether this error says the on-flash image is unusable, as opposed to
    /// the device failing to deliver it.
    pub fn is_image_failure(&self) -> bool {
        matches!(self, Self::Corrupt | Self::NoFilesystem | Self::Incompatible)
    }
}

impl From<DeviceError> for Error {
    fn from(error: DeviceError) -> Self {
        Error::Io(error)
    }
}

impl From<ConfigError> for Error {
    fn from(error: ConfigError) -> Self {
        Error::Config(error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(error) => write!(f, "IO error: {error}"),
            Error::Corrupt => write!(f, "Corrupted metadata"),
            Error::NoFilesystem => write!(f, "No filesystem found"),
            Error::Incompatible => write!(f, "Incompatible filesystem version or geometry"),
            Error::ForeignFilesystem => write!(f, "Flash holds a littlefs image"),
            Error::NotFound => write!(f, "No such file"),
            Error::Exists => write!(f, "File already exists"),
            Error::NoSpace => write!(f, "No space left on volume"),
            Error::NameTooLong => write!(f, "File name too long"),
            Error::NotOpenForRead => write!(f, "File not opened for reading"),
            Error::NotOpenForWrite => write!(f, "File not opened for writing"),
            Error::Invalid => write!(f, "Invalid argument"),
            Error::NotMounted => write!(f, "Volume not mounted"),
            Error::FileTooLarge => write!(f, "File too large"),
            Error::Config(error) => write!(f, "Invalid configuration: {error}"),
        }
    }
}

impl core::error::Error for Error {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Error::Io(error) => Some(error),
            Error::Config(error) => Some(error),
            _ => None,
        }
    }
}

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        use embedded_io::ErrorKind;
        match self {
            Error::NotFound => ErrorKind::NotFound,
            Error::Exists => ErrorKind::AlreadyExists,
            Error::NoSpace => ErrorKind::OutOfMemory,
            Error::Corrupt | Error::NoFilesystem | Error::Incompatible | Error::ForeignFilesystem => {
                ErrorKind::InvalidData
            }
            Error::NameTooLong | Error::Invalid | Error::FileTooLarge | Error::Config(_) => {
                ErrorKind::InvalidInput
            }
            Error::NotOpenForRead | Error::NotOpenForWrite => ErrorKind::PermissionDenied,
            Error::Io(_) | Error::NotMounted => ErrorKind::Other,
        }
    }
}

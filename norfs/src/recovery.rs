//! Mounting with first-boot recovery.

use norfs_adapters::BlockDevice;

use crate::error::Error;
use crate::volume::Volume;

/// What to do when the volume does not mount.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RecoveryPolicy {
    /// Format and mount again on any failure, I/O faults included. Every file
    /// on the volume is lost.
    #[default]
    FormatOnFailure,
    /// Retry the mount once, then format only when the image itself is bad
    /// ([`Error::is_image_failure`]). Device faults are returned.
    Diagnose,
    /// Never format.
    Never,
}

/// How [`Volume::mount_or_format`] got the volume mounted.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    /// The existing filesystem mounted.
    Mounted,
    /// The volume was formatted after the first mount failed with `cause`.
    Formatted {
        /// Why the first mount failed.
        cause: Error,
    },
}

impl MountOutcome {
    /// Whether the volume was wiped.
    pub fn formatted(&self) -> bool {
        matches!(self, Self::Formatted { .. })
    }
}

impl<D: BlockDevice, B: AsRef<[u8]> + AsMut<[u8]>> Volume<D, B> {
    /// Mount, formatting the volume if `policy` allows and the mount fails.
    ///
    /// Formats at most once: if the mount after formatting fails too, that
    /// error is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use norfs::{MountOutcome, RecoveryPolicy, Volume};
    /// use norfs_adapters::{BufferPool, NorFlashAdapter, VolumeConfig, W25qRamFlash};
    ///
    /// let config = VolumeConfig::w25q_reference();
    /// let device = NorFlashAdapter::new(W25qRamFlash::new(128), config)?;
    /// let mut volume = Volume::new(device, BufferPool::allocate(&config))?;
    ///
    /// // A blank chip has no filesystem yet
    /// let outcome = volume.mount_or_format(RecoveryPolicy::FormatOnFailure)?;
    /// assert!(outcome.formatted());
    ///
    /// volume.unmount()?;
    /// assert_eq!(volume.mount_or_format(RecoveryPolicy::Never)?, MountOutcome::Mounted);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn mount_or_format(&mut self, policy: RecoveryPolicy) -> Result<MountOutcome, Error> {
        let cause = match self.mount() {
            Ok(()) => return Ok(MountOutcome::Mounted),
            Err(cause) => cause,
        };

        let cause = match policy {
            RecoveryPolicy::Never => return Err(cause),
            RecoveryPolicy::FormatOnFailure => cause,
            RecoveryPolicy::Diagnose => {
                let cause = if cause.is_image_failure() {
                    cause
                } else {
                    debug!("mount failed ({}), retrying", cause);
                    match self.mount() {
                        Ok(()) => return Ok(MountOutcome::Mounted),
                        Err(cause) => cause,
                    }
                };
                if !cause.is_image_failure() {
                    error!("mount failed ({}), not formatting", cause);
                    return Err(cause);
                }
                cause
            }
        };

        warn!("mount failed ({}), formatting", cause);
        self.format()?;
        self.mount()?;
        Ok(MountOutcome::Formatted { cause })
    }
}

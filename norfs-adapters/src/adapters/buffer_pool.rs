//! Buffer pools for the filesystem's caches.
//!
//! A [`BufferPool`] bundles the four buffers a volume needs: read cache,
//! program cache, lookahead bitmap and file cache. Sizes are checked against
//! the [`VolumeConfig`] once, when the pool is built, so the I/O paths can
//! slice them without further checks.
//!
//! Two ways to get one:
//! - [`StaticBuffers`]: compile-time sized, 4-byte aligned arrays (no_std,
//!   no allocator)
//! - [`BufferPool::allocate`]: runtime sized from the config (requires `alloc`)

use aligned::{Aligned, A4};

use crate::domain::{BufferKind, ConfigError, VolumeConfig};

#[cfg(feature = "alloc")]
use alloc::{vec, vec::Vec};

/// The four buffers backing one volume.
///
/// `B` is any owned or borrowed byte buffer: `&mut [u8]` slices of a
/// [`StaticBuffers`], or `Vec<u8>` with the `alloc` feature.
pub struct BufferPool<B> {
    read: B,
    prog: B,
    lookahead: B,
    file: B,
}

/// Mutable views of all four buffers at once.
pub struct PoolSlices<'a> {
    /// Read cache, `cache_size` bytes.
    pub read: &'a mut [u8],
    /// Program cache, `cache_size` bytes.
    pub prog: &'a mut [u8],
    /// Lookahead bitmap, `lookahead_size` bytes.
    pub lookahead: &'a mut [u8],
    /// File cache, `cache_size` bytes.
    pub file: &'a mut [u8],
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> BufferPool<B> {
    /// Assemble a pool, checking every buffer against `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BufferTooSmall`] naming the first buffer that
    /// cannot hold what the configuration requires.
    ///
    /// # Examples
    ///
    /// ```
    /// use norfs_adapters::{BufferPool, ConfigError, VolumeConfig};
    ///
    /// let config = VolumeConfig::w25q_reference();
    /// let (mut r, mut p, mut l, mut f) = ([0u8; 16], [0u8; 16], [0u8; 16], [0u8; 8]);
    /// let pool = BufferPool::new(&config, &mut r[..], &mut p[..], &mut l[..], &mut f[..]);
    /// assert!(matches!(pool, Err(ConfigError::BufferTooSmall { .. })));
    /// ```
    pub fn new(
        config: &VolumeConfig,
        read: B,
        prog: B,
        lookahead: B,
        file: B,
    ) -> Result<Self, ConfigError> {
        let pool = Self {
            read,
            prog,
            lookahead,
            file,
        };
        pool.validate(config)?;
        Ok(pool)
    }

    /// Check every buffer against `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BufferTooSmall`] for the first undersized buffer.
    pub fn validate(&self, config: &VolumeConfig) -> Result<(), ConfigError> {
        let cache = config.cache_size() as usize;
        let checks = [
            (BufferKind::Read, self.read.as_ref().len(), cache),
            (BufferKind::Program, self.prog.as_ref().len(), cache),
            (BufferKind::Lookahead, self.lookahead.as_ref().len(), config.lookahead_size() as usize),
            (BufferKind::File, self.file.as_ref().len(), cache),
        ];
        for (buffer, actual, required) in checks {
            if actual < required {
                return Err(ConfigError::BufferTooSmall {
                    buffer,
                    required,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Borrow all four buffers mutably.
    pub fn slices(&mut self) -> PoolSlices<'_> {
        PoolSlices {
            read: self.read.as_mut(),
            prog: self.prog.as_mut(),
            lookahead: self.lookahead.as_mut(),
            file: self.file.as_mut(),
        }
    }

    /// Read cache.
    pub fn read_buffer(&mut self) -> &mut [u8] {
        self.read.as_mut()
    }

    /// Program cache.
    pub fn prog_buffer(&mut self) -> &mut [u8] {
        self.prog.as_mut()
    }

    /// Lookahead bitmap.
    pub fn lookahead_buffer(&mut self) -> &mut [u8] {
        self.lookahead.as_mut()
    }

    /// File cache.
    pub fn file_buffer(&mut self) -> &mut [u8] {
        self.file.as_mut()
    }

    /// Give the buffers back as `(read, prog, lookahead, file)`.
    pub fn into_inner(self) -> (B, B, B, B) {
        (self.read, self.prog, self.lookahead, self.file)
    }
}

#[cfg(feature = "alloc")]
impl BufferPool<Vec<u8>> {
    /// Allocate exactly-sized buffers for `config`.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let pool = BufferPool::allocate(&VolumeConfig::w25q_reference());
    /// ```
    pub fn allocate(config: &VolumeConfig) -> Self {
        let cache = config.cache_size() as usize;
        Self {
            read: vec![0; cache],
            prog: vec![0; cache],
            lookahead: vec![0; config.lookahead_size() as usize],
            file: vec![0; cache],
        }
    }
}

/// Compile-time sized buffers, 4-byte aligned for DMA-capable flash drivers.
///
/// # Type Parameters
///
/// - `CACHE`: bytes in each of the read, program and file caches
/// - `LOOKAHEAD`: bytes in the lookahead bitmap
///
/// # Examples
///
/// ```
/// use norfs_adapters::{ReferenceBuffers, VolumeConfig};
///
/// let mut buffers = ReferenceBuffers::new();
/// let pool = buffers.pool(&VolumeConfig::w25q_reference()).unwrap();
/// ```
pub struct StaticBuffers<const CACHE: usize, const LOOKAHEAD: usize> {
    read: Aligned<A4, [u8; CACHE]>,
    prog: Aligned<A4, [u8; CACHE]>,
    lookahead: Aligned<A4, [u8; LOOKAHEAD]>,
    file: Aligned<A4, [u8; CACHE]>,
}

impl<const CACHE: usize, const LOOKAHEAD: usize> StaticBuffers<CACHE, LOOKAHEAD> {
    /// Zeroed buffers; usable in a `static`.
    pub const fn new() -> Self {
        Self {
            read: Aligned([0; CACHE]),
            prog: Aligned([0; CACHE]),
            lookahead: Aligned([0; LOOKAHEAD]),
            file: Aligned([0; CACHE]),
        }
    }

    /// Lend the buffers to a pool checked against `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BufferTooSmall`] if `CACHE` or `LOOKAHEAD` is
    /// smaller than the configuration requires.
    pub fn pool(&mut self, config: &VolumeConfig) -> Result<BufferPool<&mut [u8]>, ConfigError> {
        BufferPool::new(
            config,
            self.read.as_mut_slice(),
            self.prog.as_mut_slice(),
            self.lookahead.as_mut_slice(),
            self.file.as_mut_slice(),
        )
    }
}

impl<const CACHE: usize, const LOOKAHEAD: usize> Default for StaticBuffers<CACHE, LOOKAHEAD> {
    fn default() -> Self {
        Self::new()
    }
}

/// Buffers for [`VolumeConfig::w25q_reference`].
pub type ReferenceBuffers = StaticBuffers<16, 16>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_buffers_fit_reference_config() {
        let mut buffers = ReferenceBuffers::new();
        let mut pool = buffers.pool(&VolumeConfig::w25q_reference()).unwrap();
        let slices = pool.slices();
        assert_eq!(slices.read.len(), 16);
        assert_eq!(slices.prog.len(), 16);
        assert_eq!(slices.lookahead.len(), 16);
        assert_eq!(slices.file.len(), 16);
    }

    #[test]
    fn test_static_buffers_are_aligned() {
        let mut buffers = StaticBuffers::<64, 8>::new();
        let mut pool = BufferPool::new(
            &VolumeConfig::builder().cache_size(64).lookahead_size(8).build().unwrap(),
            buffers.read.as_mut_slice(),
            buffers.prog.as_mut_slice(),
            buffers.lookahead.as_mut_slice(),
            buffers.file.as_mut_slice(),
        )
        .unwrap();
        assert_eq!(pool.read_buffer().as_ptr() as usize % 4, 0);
        assert_eq!(pool.prog_buffer().as_ptr() as usize % 4, 0);
        assert_eq!(pool.lookahead_buffer().as_ptr() as usize % 4, 0);
        assert_eq!(pool.file_buffer().as_ptr() as usize % 4, 0);
    }

    #[test]
    fn test_undersized_cache_rejected() {
        let config = VolumeConfig::builder().cache_size(64).build().unwrap();
        let mut buffers = StaticBuffers::<32, 16>::new();
        let result = buffers.pool(&config);
        assert!(matches!(
            result,
            Err(ConfigError::BufferTooSmall { buffer: BufferKind::Read, required: 64, actual: 32 })
        ));
    }

    #[test]
    fn test_undersized_lookahead_rejected() {
        let config = VolumeConfig::builder().lookahead_size(32).build().unwrap();
        let mut buffers = StaticBuffers::<16, 16>::new();
        assert!(matches!(
            buffers.pool(&config),
            Err(ConfigError::BufferTooSmall { buffer: BufferKind::Lookahead, .. })
        ));
    }

    #[test]
    fn test_file_buffer_checked_too() {
        let config = VolumeConfig::w25q_reference();
        let mut read = vec![0u8; 16];
        let mut prog = vec![0u8; 16];
        let mut lookahead = vec![0u8; 16];
        let mut file = vec![0u8; 15];
        let result = BufferPool::new(
            &config,
            &mut read[..],
            &mut prog[..],
            &mut lookahead[..],
            &mut file[..],
        );
        assert!(matches!(
            result,
            Err(ConfigError::BufferTooSmall { buffer: BufferKind::File, required: 16, actual: 15 })
        ));
    }

    #[test]
    fn test_oversized_buffers_accepted() {
        let mut buffers = StaticBuffers::<256, 64>::new();
        assert!(buffers.pool(&VolumeConfig::w25q_reference()).is_ok());
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn test_allocate_matches_config() {
        let config = VolumeConfig::builder().cache_size(128).lookahead_size(32).build().unwrap();
        let pool = BufferPool::allocate(&config);
        assert!(pool.validate(&config).is_ok());
        let (read, prog, lookahead, file) = pool.into_inner();
        assert_eq!((read.len(), prog.len(), lookahead.len(), file.len()), (128, 128, 32, 128));
    }
}

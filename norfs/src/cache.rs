//! Read and program caches in front of the block device.
//!
//! The read cache holds one `cache_size` window of one block, aligned to
//! `cache_size` (and so to `read_size`). The program cache collects
//! sequential programs and writes them out in `prog_size` multiples, padding
//! the final chunk with `0xFF`. Reads see bytes still sitting in the program
//! cache, and any program or erase of a block invalidates the read cache for
//! that block.

use crc::Digest;
use norfs_adapters::{BlockDevice, VolumeConfig};

use crate::error::Error;
use crate::record::BLOCK_NONE;

/// Erased NOR flash byte.
pub(crate) const ERASED: u8 = 0xFF;

/// Which region of which block a cache buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CacheMeta {
    block: u32,
    off: u32,
    size: u32,
}

impl CacheMeta {
    pub const INVALID: Self = Self {
        block: BLOCK_NONE,
        off: 0,
        size: 0,
    };

    fn is_for(&self, block: u32) -> bool {
        self.block != BLOCK_NONE && self.block == block
    }

    fn invalidate(&mut self) {
        *self = Self::INVALID;
    }
}

/// Cached access to a block device.
///
/// Borrows the device, config and both cache buffers out of a volume for
/// the span of one operation.
pub(crate) struct Io<'a, D> {
    pub device: &'a mut D,
    pub config: &'a VolumeConfig,
    pub rcache: &'a mut CacheMeta,
    pub rbuf: &'a mut [u8],
    pub pcache: &'a mut CacheMeta,
    pub pbuf: &'a mut [u8],
}

impl<D: BlockDevice> Io<'_, D> {
    pub fn block_size(&self) -> u32 {
        self.config.block_size()
    }

    pub fn block_count(&self) -> u32 {
        self.config.block_count()
    }

    fn cache_size(&self) -> u32 {
        self.config.cache_size()
    }

    /// Read `dst.len()` bytes at `off` within `block`.
    pub fn read(&mut self, block: u32, mut off: u32, mut dst: &mut [u8]) -> Result<(), Error> {
        if block >= self.block_count() || off as usize + dst.len() > self.block_size() as usize {
            return Err(Error::Corrupt);
        }
        while !dst.is_empty() {
            let mut span = dst.len() as u32;

            if self.pcache.is_for(block) {
                let (start, size) = (self.pcache.off, self.pcache.size);
                if off >= start && off < start + size {
                    let at = (off - start) as usize;
                    let n = span.min(start + size - off) as usize;
                    dst[..n].copy_from_slice(&self.pbuf[at..at + n]);
                    off += n as u32;
                    dst = &mut dst[n..];
                    continue;
                }
                if start > off {
                    span = span.min(start - off);
                }
            }

            if !self.rcache.is_for(block) || off < self.rcache.off || off >= self.rcache.off + self.rcache.size {
                let cache = self.cache_size();
                let start = off - off % cache;
                *self.rcache = CacheMeta {
                    block,
                    off: start,
                    size: cache,
                };
                if let Err(e) = self.device.read(block, start, &mut self.rbuf[..cache as usize]) {
                    self.rcache.invalidate();
                    return Err(e.into());
                }
            }

            let at = (off - self.rcache.off) as usize;
            let n = span.min(self.rcache.off + self.rcache.size - off) as usize;
            dst[..n].copy_from_slice(&self.rbuf[at..at + n]);
            off += n as u32;
            dst = &mut dst[n..];
        }
        Ok(())
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self, block: u32, off: u32) -> Result<u32, Error> {
        let mut word = [0u8; 4];
        self.read(block, off, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    /// Feed `len` bytes at `off` within `block` into `digest`.
    pub fn digest(
        &mut self,
        block: u32,
        mut off: u32,
        len: u32,
        digest: &mut Digest<'static, u32>,
    ) -> Result<(), Error> {
        let mut chunk = [0u8; 32];
        let end = off + len;
        while off < end {
            let n = (end - off).min(chunk.len() as u32) as usize;
            self.read(block, off, &mut chunk[..n])?;
            digest.update(&chunk[..n]);
            off += n as u32;
        }
        Ok(())
    }

    /// Program `data` at `off` within `block`.
    ///
    /// Consecutive calls must continue where the previous one ended, or
    /// start at a `prog_size` boundary; the target region must be erased.
    pub fn prog(&mut self, block: u32, mut off: u32, mut data: &[u8]) -> Result<(), Error> {
        if block >= self.block_count() || off as usize + data.len() > self.block_size() as usize {
            return Err(Error::Corrupt);
        }
        let cache = self.cache_size();
        while !data.is_empty() {
            let appending = self.pcache.is_for(block)
                && off == self.pcache.off + self.pcache.size
                && self.pcache.size < cache;
            if appending {
                let at = self.pcache.size as usize;
                let n = data.len().min((cache - self.pcache.size) as usize);
                self.pbuf[at..at + n].copy_from_slice(&data[..n]);
                self.pcache.size += n as u32;
                off += n as u32;
                data = &data[n..];
                if self.pcache.size == cache {
                    self.flush()?;
                }
                continue;
            }

            self.flush()?;
            debug_assert!(off % self.config.prog_size() == 0, "unaligned program start");
            *self.pcache = CacheMeta {
                block,
                off,
                size: 0,
            };
        }
        Ok(())
    }

    /// Write out the program cache, padded to `prog_size`.
    pub fn flush(&mut self) -> Result<(), Error> {
        if self.pcache.block == BLOCK_NONE || self.pcache.size == 0 {
            return Ok(());
        }
        let CacheMeta { block, off, size } = *self.pcache;
        let prog = self.config.prog_size();
        let padded = size.div_ceil(prog) * prog;
        self.pbuf[size as usize..padded as usize].fill(ERASED);

        if self.rcache.is_for(block) {
            self.rcache.invalidate();
        }
        trace!("program block {} at {} ({} bytes)", block, off, padded);
        if let Err(e) = self.device.program(block, off, &self.pbuf[..padded as usize]) {
            self.pcache.invalidate();
            return Err(e.into());
        }
        *self.pcache = CacheMeta {
            block,
            off: off + padded,
            size: 0,
        };
        Ok(())
    }

    /// Erase `block`, dropping anything cached for it.
    pub fn erase(&mut self, block: u32) -> Result<(), Error> {
        if block >= self.block_count() {
            return Err(Error::Corrupt);
        }
        if self.pcache.is_for(block) {
            self.pcache.invalidate();
        }
        if self.rcache.is_for(block) {
            self.rcache.invalidate();
        }
        trace!("erase block {}", block);
        self.device.erase(block)?;
        Ok(())
    }

    /// Flush the program cache and the device.
    pub fn sync(&mut self) -> Result<(), Error> {
        self.flush()?;
        self.device.sync()?;
        Ok(())
    }

    /// Forget both caches without writing anything.
    pub fn discard(&mut self) {
        self.rcache.invalidate();
        self.pcache.invalidate();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use norfs_adapters::{NorFlashAdapter, W25qRamFlash};

    /// Owns everything an [`Io`] borrows, over a RAM flash.
    pub(crate) struct Harness {
        pub device: NorFlashAdapter<W25qRamFlash>,
        pub config: VolumeConfig,
        pub rcache: CacheMeta,
        pub pcache: CacheMeta,
        rbuf: [u8; 16],
        pbuf: [u8; 16],
    }

    impl Harness {
        pub fn new() -> Self {
            Self::with_blocks(128)
        }

        pub fn with_blocks(blocks: u32) -> Self {
            let config = VolumeConfig::builder().block_count(blocks).build().unwrap();
            Self {
                device: NorFlashAdapter::new(W25qRamFlash::new(blocks as usize), config).unwrap(),
                config,
                rcache: CacheMeta::INVALID,
                pcache: CacheMeta::INVALID,
                rbuf: [0; 16],
                pbuf: [0; 16],
            }
        }

        pub fn io(&mut self) -> Io<'_, NorFlashAdapter<W25qRamFlash>> {
            Io {
                device: &mut self.device,
                config: &self.config,
                rcache: &mut self.rcache,
                rbuf: &mut self.rbuf,
                pcache: &mut self.pcache,
                pbuf: &mut self.pbuf,
            }
        }
    }

    #[test]
    fn test_reads_see_pending_program() {
        let mut harness = Harness::new();
        let mut io = harness.io();
        io.prog(4, 0, b"hello").unwrap();

        let mut buf = [0u8; 8];
        io.read(4, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello\xFF\xFF\xFF");
        assert_eq!(harness.device.flash().stats().writes, 0);
    }

    #[test]
    fn test_flush_pads_to_prog_size() {
        let mut harness = Harness::new();
        let mut io = harness.io();
        io.prog(2, 0, &[0x11; 5]).unwrap();
        io.flush().unwrap();

        let image = harness.device.flash().image();
        assert_eq!(&image[2 * 4096..2 * 4096 + 5], &[0x11; 5]);
        assert!(image[2 * 4096 + 5..2 * 4096 + 16].iter().all(|&b| b == ERASED));
        assert_eq!(harness.pcache.off, 16);
    }

    #[test]
    fn test_long_program_spans_cache_windows() {
        let mut harness = Harness::new();
        let data: Vec<u8> = (0..100u8).collect();
        let mut io = harness.io();
        io.prog(7, 32, &data).unwrap();
        io.sync().unwrap();

        let mut back = vec![0u8; 100];
        io.read(7, 32, &mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_program_invalidates_read_cache() {
        let mut harness = Harness::new();
        let mut io = harness.io();
        let mut buf = [0u8; 4];
        io.read(3, 0, &mut buf).unwrap();
        assert_eq!(buf, [ERASED; 4]);

        io.prog(3, 0, &[1, 2, 3, 4]).unwrap();
        io.flush().unwrap();
        io.read(3, 0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_erase_drops_pending_program() {
        let mut harness = Harness::new();
        let mut io = harness.io();
        io.prog(5, 0, &[0; 4]).unwrap();
        io.erase(5).unwrap();
        io.flush().unwrap();
        assert_eq!(harness.device.flash().stats().writes, 0);
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let mut harness = Harness::new();
        let mut io = harness.io();
        let mut buf = [0u8; 8];
        assert_eq!(io.read(128, 0, &mut buf), Err(Error::Corrupt));
        assert_eq!(io.read(0, 4092, &mut buf), Err(Error::Corrupt));
    }
}

//! File data chains.
//!
//! A file's data lives in a backwards-linked list of blocks. Each block
//! begins with the little-endian number of the block before it (`BLOCK_NONE`
//! for the first); the file record points at the last one. Blocks are only
//! ever written once after an erase, so an update builds a new chain and the
//! old one stays intact until the record pointing at the new chain is
//! committed.

use norfs_adapters::BlockDevice;

use crate::cache::Io;
use crate::error::Error;
use crate::record::BLOCK_NONE;

/// Size of the back pointer at the start of every data block.
pub(crate) const POINTER_SIZE: u32 = 4;

/// Data bytes one block carries.
pub(crate) const fn data_per_block(block_size: u32) -> u32 {
    block_size - POINTER_SIZE
}

/// Number of blocks holding `size` bytes.
pub(crate) const fn blocks_for(size: u32, block_size: u32) -> u32 {
    size.div_ceil(data_per_block(block_size))
}

/// Read the back pointer of `block`.
fn prev<D: BlockDevice>(io: &mut Io<'_, D>, block: u32) -> Result<u32, Error> {
    let prev = io.read_u32(block, 0)?;
    if prev != BLOCK_NONE && prev >= io.block_count() {
        return Err(Error::Corrupt);
    }
    Ok(prev)
}

/// Find the block holding chain index `index` of a `blocks`-long chain
/// ending at `head`.
pub(crate) fn locate<D: BlockDevice>(
    io: &mut Io<'_, D>,
    head: u32,
    blocks: u32,
    index: u32,
) -> Result<u32, Error> {
    debug_assert!(index < blocks);
    let mut block = head;
    for _ in index + 1..blocks {
        block = prev(io, block)?;
        if block == BLOCK_NONE {
            return Err(Error::Corrupt);
        }
    }
    Ok(block)
}

/// Read `dst.len()` bytes at byte `pos` of a `size`-byte file stored in the
/// chain ending at `head`. The range must lie within the file.
pub(crate) fn read<D: BlockDevice>(
    io: &mut Io<'_, D>,
    head: u32,
    size: u32,
    mut pos: u32,
    mut dst: &mut [u8],
) -> Result<(), Error> {
    let per_block = data_per_block(io.block_size());
    let blocks = blocks_for(size, io.block_size());
    while !dst.is_empty() {
        let index = pos / per_block;
        let at = pos % per_block;
        let block = locate(io, head, blocks, index)?;
        let n = dst.len().min((per_block - at) as usize);
        io.read(block, POINTER_SIZE + at, &mut dst[..n])?;
        pos += n as u32;
        dst = &mut dst[n..];
    }
    Ok(())
}

/// Visit every block of a `blocks`-long chain, head first.
pub(crate) fn for_each_block<D, F>(
    io: &mut Io<'_, D>,
    head: u32,
    blocks: u32,
    mut f: F,
) -> Result<(), Error>
where
    D: BlockDevice,
    F: FnMut(u32),
{
    let mut block = head;
    for i in 0..blocks {
        if block == BLOCK_NONE {
            return Err(Error::Corrupt);
        }
        f(block);
        if i + 1 < blocks {
            block = prev(io, block)?;
        }
    }
    Ok(())
}

/// A chain being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChainWriter {
    /// Last block, `BLOCK_NONE` before the first byte.
    pub head: u32,
    pub blocks: u32,
    /// Data bytes written so far.
    pub len: u32,
}

impl ChainWriter {
    pub const fn new() -> Self {
        Self {
            head: BLOCK_NONE,
            blocks: 0,
            len: 0,
        }
    }

    /// Whether the next byte needs a fresh block.
    pub fn needs_block(&self, block_size: u32) -> bool {
        self.len == self.blocks * data_per_block(block_size)
    }

    /// Start a freshly allocated `block`: erase it and link it to the
    /// current head.
    pub fn link<D: BlockDevice>(&mut self, io: &mut Io<'_, D>, block: u32) -> Result<(), Error> {
        io.erase(block)?;
        io.prog(block, 0, &self.head.to_le_bytes())?;
        self.head = block;
        self.blocks += 1;
        Ok(())
    }

    /// Program as much of `data` as fits in the head block. Returns the
    /// number of bytes taken.
    pub fn fill<D: BlockDevice>(&mut self, io: &mut Io<'_, D>, data: &[u8]) -> Result<usize, Error> {
        let per_block = data_per_block(io.block_size());
        let at = self.len - (self.blocks - 1) * per_block;
        let n = data.len().min((per_block - at) as usize);
        io.prog(self.head, POINTER_SIZE + at, &data[..n])?;
        self.len += n as u32;
        Ok(n)
    }
}

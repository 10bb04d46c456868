use core::fmt;

use norfs_adapters::{BlockDevice, BufferPool, PoolSlices, VolumeConfig};

use crate::cache::{CacheMeta, Io};
use crate::chain;
use crate::error::Error;
use crate::file::{File, OpenFile, OpenFlags};
use crate::lookahead::LookaheadState;
use crate::metadata::{self, commit_size, CommitWriter, PairState};
use crate::record::{FileName, Record, Superblock, NAME_MAX, REVISION_SIZE, VERSION};

/// Blocks of the anchor pair. The anchor never moves.
pub(crate) const ANCHOR: [u32; 2] = [0, 1];
/// Where `format` puts the directory pair.
const FORMAT_DIR: [u32; 2] = [2, 3];
/// littlefs superblock magic, after the revision count and the name tag.
const LITTLEFS_MAGIC: &[u8; 8] = b"littlefs";
const LITTLEFS_MAGIC_OFFSET: u32 = 8;

/// What the volume knows once mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MountState {
    pub anchor: PairState,
    pub dir: PairState,
    pub next_id: u16,
}

/// Size and name of a file.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    name: FileName,
    len: u32,
}

impl Metadata {
    /// File name.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// File size in bytes.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether the file holds no data.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A filesystem on a block device.
///
/// Owns the device, its geometry and the cache buffers. Every operation
/// takes `&mut self`, and an open [`File`] borrows the volume mutably, so
/// at most one operation is in flight and at most one file is open.
///
/// # Examples
///
/// ```
/// use norfs::{OpenFlags, RecoveryPolicy, Volume};
/// use norfs_adapters::{BufferPool, NorFlashAdapter, VolumeConfig, W25qRamFlash};
///
/// let config = VolumeConfig::w25q_reference();
/// let device = NorFlashAdapter::new(W25qRamFlash::new(128), config)?;
/// let mut volume = Volume::new(device, BufferPool::allocate(&config))?;
/// volume.mount_or_format(RecoveryPolicy::default())?;
///
/// let mut file = volume.open("hello", OpenFlags::WRITE | OpenFlags::CREATE)?;
/// file.write(b"hello world")?;
/// file.close()?;
/// assert_eq!(volume.metadata("hello")?.len(), 11);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Volume<D, B> {
    device: D,
    config: VolumeConfig,
    buffers: BufferPool<B>,
    rcache: CacheMeta,
    pcache: CacheMeta,
    lookahead: LookaheadState,
    mount: Option<MountState>,
    file: Option<OpenFile>,
}

impl<D: BlockDevice, B: AsRef<[u8]> + AsMut<[u8]>> Volume<D, B> {
    /// Assemble a volume. Nothing is read from the device until
    /// [`mount`](Self::mount) or [`format`](Self::format).
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if a buffer is too small for the device's geometry.
    pub fn new(device: D, buffers: BufferPool<B>) -> Result<Self, Error> {
        let config = *device.config();
        buffers.validate(&config)?;
        Ok(Self {
            device,
            config,
            buffers,
            rcache: CacheMeta::INVALID,
            pcache: CacheMeta::INVALID,
            lookahead: LookaheadState::new(),
            mount: None,
            file: None,
        })
    }

    /// Geometry of the volume.
    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    /// Whether a filesystem is mounted.
    pub fn is_mounted(&self) -> bool {
        self.mount.is_some()
    }

    /// The block device.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The block device, mutably.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Mount the filesystem found on the device.
    ///
    /// # Errors
    ///
    /// [`Error::NoFilesystem`] for a blank device, [`Error::Corrupt`] when no
    /// valid metadata is found, [`Error::Incompatible`] for another version
    /// or geometry, [`Error::Io`] when the device fails.
    pub fn mount(&mut self) -> Result<(), Error> {
        self.fs().mount()
    }

    /// Write an empty filesystem, discarding everything on the volume.
    ///
    /// Leaves the volume unmounted.
    pub fn format(&mut self) -> Result<(), Error> {
        self.fs().format()
    }

    /// Flush everything and forget the mounted state.
    pub fn unmount(&mut self) -> Result<(), Error> {
        self.fs().unmount()
    }

    /// Open `name`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] without [`OpenFlags::CREATE`], [`Error::Exists`]
    /// with [`OpenFlags::EXCL`], [`Error::Invalid`] for flags without
    /// `READ` or `WRITE`, plus any error of the commit creating the file.
    pub fn open(&mut self, name: &str, flags: OpenFlags) -> Result<File<'_, D, B>, Error> {
        self.fs().open(name, flags)?;
        Ok(File::new(self))
    }

    /// Delete `name`. Its blocks are reused by later allocations.
    pub fn remove(&mut self, name: &str) -> Result<(), Error> {
        self.fs().remove(name)
    }

    /// Size and name of `name`.
    pub fn metadata(&mut self, name: &str) -> Result<Metadata, Error> {
        let entry = self.fs().lookup(name)?.ok_or(Error::NotFound)?;
        Ok(Metadata {
            name: entry.name,
            len: entry.size,
        })
    }

    /// Whether `name` exists.
    pub fn exists(&mut self, name: &str) -> Result<bool, Error> {
        Ok(self.fs().lookup(name)?.is_some())
    }

    /// Call `f` for every file, in commit order.
    pub fn list<F: FnMut(&Metadata)>(&mut self, mut f: F) -> Result<(), Error> {
        let mut fs = self.fs();
        let mount = fs.mounted()?;
        metadata::for_each_live(&mut fs.io, &mount.dir, |_, entry| {
            f(&Metadata {
                name: entry.name,
                len: entry.size,
            });
            Ok(())
        })
    }

    /// Number of blocks reachable from the metadata, metadata pairs included.
    pub fn used_blocks(&mut self) -> Result<u32, Error> {
        let mut fs = self.fs();
        let mount = fs.mounted()?;
        let mut used = 0;
        traverse(&mut fs.io, &mount, fs.file.as_ref(), &[], &mut |_| used += 1)?;
        Ok(used)
    }

    /// Take the volume apart, returning the device and buffers.
    pub fn into_parts(self) -> (D, BufferPool<B>) {
        (self.device, self.buffers)
    }

    pub(crate) fn fs(&mut self) -> Fs<'_, D> {
        let PoolSlices {
            read,
            prog,
            lookahead,
            file,
        } = self.buffers.slices();
        let lookahead_size = self.config.lookahead_size() as usize;
        Fs {
            io: Io {
                device: &mut self.device,
                config: &self.config,
                rcache: &mut self.rcache,
                rbuf: read,
                pcache: &mut self.pcache,
                pbuf: prog,
            },
            lookahead: &mut self.lookahead,
            bits: &mut lookahead[..lookahead_size],
            staging: file,
            mount: &mut self.mount,
            file: &mut self.file,
        }
    }
}

impl<D, B> fmt::Debug for Volume<D, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Volume")
            .field("config", &self.config)
            .field("mount", &self.mount)
            .field("file", &self.file.as_ref().map(|file| file.name))
            .finish_non_exhaustive()
    }
}

/// Everything a volume operation touches, borrowed field by field.
pub(crate) struct Fs<'a, D> {
    pub io: Io<'a, D>,
    pub lookahead: &'a mut LookaheadState,
    pub bits: &'a mut [u8],
    pub staging: &'a mut [u8],
    pub mount: &'a mut Option<MountState>,
    pub file: &'a mut Option<OpenFile>,
}

/// Visit every block reachable from `mount`, plus the blocks an open file
/// holds but has not committed yet, plus `extra`.
fn traverse<D: BlockDevice>(
    io: &mut Io<'_, D>,
    mount: &MountState,
    file: Option<&OpenFile>,
    extra: &[u32],
    mark: &mut dyn FnMut(u32),
) -> Result<(), Error> {
    let block_size = io.block_size();
    for block in mount.anchor.blocks.iter().chain(&mount.dir.blocks).chain(extra) {
        mark(*block);
    }
    metadata::for_each_live(io, &mount.dir, |io, entry| {
        chain::for_each_block(io, entry.head, chain::blocks_for(entry.size, block_size), &mut *mark)
    })?;
    if let Some(file) = file {
        // Committed chains were visited above; these are the ones in flight
        chain::for_each_block(io, file.head, chain::blocks_for(file.size, block_size), &mut *mark)?;
        if let Some(writer) = file.writer {
            chain::for_each_block(io, writer.head, writer.blocks, &mut *mark)?;
        }
    }
    Ok(())
}

impl<D: BlockDevice> Fs<'_, D> {
    pub fn mounted(&self) -> Result<MountState, Error> {
        self.mount.ok_or(Error::NotMounted)
    }

    fn superblock(&self) -> Superblock {
        Superblock {
            version: VERSION,
            block_size: self.io.config.block_size(),
            block_count: self.io.config.block_count(),
            name_max: NAME_MAX as u32,
        }
    }

    fn forget(&mut self) {
        *self.file = None;
        *self.mount = None;
        self.io.discard();
    }

    pub fn format(&mut self) -> Result<(), Error> {
        self.forget();
        info!(
            "formatting {} blocks of {} bytes",
            self.io.block_count(),
            self.io.block_size()
        );
        for block in ANCHOR.iter().chain(&FORMAT_DIR) {
            self.io.erase(*block)?;
        }

        let dir = CommitWriter::begin(&mut self.io, FORMAT_DIR[0], 1)?;
        dir.finish(&mut self.io)?;

        let superblock = self.superblock();
        let mut anchor = CommitWriter::begin(&mut self.io, ANCHOR[0], 1)?;
        anchor.record(&mut self.io, &Record::Superblock(superblock))?;
        anchor.record(&mut self.io, &Record::DirPair(FORMAT_DIR))?;
        anchor.finish(&mut self.io)?;

        self.io.sync()
    }

    pub fn mount(&mut self) -> Result<(), Error> {
        self.forget();
        let anchor = match metadata::fetch(&mut self.io, ANCHOR) {
            Err(e @ (Error::Corrupt | Error::NoFilesystem)) => {
                if self.foreign_image()? {
                    warn!("the anchor blocks hold a littlefs superblock");
                    return Err(Error::ForeignFilesystem);
                }
                return Err(e);
            }
            other => other?,
        };

        let mut superblock = None;
        let mut dir_blocks = None;
        metadata::for_each_record(&mut self.io, &anchor, REVISION_SIZE, |_, _, record| {
            match record {
                Record::Superblock(sb) => superblock = Some(sb),
                Record::DirPair(pair) => dir_blocks = Some(pair),
                _ => return Err(Error::Corrupt),
            }
            Ok(true)
        })?;

        let found = superblock.ok_or(Error::Corrupt)?;
        let expected = self.superblock();
        if found.version >> 16 != expected.version >> 16 {
            warn!("filesystem version {:#x}, expected {:#x}", found.version, expected.version);
            return Err(Error::Incompatible);
        }
        let geometry = Superblock {
            version: found.version,
            ..expected
        };
        if found != geometry {
            warn!(
                "filesystem geometry {}x{} does not match the device",
                found.block_count,
                found.block_size
            );
            return Err(Error::Incompatible);
        }

        let dir_blocks = dir_blocks.ok_or(Error::Corrupt)?;
        if dir_blocks.iter().any(|block| ANCHOR.contains(block)) {
            return Err(Error::Corrupt);
        }
        let dir = match metadata::fetch(&mut self.io, dir_blocks) {
            Err(Error::NoFilesystem) => return Err(Error::Corrupt),
            other => other?,
        };
        let next_id = metadata::max_id(&mut self.io, &dir)?.map_or(0, |id| id.saturating_add(1));

        let seed = anchor.rev ^ dir.rev.rotate_left(16) ^ dir.off;
        self.lookahead.seed(seed, self.io.block_count());
        *self.mount = Some(MountState {
            anchor,
            dir,
            next_id,
        });
        debug!(
            "mounted: directory in blocks {} and {} at rev {}",
            dir.blocks[0],
            dir.blocks[1],
            dir.rev
        );
        Ok(())
    }

    /// Whether an anchor block carries a littlefs superblock.
    fn foreign_image(&mut self) -> Result<bool, Error> {
        for block in ANCHOR {
            let mut magic = [0u8; LITTLEFS_MAGIC.len()];
            self.io.read(block, LITTLEFS_MAGIC_OFFSET, &mut magic)?;
            if magic == *LITTLEFS_MAGIC {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn unmount(&mut self) -> Result<(), Error> {
        self.mounted()?;
        let result = self.io.sync();
        self.forget();
        result
    }

    pub fn lookup(&mut self, name: &str) -> Result<Option<crate::record::Entry>, Error> {
        let name = FileName::new(name)?;
        let mount = self.mounted()?;
        metadata::find(&mut self.io, &mount.dir, &name)
    }

    pub fn remove(&mut self, name: &str) -> Result<(), Error> {
        let entry = self.lookup(name)?.ok_or(Error::NotFound)?;
        self.commit(&[Record::Delete(entry.id)])?;
        debug!("removed {}", name);
        Ok(())
    }

    /// Allocate a free block. `extra` lists blocks already taken by the
    /// caller that nothing references yet.
    pub fn alloc(&mut self, extra: &[u32]) -> Result<u32, Error> {
        let block_count = self.io.block_count();
        let window = self.io.config.lookahead_blocks();
        loop {
            if let Some(block) = self.lookahead.take(self.bits, block_count) {
                trace!("allocated block {}", block);
                return Ok(block);
            }
            if self.lookahead.exhausted() {
                warn!("no free blocks");
                return Err(Error::NoSpace);
            }
            self.lookahead.advance(window, block_count);
            self.rebuild_lookahead(extra)?;
        }
    }

    fn rebuild_lookahead(&mut self, extra: &[u32]) -> Result<(), Error> {
        let mount = self.mounted()?;
        let block_count = self.io.block_count();
        let state = *self.lookahead;
        let bits = &mut *self.bits;
        bits.fill(0);
        trace!("rebuilding lookahead from block {}", state.start());
        traverse(
            &mut self.io,
            &mount,
            self.file.as_ref(),
            extra,
            &mut |block| state.mark(bits, block, block_count),
        )
    }

    /// Append one commit to the directory, compacting or relocating it
    /// first when the active block has no room.
    pub fn commit(&mut self, records: &[Record]) -> Result<(), Error> {
        let mut mount = self.mounted()?;
        let block_size = self.io.block_size();
        let prog = self.io.config.prog_size();
        let footprint: u32 = records.iter().map(Record::footprint).sum();
        let fits = |dir: &PairState| dir.off + commit_size(dir.off, footprint, prog) <= block_size;

        if mount.dir.needs_compact || !fits(&mount.dir) {
            self.compact(&mut mount)?;
            if !fits(&mount.dir) {
                return Err(Error::NoSpace);
            }
        }
        if let Err(e) = metadata::append(&mut self.io, &mut mount.dir, records) {
            // Part of the commit may be on flash already; the block takes no
            // more appends.
            warn!("directory commit failed, block {} needs compaction", mount.dir.active());
            mount.dir.needs_compact = true;
            *self.mount = Some(mount);
            return Err(e);
        }
        *self.mount = Some(mount);
        self.lookahead.checkpoint(self.io.block_count());
        Ok(())
    }

    /// Rewrite the live directory into a freshly erased block.
    fn compact(&mut self, mount: &mut MountState) -> Result<(), Error> {
        let rev = mount.dir.rev.wrapping_add(1);
        if let Some(cycles) = self.io.config.block_cycles().get() {
            if rev % cycles == 0 {
                match self.relocate(mount, rev) {
                    Err(Error::NoSpace) => debug!("no blocks to relocate into, compacting in place"),
                    other => return other,
                }
            }
        }

        let dst = mount.dir.sibling();
        self.io.erase(dst)?;
        let off = metadata::write_snapshot(&mut self.io, &mount.dir, dst, rev)?;
        mount.dir = PairState {
            blocks: [dst, mount.dir.active()],
            rev,
            off,
            needs_compact: false,
        };
        *self.mount = Some(*mount);
        debug!("compacted directory into block {} (rev {})", dst, rev);
        Ok(())
    }

    /// Move the directory to two newly allocated blocks and point the anchor
    /// at them. The old pair stays valid until the anchor commit lands.
    fn relocate(&mut self, mount: &mut MountState, rev: u32) -> Result<(), Error> {
        let first = self.alloc(&[])?;
        let second = self.alloc(&[first])?;
        self.io.erase(first)?;
        self.io.erase(second)?;
        let off = metadata::write_snapshot(&mut self.io, &mount.dir, first, rev)?;

        let blocks = [first, second];
        let mut anchor = mount.anchor;
        let result = self.commit_anchor(&mut anchor, &[Record::DirPair(blocks)]);
        mount.anchor = anchor;
        if let Err(e) = result {
            *self.mount = Some(*mount);
            return Err(e);
        }
        mount.dir = PairState {
            blocks,
            rev,
            off,
            needs_compact: false,
        };
        *self.mount = Some(*mount);
        info!("relocated directory to blocks {} and {}", first, second);
        Ok(())
    }

    /// Append to the anchor. `records` must restate the directory pair:
    /// a full anchor is compacted to the superblock plus `records`.
    fn commit_anchor(&mut self, anchor: &mut PairState, records: &[Record]) -> Result<(), Error> {
        let block_size = self.io.block_size();
        let prog = self.io.config.prog_size();
        let footprint: u32 = records.iter().map(Record::footprint).sum();
        if !anchor.needs_compact && anchor.off + commit_size(anchor.off, footprint, prog) <= block_size {
            let result = metadata::append(&mut self.io, anchor, records);
            if result.is_err() {
                anchor.needs_compact = true;
            }
            return result;
        }

        let rev = anchor.rev.wrapping_add(1);
        let dst = anchor.sibling();
        self.io.erase(dst)?;
        let superblock = self.superblock();
        let mut writer = CommitWriter::begin(&mut self.io, dst, rev)?;
        writer.record(&mut self.io, &Record::Superblock(superblock))?;
        for record in records {
            writer.record(&mut self.io, record)?;
        }
        let off = writer.finish(&mut self.io)?;
        *anchor = PairState {
            blocks: [dst, anchor.active()],
            rev,
            off,
            needs_compact: false,
        };
        debug!("compacted anchor into block {} (rev {})", dst, rev);
        Ok(())
    }
}

use core::fmt;

use bitflags::bitflags;
use embedded_io::SeekFrom;
use norfs_adapters::BlockDevice;

use crate::chain::{self, ChainWriter};
use crate::error::Error;
use crate::record::{Entry, FileName, Record, BLOCK_NONE};
use crate::volume::{Fs, Volume};

bitflags! {
    /// How a file is opened.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u8 {
        /// Allow reads.
        const READ = 1 << 0;
        /// Allow writes.
        const WRITE = 1 << 1;
        /// Allow both.
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        /// Create the file if it does not exist. Needs `WRITE`.
        const CREATE = 1 << 2;
        /// With `CREATE`, fail if the file exists.
        const EXCL = 1 << 3;
        /// Drop the contents on open. Needs `WRITE`.
        const TRUNC = 1 << 4;
        /// Every write goes to the end of the file.
        const APPEND = 1 << 5;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for OpenFlags {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "OpenFlags({=u8:#x})", self.bits())
    }
}

impl OpenFlags {
    fn validate(self) -> Result<(), Error> {
        if !self.intersects(Self::READ_WRITE) {
            return Err(Error::Invalid);
        }
        if self.intersects(Self::CREATE | Self::TRUNC | Self::APPEND) && !self.contains(Self::WRITE) {
            return Err(Error::Invalid);
        }
        Ok(())
    }
}

/// State of the open file.
///
/// `head`/`size` describe the current contents, which may be newer than the
/// committed record. While a write is in progress the new contents are
/// being built in `writer`: bytes `0..writer.len` are final and the rest is
/// still taken from `head`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OpenFile {
    pub id: u16,
    pub name: FileName,
    pub flags: OpenFlags,
    pub head: u32,
    pub size: u32,
    pub pos: u32,
    pub writer: Option<ChainWriter>,
    /// `head`/`size` differ from the committed record.
    pub dirty: bool,
}

impl OpenFile {
    fn len(&self) -> u32 {
        self.writer.map_or(self.size, |w| self.size.max(w.len))
    }
}

const ZEROS: [u8; 32] = [0; 32];

impl<D: BlockDevice> Fs<'_, D> {
    fn open_file(&self) -> Result<OpenFile, Error> {
        self.file.ok_or(Error::Invalid)
    }

    fn store(&mut self, file: OpenFile) {
        *self.file = Some(file);
    }

    fn set_writer(&mut self, writer: ChainWriter) -> Result<(), Error> {
        let file = self.file.as_mut().ok_or(Error::Invalid)?;
        file.writer = Some(writer);
        Ok(())
    }

    pub fn open(&mut self, name: &str, flags: OpenFlags) -> Result<(), Error> {
        flags.validate()?;
        let name = FileName::new(name)?;
        let mount = self.mounted()?;
        *self.file = None;

        let entry = match crate::metadata::find(&mut self.io, &mount.dir, &name)? {
            Some(_) if flags.contains(OpenFlags::CREATE | OpenFlags::EXCL) => return Err(Error::Exists),
            Some(entry) => entry,
            None if !flags.contains(OpenFlags::CREATE) => return Err(Error::NotFound),
            None => {
                let id = mount.next_id;
                let next_id = id.checked_add(1).ok_or(Error::NoSpace)?;
                let entry = Entry {
                    id,
                    name,
                    size: 0,
                    head: BLOCK_NONE,
                };
                self.commit(&[Record::File(entry)])?;
                if let Some(mount) = self.mount.as_mut() {
                    mount.next_id = next_id;
                }
                debug!("created {} (id {})", name, id);
                entry
            }
        };

        let mut file = OpenFile {
            id: entry.id,
            name,
            flags,
            head: entry.head,
            size: entry.size,
            pos: 0,
            writer: None,
            dirty: false,
        };
        if flags.contains(OpenFlags::TRUNC) && file.size > 0 {
            file.head = BLOCK_NONE;
            file.size = 0;
            file.dirty = true;
        }
        self.store(file);
        Ok(())
    }

    pub fn file_len(&self) -> Result<u32, Error> {
        Ok(self.open_file()?.len())
    }

    pub fn file_tell(&self) -> Result<u32, Error> {
        Ok(self.open_file()?.pos)
    }

    pub fn file_read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if !self.open_file()?.flags.contains(OpenFlags::READ) {
            return Err(Error::NotOpenForRead);
        }
        self.finish_write()?;
        let mut file = self.open_file()?;
        if file.pos >= file.size {
            return Ok(0);
        }
        let n = buf.len().min((file.size - file.pos) as usize);
        chain::read(&mut self.io, file.head, file.size, file.pos, &mut buf[..n])?;
        file.pos += n as u32;
        self.store(file);
        Ok(n)
    }

    pub fn file_write(&mut self, data: &[u8]) -> Result<usize, Error> {
        let mut file = self.open_file()?;
        if !file.flags.contains(OpenFlags::WRITE) {
            return Err(Error::NotOpenForWrite);
        }
        if data.is_empty() {
            return Ok(0);
        }
        if file.flags.contains(OpenFlags::APPEND) && file.pos != file.len() {
            self.finish_write()?;
            file = self.open_file()?;
            file.pos = file.size;
            self.store(file);
        }
        let end = u32::try_from(data.len())
            .ok()
            .and_then(|len| file.pos.checked_add(len))
            .ok_or(Error::FileTooLarge)?;

        if file.writer.is_none() {
            self.begin_write()?;
        }
        self.append(data)?;
        let mut file = self.open_file()?;
        file.pos = end;
        self.store(file);
        Ok(data.len())
    }

    /// Start a new chain holding the contents before `pos`, zero-filled past
    /// the old end.
    fn begin_write(&mut self) -> Result<(), Error> {
        let file = self.open_file()?;
        self.set_writer(ChainWriter::new())?;
        self.copy_from(file.head, file.size, 0, file.pos.min(file.size))?;
        let mut gap = file.pos.saturating_sub(file.size);
        while gap > 0 {
            let n = gap.min(ZEROS.len() as u32);
            self.append(&ZEROS[..n as usize])?;
            gap -= n;
        }
        Ok(())
    }

    /// Add `data` to the end of the chain being written.
    fn append(&mut self, mut data: &[u8]) -> Result<(), Error> {
        let block_size = self.io.block_size();
        while !data.is_empty() {
            let mut writer = self.open_file()?.writer.ok_or(Error::Invalid)?;
            if writer.needs_block(block_size) {
                let block = self.alloc(&[])?;
                writer.link(&mut self.io, block)?;
                self.set_writer(writer)?;
            }
            let n = writer.fill(&mut self.io, data)?;
            self.set_writer(writer)?;
            data = &data[n..];
        }
        Ok(())
    }

    /// Append bytes `start..end` of the chain ending at `head`.
    fn copy_from(&mut self, head: u32, size: u32, start: u32, end: u32) -> Result<(), Error> {
        let staging = core::mem::take(&mut self.staging);
        let result = self.copy_through(&mut *staging, head, size, start, end);
        self.staging = staging;
        result
    }

    fn copy_through(
        &mut self,
        buf: &mut [u8],
        head: u32,
        size: u32,
        mut start: u32,
        end: u32,
    ) -> Result<(), Error> {
        while start < end {
            let n = buf.len().min((end - start) as usize);
            chain::read(&mut self.io, head, size, start, &mut buf[..n])?;
            self.append(&buf[..n])?;
            start += n as u32;
        }
        Ok(())
    }

    /// Close the chain being written: copy the old tail over and make it
    /// the current contents.
    fn finish_write(&mut self) -> Result<(), Error> {
        let file = self.open_file()?;
        let Some(writer) = file.writer else {
            return Ok(());
        };
        if writer.len < file.size {
            self.copy_from(file.head, file.size, writer.len, file.size)?;
        }
        let mut file = self.open_file()?;
        let writer = file.writer.take().ok_or(Error::Invalid)?;
        file.head = writer.head;
        file.size = writer.len;
        file.dirty = true;
        self.store(file);
        Ok(())
    }

    pub fn file_seek(&mut self, from: SeekFrom) -> Result<u32, Error> {
        let file = self.open_file()?;
        let target = match from {
            SeekFrom::Start(n) => i128::from(n),
            SeekFrom::End(n) => i128::from(file.len()) + i128::from(n),
            SeekFrom::Current(n) => i128::from(file.pos) + i128::from(n),
        };
        if target < 0 {
            return Err(Error::Invalid);
        }
        let target = u32::try_from(target).map_err(|_| Error::FileTooLarge)?;
        if target != file.pos && file.writer.is_some() {
            self.finish_write()?;
        }
        let mut file = self.open_file()?;
        file.pos = target;
        self.store(file);
        Ok(target)
    }

    pub fn file_truncate(&mut self, len: u32) -> Result<(), Error> {
        if !self.open_file()?.flags.contains(OpenFlags::WRITE) {
            return Err(Error::NotOpenForWrite);
        }
        self.finish_write()?;
        let mut file = self.open_file()?;
        if len < file.size {
            file.head = if len == 0 {
                BLOCK_NONE
            } else {
                let block_size = self.io.block_size();
                let index = (len - 1) / chain::data_per_block(block_size);
                chain::locate(&mut self.io, file.head, chain::blocks_for(file.size, block_size), index)?
            };
            file.size = len;
            file.dirty = true;
            self.store(file);
        } else if len > file.size {
            // Writing nothing at `len` zero-fills up to it
            let pos = file.pos;
            file.pos = len;
            self.store(file);
            self.begin_write()?;
            self.finish_write()?;
            let mut file = self.open_file()?;
            file.pos = pos;
            self.store(file);
        }
        Ok(())
    }

    /// Commit the file's current contents.
    pub fn file_sync(&mut self) -> Result<(), Error> {
        self.finish_write()?;
        let mut file = self.open_file()?;
        if file.dirty {
            self.commit(&[Record::File(Entry {
                id: file.id,
                name: file.name,
                size: file.size,
                head: file.head,
            })])?;
            file.dirty = false;
            self.store(file);
            trace!("committed {} ({} bytes)", file.name, file.size);
        }
        self.io.sync()
    }

    pub fn file_close(&mut self) -> Result<(), Error> {
        let result = self.file_sync();
        *self.file = None;
        if result.is_err() {
            // Blocks of the uncommitted chain are free again
            self.lookahead.checkpoint(self.io.block_count());
        }
        result
    }

    /// Forget the open file and anything it has not committed.
    pub fn file_discard(&mut self) {
        if let Some(file) = self.file.take() {
            if file.dirty || file.writer.is_some() {
                warn!("{} dropped without close, discarding changes", file.name);
                self.io.discard();
                // The abandoned chain is free again
                self.lookahead.checkpoint(self.io.block_count());
            }
        }
    }
}

/// An open file.
///
/// Borrows its [`Volume`] mutably until [`close`](File::close) or drop.
/// Changes become durable on [`sync`](File::sync) or `close`; dropping a
/// file without closing it discards everything not yet synced.
pub struct File<'a, D: BlockDevice, B: AsRef<[u8]> + AsMut<[u8]>> {
    volume: &'a mut Volume<D, B>,
}

impl<'a, D: BlockDevice, B: AsRef<[u8]> + AsMut<[u8]>> File<'a, D, B> {
    pub(crate) fn new(volume: &'a mut Volume<D, B>) -> Self {
        Self { volume }
    }

    /// Read from the current position. Returns 0 at the end of the file.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.volume.fs().file_read(buf)
    }

    /// Read until `buf` is full or the file ends.
    pub fn read_to_fill(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }

    /// Write all of `data` at the current position, extending the file as
    /// needed. Writing past the end fills the gap with zeros.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.volume.fs().file_write(data)
    }

    /// Move the position. Seeking past the end is allowed.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u32, Error> {
        self.volume.fs().file_seek(pos)
    }

    /// Seek to the start.
    pub fn rewind(&mut self) -> Result<(), Error> {
        self.seek(SeekFrom::Start(0)).map(drop)
    }

    /// Current position.
    pub fn tell(&mut self) -> Result<u32, Error> {
        self.volume.fs().file_tell()
    }

    /// Current length, including unsynced writes.
    pub fn len(&mut self) -> Result<u32, Error> {
        self.volume.fs().file_len()
    }

    /// Whether the file is empty.
    pub fn is_empty(&mut self) -> Result<bool, Error> {
        Ok(self.len()? == 0)
    }

    /// Cut the file to `len` bytes, or zero-extend it.
    pub fn truncate(&mut self, len: u32) -> Result<(), Error> {
        self.volume.fs().file_truncate(len)
    }

    /// Commit everything written so far.
    pub fn sync(&mut self) -> Result<(), Error> {
        self.volume.fs().file_sync()
    }

    /// Sync and close.
    pub fn close(self) -> Result<(), Error> {
        self.volume.fs().file_close()
    }
}

impl<D: BlockDevice, B: AsRef<[u8]> + AsMut<[u8]>> Drop for File<'_, D, B> {
    fn drop(&mut self) {
        self.volume.fs().file_discard();
    }
}

impl<D: BlockDevice, B: AsRef<[u8]> + AsMut<[u8]>> fmt::Debug for File<'_, D, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File").field("volume", &self.volume).finish()
    }
}

impl<D: BlockDevice, B: AsRef<[u8]> + AsMut<[u8]>> embedded_io::ErrorType for File<'_, D, B> {
    type Error = Error;
}

impl<D: BlockDevice, B: AsRef<[u8]> + AsMut<[u8]>> embedded_io::Read for File<'_, D, B> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        File::read(self, buf)
    }
}

impl<D: BlockDevice, B: AsRef<[u8]> + AsMut<[u8]>> embedded_io::Write for File<'_, D, B> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        File::write(self, buf)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.sync()
    }
}

impl<D: BlockDevice, B: AsRef<[u8]> + AsMut<[u8]>> embedded_io::Seek for File<'_, D, B> {
    fn seek(&mut self, pos: SeekFrom) -> Result<u64, Self::Error> {
        File::seek(self, pos).map(u64::from)
    }
}

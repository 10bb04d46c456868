//! Metadata pairs.
//!
//! A pair is two blocks holding the same log; the one with the newer
//! revision is active. Commits are appended to the active block. When it
//! fills up, the live state is rewritten into the sibling with the revision
//! bumped, so a power cut at any point leaves at least one valid block.

use crc::{Crc, Digest, CRC_32_ISO_HDLC};
use norfs_adapters::BlockDevice;

use crate::cache::Io;
use crate::error::Error;
use crate::record::{
    decode_tag, encode_tag, Entry, FileName, Record, RecordType, CRC_RECORD_MIN, PAYLOAD_MAX,
    REVISION_SIZE, TAG_ERASED, TAG_SIZE,
};

pub(crate) static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// In-memory view of a metadata pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PairState {
    /// `blocks[0]` is the active block.
    pub blocks: [u32; 2],
    pub rev: u32,
    /// End of the last valid commit in the active block.
    pub off: u32,
    /// The active block has a torn commit after `off` and cannot be
    /// appended to.
    pub needs_compact: bool,
}

impl PairState {
    pub fn active(&self) -> u32 {
        self.blocks[0]
    }

    pub fn sibling(&self) -> u32 {
        self.blocks[1]
    }
}

/// Result of scanning one block of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockScan {
    /// Never written since the last erase.
    Erased,
    /// No valid commit.
    Invalid,
    Valid { rev: u32, end: u32, torn: bool },
}

/// Revisions wrap; `a` is newer when it is ahead by less than half the range.
fn rev_newer(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// Find the last valid commit of `block` by checking every commit's CRC.
fn scan_block<D: BlockDevice>(io: &mut Io<'_, D>, block: u32) -> Result<BlockScan, Error> {
    let block_size = io.block_size();
    let rev = io.read_u32(block, 0)?;

    let mut digest = CRC32.digest();
    digest.update(&rev.to_le_bytes());
    let mut pos = REVISION_SIZE;
    let mut end = 0;
    let mut clean_tail = false;

    while pos + TAG_SIZE <= block_size {
        let raw = io.read_u32(block, pos)?;
        if raw == TAG_ERASED {
            clean_tail = true;
            break;
        }
        let Some((kind, len)) = decode_tag(raw) else {
            break;
        };
        let next = pos + TAG_SIZE + len;
        if next > block_size {
            break;
        }
        digest.update(&raw.to_le_bytes());

        if kind == RecordType::Crc {
            if len < CRC_RECORD_MIN - TAG_SIZE {
                break;
            }
            let stored = io.read_u32(block, pos + TAG_SIZE)?;
            let computed = core::mem::replace(&mut digest, CRC32.digest()).finalize();
            if stored != computed {
                break;
            }
            end = next;
        } else {
            if len as usize > PAYLOAD_MAX {
                break;
            }
            io.digest(block, pos + TAG_SIZE, len, &mut digest)?;
        }
        pos = next;
    }

    if end == 0 {
        if rev == TAG_ERASED && clean_tail && pos == REVISION_SIZE {
            return Ok(BlockScan::Erased);
        }
        return Ok(BlockScan::Invalid);
    }

    // Anything but erased flash after the last good commit is a torn write
    let torn = end + TAG_SIZE <= block_size && io.read_u32(block, end)? != TAG_ERASED;
    Ok(BlockScan::Valid { rev, end, torn })
}

/// Load a pair, picking its newest valid block.
///
/// Fails with [`Error::NoFilesystem`] when both blocks are erased and
/// [`Error::Corrupt`] when neither holds a valid commit.
pub(crate) fn fetch<D: BlockDevice>(io: &mut Io<'_, D>, blocks: [u32; 2]) -> Result<PairState, Error> {
    let block_count = io.block_count();
    if blocks[0] >= block_count || blocks[1] >= block_count || blocks[0] == blocks[1] {
        return Err(Error::Corrupt);
    }

    let mut best: Option<PairState> = None;
    let mut erased = 0;
    for i in 0..2 {
        match scan_block(io, blocks[i])? {
            BlockScan::Erased => erased += 1,
            BlockScan::Invalid => debug!("block {} holds no valid commit", blocks[i]),
            BlockScan::Valid { rev, end, torn } => {
                if best.is_none_or(|b| rev_newer(rev, b.rev)) {
                    best = Some(PairState {
                        blocks: [blocks[i], blocks[1 - i]],
                        rev,
                        off: end,
                        needs_compact: torn,
                    });
                }
            }
        }
    }

    match best {
        Some(pair) => {
            if pair.needs_compact {
                warn!("torn commit in block {}, compacting on next write", pair.active());
            }
            Ok(pair)
        }
        None if erased == 2 => Err(Error::NoFilesystem),
        None => Err(Error::Corrupt),
    }
}

/// Visit every record of the active block in `from..pair.off`, skipping CRC
/// records. The callback gets the record's end offset and returns `false` to
/// stop early.
pub(crate) fn for_each_record<'a, D, F>(
    io: &mut Io<'a, D>,
    pair: &PairState,
    from: u32,
    mut f: F,
) -> Result<(), Error>
where
    D: BlockDevice,
    F: FnMut(&mut Io<'a, D>, u32, Record) -> Result<bool, Error>,
{
    let block = pair.active();
    let mut pos = from;
    let mut payload = [0u8; PAYLOAD_MAX];
    while pos < pair.off {
        let raw = io.read_u32(block, pos)?;
        let (kind, len) = decode_tag(raw).ok_or(Error::Corrupt)?;
        let next = pos + TAG_SIZE + len;
        if kind != RecordType::Crc {
            let len = len as usize;
            if len > PAYLOAD_MAX {
                return Err(Error::Corrupt);
            }
            io.read(block, pos + TAG_SIZE, &mut payload[..len])?;
            let record = Record::decode(kind, &payload[..len])?;
            if !f(io, next, record)? {
                return Ok(());
            }
        }
        pos = next;
    }
    Ok(())
}

/// Look a file up by name.
pub(crate) fn find<D: BlockDevice>(
    io: &mut Io<'_, D>,
    pair: &PairState,
    name: &FileName,
) -> Result<Option<Entry>, Error> {
    let mut found: Option<Entry> = None;
    for_each_record(io, pair, REVISION_SIZE, |_, _, record| {
        match record {
            Record::File(entry) if entry.name == *name => found = Some(entry),
            Record::Delete(id) if found.is_some_and(|e| e.id == id) => found = None,
            _ => {}
        }
        Ok(true)
    })?;
    Ok(found)
}

/// Whether any record after `from` mentions file `id`.
fn superseded<D: BlockDevice>(
    io: &mut Io<'_, D>,
    pair: &PairState,
    from: u32,
    id: u16,
) -> Result<bool, Error> {
    let mut hit = false;
    for_each_record(io, pair, from, |_, _, record| {
        hit = matches!(record, Record::File(e) if e.id == id) || record == Record::Delete(id);
        Ok(!hit)
    })?;
    Ok(hit)
}

/// Visit the final state of every file that has not been deleted.
pub(crate) fn for_each_live<'a, D, F>(io: &mut Io<'a, D>, pair: &PairState, mut f: F) -> Result<(), Error>
where
    D: BlockDevice,
    F: FnMut(&mut Io<'a, D>, &Entry) -> Result<(), Error>,
{
    for_each_record(io, pair, REVISION_SIZE, |io, end, record| {
        if let Record::File(entry) = record {
            if !superseded(io, pair, end, entry.id)? {
                f(io, &entry)?;
            }
        }
        Ok(true)
    })
}

/// Highest file id in use, if any.
pub(crate) fn max_id<D: BlockDevice>(io: &mut Io<'_, D>, pair: &PairState) -> Result<Option<u16>, Error> {
    let mut max: Option<u16> = None;
    for_each_record(io, pair, REVISION_SIZE, |_, _, record| {
        if let Record::File(entry) = record {
            max = Some(max.map_or(entry.id, |m| m.max(entry.id)));
        }
        Ok(true)
    })?;
    Ok(max)
}

/// Bytes a commit of records with `footprint` total bytes occupies once
/// closed and padded.
pub(crate) fn commit_size(start: u32, footprint: u32, prog_size: u32) -> u32 {
    (start + footprint + CRC_RECORD_MIN).div_ceil(prog_size) * prog_size - start
}

/// Streams one commit into a block.
pub(crate) struct CommitWriter {
    block: u32,
    pos: u32,
    digest: Digest<'static, u32>,
}

impl CommitWriter {
    /// Continue the log of `block` at `start`.
    pub fn append(block: u32, start: u32) -> Self {
        Self {
            block,
            pos: start,
            digest: CRC32.digest(),
        }
    }

    /// Begin a freshly erased block with revision `rev`.
    pub fn begin<D: BlockDevice>(io: &mut Io<'_, D>, block: u32, rev: u32) -> Result<Self, Error> {
        let mut writer = Self::append(block, 0);
        writer.write(io, &rev.to_le_bytes())?;
        Ok(writer)
    }

    fn write<D: BlockDevice>(&mut self, io: &mut Io<'_, D>, bytes: &[u8]) -> Result<(), Error> {
        io.prog(self.block, self.pos, bytes)?;
        self.digest.update(bytes);
        self.pos += bytes.len() as u32;
        Ok(())
    }

    pub fn record<D: BlockDevice>(&mut self, io: &mut Io<'_, D>, record: &Record) -> Result<(), Error> {
        let mut payload = [0u8; PAYLOAD_MAX];
        let (kind, len) = record.encode(&mut payload);
        if self.pos + TAG_SIZE + len as u32 + CRC_RECORD_MIN > io.block_size() {
            return Err(Error::NoSpace);
        }
        self.write(io, &encode_tag(kind, len as u32))?;
        self.write(io, &payload[..len])
    }

    /// Close the commit with its CRC and push it to flash. Returns the
    /// offset where the next commit starts.
    pub fn finish<D: BlockDevice>(mut self, io: &mut Io<'_, D>) -> Result<u32, Error> {
        let prog = io.config.prog_size();
        let end = (self.pos + CRC_RECORD_MIN).div_ceil(prog) * prog;
        if end > io.block_size() {
            return Err(Error::NoSpace);
        }
        let len = end - self.pos - TAG_SIZE;
        self.write(io, &encode_tag(RecordType::Crc, len))?;
        let crc = self.digest.finalize();
        io.prog(self.block, self.pos, &crc.to_le_bytes())?;
        // The program cache pads the rest of the record with 0xFF
        io.flush()?;
        Ok(end)
    }
}

/// Append one commit to the active block. The caller has checked that it
/// fits.
pub(crate) fn append<D: BlockDevice>(
    io: &mut Io<'_, D>,
    pair: &mut PairState,
    records: &[Record],
) -> Result<(), Error> {
    let mut writer = CommitWriter::append(pair.active(), pair.off);
    for record in records {
        writer.record(io, record)?;
    }
    pair.off = writer.finish(io)?;
    Ok(())
}

/// Rewrite the live directory entries of `src` into the erased `dst` as a
/// single commit with revision `rev`. Returns the end of that commit.
pub(crate) fn write_snapshot<D: BlockDevice>(
    io: &mut Io<'_, D>,
    src: &PairState,
    dst: u32,
    rev: u32,
) -> Result<u32, Error> {
    let mut writer = CommitWriter::begin(io, dst, rev)?;
    for_each_live(io, src, |io, entry| writer.record(io, &Record::File(*entry)))?;
    writer.finish(io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::Harness;
    use norfs_adapters::{NorFlashAdapter, W25qRamFlash};

    fn entry(id: u16, name: &str, size: u32) -> Entry {
        Entry {
            id,
            name: FileName::new(name).unwrap(),
            size,
            head: 6,
        }
    }

    fn fresh_pair(io: &mut Io<'_, NorFlashAdapter<W25qRamFlash>>, rev: u32) -> PairState {
        io.erase(2).unwrap();
        io.erase(3).unwrap();
        let end = CommitWriter::begin(io, 2, rev).unwrap().finish(io).unwrap();
        PairState {
            blocks: [2, 3],
            rev,
            off: end,
            needs_compact: false,
        }
    }

    #[test]
    fn test_erased_pair_is_no_filesystem() {
        let mut harness = Harness::with_blocks(8);
        let mut io = harness.io();
        assert_eq!(fetch(&mut io, [0, 1]), Err(Error::NoFilesystem));
    }

    #[test]
    fn test_commits_survive_refetch() {
        let mut harness = Harness::with_blocks(8);
        let mut io = harness.io();
        let mut pair = fresh_pair(&mut io, 1);
        assert_eq!(pair.off, 16);

        append(&mut io, &mut pair, &[Record::File(entry(0, "a", 1))]).unwrap();
        append(&mut io, &mut pair, &[Record::File(entry(1, "b", 2)), Record::Delete(0)]).unwrap();

        io.discard();
        let fetched = fetch(&mut io, [2, 3]).unwrap();
        assert_eq!(fetched, pair);
        assert_eq!(find(&mut io, &fetched, &FileName::new("a").unwrap()).unwrap(), None);
        assert_eq!(
            find(&mut io, &fetched, &FileName::new("b").unwrap()).unwrap(),
            Some(entry(1, "b", 2))
        );
        assert_eq!(max_id(&mut io, &fetched).unwrap(), Some(1));
    }

    #[test]
    fn test_newer_revision_wins() {
        let mut harness = Harness::with_blocks(8);
        let mut io = harness.io();
        let pair = fresh_pair(&mut io, 7);
        let end = write_snapshot(&mut io, &pair, 3, 8).unwrap();

        let fetched = fetch(&mut io, [2, 3]).unwrap();
        assert_eq!(fetched.blocks, [3, 2]);
        assert_eq!(fetched.rev, 8);
        assert_eq!(fetched.off, end);
    }

    #[test]
    fn test_torn_commit_is_ignored() {
        let mut harness = Harness::with_blocks(8);
        let mut pair = {
            let mut io = harness.io();
            let mut pair = fresh_pair(&mut io, 1);
            append(&mut io, &mut pair, &[Record::File(entry(0, "keep", 4))]).unwrap();
            append(&mut io, &mut pair, &[Record::File(entry(1, "lost", 4))]).unwrap();
            pair
        };
        // Flip a bit inside the last commit
        let at = 2 * 4096 + pair.off as usize - 6;
        harness.device.flash_mut().image_mut()[at] ^= 0x01;

        let mut io = harness.io();
        io.discard();
        let fetched = fetch(&mut io, [2, 3]).unwrap();
        assert!(fetched.needs_compact);
        assert!(fetched.off < pair.off);
        pair = fetched;
        assert!(find(&mut io, &pair, &FileName::new("lost").unwrap()).unwrap().is_none());
        assert!(find(&mut io, &pair, &FileName::new("keep").unwrap()).unwrap().is_some());
    }

    #[test]
    fn test_snapshot_keeps_only_live_entries() {
        let mut harness = Harness::with_blocks(8);
        let mut io = harness.io();
        let mut pair = fresh_pair(&mut io, 1);
        append(&mut io, &mut pair, &[Record::File(entry(0, "a", 1))]).unwrap();
        append(&mut io, &mut pair, &[Record::File(entry(0, "a", 9))]).unwrap();
        append(&mut io, &mut pair, &[Record::File(entry(1, "b", 2))]).unwrap();
        append(&mut io, &mut pair, &[Record::Delete(1)]).unwrap();

        let end = write_snapshot(&mut io, &pair, 3, 2).unwrap();
        let compacted = fetch(&mut io, [2, 3]).unwrap();
        assert_eq!(compacted.off, end);
        assert!(end < pair.off);

        let mut live = Vec::new();
        for_each_live(&mut io, &compacted, |_, e| {
            live.push(*e);
            Ok(())
        })
        .unwrap();
        assert_eq!(live, vec![entry(0, "a", 9)]);
    }

    #[test]
    fn test_commit_size_is_prog_aligned() {
        assert_eq!(commit_size(16, 20, 16), 32);
        assert_eq!(commit_size(16, 8, 16), 16);
        assert_eq!(commit_size(0, 36, 16), 48);
    }

    #[test]
    fn test_revision_wraps() {
        assert!(rev_newer(1, 0));
        assert!(rev_newer(0, u32::MAX));
        assert!(!rev_newer(5, 5));
    }
}

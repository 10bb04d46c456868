//! On-flash record encoding.
//!
//! Every metadata block starts with a little-endian `u32` revision followed
//! by commits. A commit is a run of records closed by a CRC record:
//!
//! ```text
//! ┌──────────┬──────────────┬─────┬──────────┬─────────┬───────┬─────────┐
//! │ revision │ tag │ payload│ ... │ CRC tag  │ crc32   │ 0xFF  │ next... │
//! │  (u32)   │             │     │          │ (u32)   │ pad   │         │
//! └──────────┴──────────────┴─────┴──────────┴─────────┴───────┴─────────┘
//! ```
//!
//! A tag is `(type << 24) | payload_len`. The CRC covers everything from the
//! start of the commit (the revision, for a block's first commit) through
//! the CRC tag. The CRC record's length includes the padding that aligns
//! the next commit to the program size. An all-ones tag marks erased flash.

use crate::error::Error;

/// Longest file name, in bytes.
pub const NAME_MAX: usize = 32;

pub(crate) const MAGIC: [u8; 8] = *b"norfs-sb";
pub(crate) const VERSION: u32 = 0x0001_0000;

/// Null block pointer: end of a chain, or an empty file.
pub(crate) const BLOCK_NONE: u32 = u32::MAX;
pub(crate) const TAG_ERASED: u32 = u32::MAX;

pub(crate) const TAG_SIZE: u32 = 4;
pub(crate) const REVISION_SIZE: u32 = 4;
/// CRC tag plus the checksum itself.
pub(crate) const CRC_RECORD_MIN: u32 = 8;

const SUPERBLOCK_LEN: usize = 24;
const DIRPAIR_LEN: usize = 8;
const FILE_HEADER_LEN: usize = 12;
const DELETE_LEN: usize = 4;

/// Largest payload any record carries.
pub(crate) const PAYLOAD_MAX: usize = FILE_HEADER_LEN + NAME_MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum RecordType {
    Superblock = 0x01,
    File = 0x02,
    Delete = 0x03,
    DirPair = 0x04,
    Crc = 0x0F,
}

impl RecordType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Superblock),
            0x02 => Some(Self::File),
            0x03 => Some(Self::Delete),
            0x04 => Some(Self::DirPair),
            0x0F => Some(Self::Crc),
            _ => None,
        }
    }
}

pub(crate) const fn encode_tag(kind: RecordType, len: u32) -> [u8; 4] {
    (((kind as u32) << 24) | (len & 0x00FF_FFFF)).to_le_bytes()
}

/// Split a raw tag. `None` for types this version does not know.
pub(crate) fn decode_tag(raw: u32) -> Option<(RecordType, u32)> {
    RecordType::from_u8((raw >> 24) as u8).map(|kind| (kind, raw & 0x00FF_FFFF))
}

/// A validated file name.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FileName {
    bytes: [u8; NAME_MAX],
    len: u8,
}

impl FileName {
    /// Validate `name`: non-empty, at most [`NAME_MAX`] bytes, no `/` or NUL.
    ///
    /// # Errors
    ///
    /// [`Error::NameTooLong`] or [`Error::Invalid`].
    pub fn new(name: &str) -> Result<Self, Error> {
        Self::from_bytes(name.as_bytes())
    }

    fn from_bytes(name: &[u8]) -> Result<Self, Error> {
        if name.len() > NAME_MAX {
            return Err(Error::NameTooLong);
        }
        if name.is_empty() || name.iter().any(|&b| b == b'/' || b == 0) {
            return Err(Error::Invalid);
        }
        let mut bytes = [0; NAME_MAX];
        bytes[..name.len()].copy_from_slice(name);
        Ok(Self {
            bytes,
            len: name.len() as u8,
        })
    }

    /// The name as raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        // Names come from `&str` or are UTF-8 checked on decode
        core::str::from_utf8(self.as_bytes()).unwrap_or("")
    }
}

impl core::fmt::Debug for FileName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(self.as_str(), f)
    }
}

impl core::fmt::Display for FileName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for FileName {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=str}", self.as_str())
    }
}

impl PartialEq<str> for FileName {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Superblock {
    pub version: u32,
    pub block_size: u32,
    pub block_count: u32,
    pub name_max: u32,
}

/// Committed state of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Entry {
    pub id: u16,
    pub name: FileName,
    pub size: u32,
    pub head: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Record {
    Superblock(Superblock),
    File(Entry),
    Delete(u16),
    DirPair([u32; 2]),
}

impl Record {
    /// Serialize the payload into `buf`, returning the type and length.
    pub fn encode(&self, buf: &mut [u8; PAYLOAD_MAX]) -> (RecordType, usize) {
        match self {
            Record::Superblock(sb) => {
                buf[0..8].copy_from_slice(&MAGIC);
                buf[8..12].copy_from_slice(&sb.version.to_le_bytes());
                buf[12..16].copy_from_slice(&sb.block_size.to_le_bytes());
                buf[16..20].copy_from_slice(&sb.block_count.to_le_bytes());
                buf[20..24].copy_from_slice(&sb.name_max.to_le_bytes());
                (RecordType::Superblock, SUPERBLOCK_LEN)
            }
            Record::File(entry) => {
                let name = entry.name.as_bytes();
                buf[0..2].copy_from_slice(&entry.id.to_le_bytes());
                buf[2] = name.len() as u8;
                buf[3] = 0;
                buf[4..8].copy_from_slice(&entry.size.to_le_bytes());
                buf[8..12].copy_from_slice(&entry.head.to_le_bytes());
                buf[FILE_HEADER_LEN..FILE_HEADER_LEN + name.len()].copy_from_slice(name);
                (RecordType::File, FILE_HEADER_LEN + name.len())
            }
            Record::Delete(id) => {
                buf[0..2].copy_from_slice(&id.to_le_bytes());
                buf[2..4].fill(0);
                (RecordType::Delete, DELETE_LEN)
            }
            Record::DirPair(pair) => {
                buf[0..4].copy_from_slice(&pair[0].to_le_bytes());
                buf[4..8].copy_from_slice(&pair[1].to_le_bytes());
                (RecordType::DirPair, DIRPAIR_LEN)
            }
        }
    }

    /// Bytes this record occupies on flash, tag included.
    pub fn footprint(&self) -> u32 {
        let len = match self {
            Record::Superblock(_) => SUPERBLOCK_LEN,
            Record::File(entry) => FILE_HEADER_LEN + entry.name.as_bytes().len(),
            Record::Delete(_) => DELETE_LEN,
            Record::DirPair(_) => DIRPAIR_LEN,
        };
        TAG_SIZE + len as u32
    }

    /// Parse a payload whose CRC has already been verified.
    ///
    /// A superblock whose magic does not match is reported as
    /// [`Error::Incompatible`]; a malformed payload as [`Error::Corrupt`].
    pub fn decode(kind: RecordType, payload: &[u8]) -> Result<Self, Error> {
        let word = |at: usize| -> u32 {
            u32::from_le_bytes([payload[at], payload[at + 1], payload[at + 2], payload[at + 3]])
        };
        match kind {
            RecordType::Superblock => {
                if payload.len() != SUPERBLOCK_LEN {
                    return Err(Error::Corrupt);
                }
                if payload[0..8] != MAGIC {
                    return Err(Error::Incompatible);
                }
                Ok(Record::Superblock(Superblock {
                    version: word(8),
                    block_size: word(12),
                    block_count: word(16),
                    name_max: word(20),
                }))
            }
            RecordType::File => {
                if payload.len() < FILE_HEADER_LEN {
                    return Err(Error::Corrupt);
                }
                let name_len = payload[2] as usize;
                if payload.len() != FILE_HEADER_LEN + name_len {
                    return Err(Error::Corrupt);
                }
                let name = &payload[FILE_HEADER_LEN..];
                if core::str::from_utf8(name).is_err() {
                    return Err(Error::Corrupt);
                }
                Ok(Record::File(Entry {
                    id: u16::from_le_bytes([payload[0], payload[1]]),
                    name: FileName::from_bytes(name).map_err(|_| Error::Corrupt)?,
                    size: word(4),
                    head: word(8),
                }))
            }
            RecordType::Delete => {
                if payload.len() != DELETE_LEN {
                    return Err(Error::Corrupt);
                }
                Ok(Record::Delete(u16::from_le_bytes([payload[0], payload[1]])))
            }
            RecordType::DirPair => {
                if payload.len() != DIRPAIR_LEN {
                    return Err(Error::Corrupt);
                }
                Ok(Record::DirPair([word(0), word(4)]))
            }
            RecordType::Crc => Err(Error::Corrupt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reencode(record: Record) -> Record {
        let mut buf = [0u8; PAYLOAD_MAX];
        let (kind, len) = record.encode(&mut buf);
        assert_eq!(TAG_SIZE + len as u32, record.footprint());
        Record::decode(kind, &buf[..len]).unwrap()
    }

    #[test]
    fn test_tag_layout() {
        let tag = u32::from_le_bytes(encode_tag(RecordType::File, 20));
        assert_eq!(tag, 0x0200_0014);
        assert_eq!(decode_tag(tag), Some((RecordType::File, 20)));
        assert_eq!(decode_tag(TAG_ERASED), None);
    }

    #[test]
    fn test_file_record() {
        let entry = Entry {
            id: 3,
            name: FileName::new("boot_count").unwrap(),
            size: 4,
            head: 17,
        };
        assert_eq!(reencode(Record::File(entry)), Record::File(entry));
    }

    #[test]
    fn test_superblock_magic_checked() {
        let mut buf = [0u8; PAYLOAD_MAX];
        let sb = Superblock {
            version: VERSION,
            block_size: 4096,
            block_count: 128,
            name_max: NAME_MAX as u32,
        };
        let (kind, len) = Record::Superblock(sb).encode(&mut buf);
        buf[0] ^= 0x20;
        assert_eq!(Record::decode(kind, &buf[..len]), Err(Error::Incompatible));
    }

    #[test]
    fn test_truncated_payload_is_corrupt() {
        assert_eq!(Record::decode(RecordType::DirPair, &[0; 4]), Err(Error::Corrupt));
        assert_eq!(Record::decode(RecordType::File, &[1, 0, 9, 0]), Err(Error::Corrupt));
    }

    #[test]
    fn test_name_rules() {
        assert!(FileName::new("a").is_ok());
        assert_eq!(FileName::new(""), Err(Error::Invalid));
        assert_eq!(FileName::new("a/b"), Err(Error::Invalid));
        assert!(FileName::new(&"x".repeat(NAME_MAX)).is_ok());
        assert_eq!(FileName::new(&"x".repeat(NAME_MAX + 1)), Err(Error::NameTooLong));
    }
}

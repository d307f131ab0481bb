//! Decoding of the resource index

use std::io::{Cursor, ErrorKind};

use byteorder::{LittleEndian, ReadBytesExt};
use indexmap::{map::Entry, IndexMap};
use tracing::{debug, instrument, warn};

use crate::{
    error::{Error, FormatError, Result},
    types::{ArchiveHeader, IndexLayout, ResourceKey, COMPRESSION_DIRECTORY_TYPE},
};

/// Bit 31 of a modern stored size marks the compression fields as authoritative
const EXTENDED_COMPRESSION: u32 = 0x8000_0000;

/// Compression information as the primary index states it
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IndexedCompression {
    /// The record carries an authoritative compression code
    Declared(u16),

    /// The record carries a code without the extended flag, it may be superseded
    Unconfirmed(u16),

    /// The record layout has no compression field at all
    Unspecified,
}

impl IndexedCompression {
    /// Whether the compression directory has to be consulted for this record
    pub fn is_ambiguous(&self) -> bool {
        !matches!(self, IndexedCompression::Declared(_))
    }

    /// The raw code to fall back on when no directory entry overrides it
    pub fn code(&self) -> u16 {
        match self {
            IndexedCompression::Declared(code) | IndexedCompression::Unconfirmed(code) => *code,
            IndexedCompression::Unspecified => 0,
        }
    }
}

/// A single resource entry in the index
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub key: ResourceKey,

    /// Offset of the payload from the start of the file
    pub offset: u64,

    /// Number of bytes the payload occupies in the file
    pub stored_size: u32,

    /// Size after decoding, absent for layouts that do not record it
    pub uncompressed_size: Option<u32>,

    pub compression: IndexedCompression,
}

/// Ordered index records plus a first-occurrence lookup
#[derive(Debug, Default)]
pub struct IndexTable {
    records: Vec<IndexRecord>,
    positions: IndexMap<ResourceKey, usize>,
    duplicates: Vec<usize>,
    directory: Option<usize>,
}

impl IndexTable {
    /// Decode `bytes`, the full index region described by `header`
    #[instrument(skip(bytes), fields(len = bytes.len()), err)]
    pub fn parse(bytes: &[u8], header: &ArchiveHeader) -> Result<Self> {
        let count = header.index_count as u64;
        let records = match header.index_layout {
            IndexLayout::Fixed { instance_high } => parse_fixed(bytes, count, instance_high)?,
            IndexLayout::Flagged => parse_flagged(bytes, count)?,
        };

        Ok(Self::from_records(records))
    }

    pub(crate) fn from_records(records: Vec<IndexRecord>) -> Self {
        let mut positions = IndexMap::with_capacity(records.len());
        let mut duplicates = Vec::new();

        for (position, record) in records.iter().enumerate() {
            match positions.entry(record.key) {
                Entry::Vacant(slot) => {
                    slot.insert(position);
                }
                Entry::Occupied(first) => {
                    warn!(
                        key = %record.key,
                        first = *first.get(),
                        position,
                        "duplicate resource key, lookup keeps the first occurrence"
                    );
                    duplicates.push(position);
                }
            }
        }

        let directory = records
            .iter()
            .position(|r| r.key.type_id == COMPRESSION_DIRECTORY_TYPE);

        debug!(
            records = records.len(),
            duplicates = duplicates.len(),
            has_directory = directory.is_some(),
            "built index"
        );

        Self {
            records,
            positions,
            duplicates,
            directory,
        }
    }

    /// Number of records, duplicates included
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in on-disk order
    pub fn records(&self) -> &[IndexRecord] {
        &self.records
    }

    pub fn get(&self, position: usize) -> Option<&IndexRecord> {
        self.records.get(position)
    }

    /// Position of the first record with `key`
    pub fn position_of(&self, key: &ResourceKey) -> Option<usize> {
        self.positions.get(key).copied()
    }

    /// Positions of records shadowed by an earlier record with the same key
    pub fn duplicates(&self) -> &[usize] {
        &self.duplicates
    }

    /// Position of the first compression directory resource, if declared
    pub fn directory_position(&self) -> Option<usize> {
        self.directory
    }
}

fn size_mismatch(expected: u64, actual: usize) -> Error {
    FormatError::IndexSizeMismatch {
        expected,
        actual: actual as u64,
    }
    .into()
}

/// Reads can only fail once the size check passed if the arithmetic is wrong,
/// still report them as a format problem rather than a bare io error
fn short_read(e: std::io::Error, expected: u64, actual: usize) -> Error {
    if e.kind() == ErrorKind::UnexpectedEof {
        size_mismatch(expected, actual)
    } else {
        e.into()
    }
}

fn parse_fixed(bytes: &[u8], count: u64, instance_high: bool) -> Result<Vec<IndexRecord>> {
    let width = IndexLayout::Fixed { instance_high }.record_width();
    let expected = count
        .checked_mul(width)
        .ok_or_else(|| size_mismatch(u64::MAX, bytes.len()))?;
    if expected != bytes.len() as u64 {
        return Err(size_mismatch(expected, bytes.len()));
    }

    let mut cursor = Cursor::new(bytes);
    let mut records = Vec::with_capacity(count as usize);
    let read = |c: &mut Cursor<&[u8]>| -> std::io::Result<IndexRecord> {
        let type_id = c.read_u32::<LittleEndian>()?;
        let group_id = c.read_u32::<LittleEndian>()?;
        let instance_lo = c.read_u32::<LittleEndian>()?;
        let instance_hi = if instance_high {
            c.read_u32::<LittleEndian>()?
        } else {
            0
        };
        let offset = c.read_u32::<LittleEndian>()?;
        let stored_size = c.read_u32::<LittleEndian>()?;

        Ok(IndexRecord {
            key: ResourceKey::from_parts(type_id, group_id, instance_hi, instance_lo),
            offset: offset as u64,
            stored_size,
            uncompressed_size: None,
            compression: IndexedCompression::Unspecified,
        })
    };

    for _ in 0..count {
        records.push(read(&mut cursor).map_err(|e| short_read(e, expected, bytes.len()))?);
    }

    Ok(records)
}

/// Key words a flagged index may store once instead of per record
#[derive(Debug, Default, Copy, Clone)]
struct Constants {
    type_id: Option<u32>,
    group_id: Option<u32>,
    instance_hi: Option<u32>,
    instance_lo: Option<u32>,
}

impl Constants {
    fn count(&self) -> u64 {
        [
            self.type_id,
            self.group_id,
            self.instance_hi,
            self.instance_lo,
        ]
        .iter()
        .filter(|c| c.is_some())
        .count() as u64
    }
}

fn parse_flagged(bytes: &[u8], count: u64) -> Result<Vec<IndexRecord>> {
    if count == 0 && bytes.is_empty() {
        return Ok(Vec::new());
    }

    let mut cursor = Cursor::new(bytes);
    let flags = cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| short_read(e, 4, bytes.len()))?;

    let mut constants = Constants::default();
    {
        let mut constant = |bit: u32| -> Result<Option<u32>> {
            if flags & (1 << bit) == 0 {
                return Ok(None);
            }
            cursor
                .read_u32::<LittleEndian>()
                .map(Some)
                .map_err(|e| short_read(e, 4 + 4 * (bit as u64 + 1), bytes.len()))
        };
        constants.type_id = constant(0)?;
        constants.group_id = constant(1)?;
        constants.instance_hi = constant(2)?;
        constants.instance_lo = constant(3)?;
    }

    if flags & !0xF != 0 {
        warn!(flags, "ignoring unknown index flag bits");
    }

    let header_len = 4 + 4 * constants.count();
    let width = IndexLayout::Flagged.record_width() - 4 * constants.count();
    let expected = count
        .checked_mul(width)
        .and_then(|n| n.checked_add(header_len))
        .ok_or_else(|| size_mismatch(u64::MAX, bytes.len()))?;
    if expected != bytes.len() as u64 {
        return Err(size_mismatch(expected, bytes.len()));
    }

    let mut unconfirmed = 0usize;
    let mut records = Vec::with_capacity(count as usize);
    let read = |c: &mut Cursor<&[u8]>| -> std::io::Result<IndexRecord> {
        let mut word = |constant: Option<u32>| match constant {
            Some(value) => Ok(value),
            None => c.read_u32::<LittleEndian>(),
        };
        let type_id = word(constants.type_id)?;
        let group_id = word(constants.group_id)?;
        let instance_hi = word(constants.instance_hi)?;
        let instance_lo = word(constants.instance_lo)?;

        let offset = c.read_u32::<LittleEndian>()?;
        let stored_raw = c.read_u32::<LittleEndian>()?;
        let uncompressed_size = c.read_u32::<LittleEndian>()?;
        let code = c.read_u16::<LittleEndian>()?;
        let _committed = c.read_u16::<LittleEndian>()?;

        let compression = if stored_raw & EXTENDED_COMPRESSION != 0 {
            IndexedCompression::Declared(code)
        } else {
            IndexedCompression::Unconfirmed(code)
        };

        Ok(IndexRecord {
            key: ResourceKey::from_parts(type_id, group_id, instance_hi, instance_lo),
            offset: offset as u64,
            stored_size: stored_raw & !EXTENDED_COMPRESSION,
            uncompressed_size: Some(uncompressed_size),
            compression,
        })
    };

    for _ in 0..count {
        let record = read(&mut cursor).map_err(|e| short_read(e, expected, bytes.len()))?;
        if record.compression.is_ambiguous() {
            unconfirmed += 1;
        }
        records.push(record);
    }

    if unconfirmed > 0 {
        debug!(unconfirmed, "records without extended compression info");
    }

    Ok(records)
}

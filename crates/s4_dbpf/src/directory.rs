//! The compression directory, an optional resource overriding per-record compression data

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use indexmap::{map::Entry, IndexMap};
use tracing::{debug, instrument, warn};

use crate::{
    error::{FormatError, Result},
    types::ResourceKey,
};

/// Width of one directory record
pub const DIRECTORY_RECORD_WIDTH: u64 = 24;

/// Authoritative compression data for one resource
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CompressionEntry {
    pub key: ResourceKey,

    /// Raw compression code, validated only when the resource is extracted
    pub code: u16,

    /// Exact number of bytes the compressed payload occupies
    pub compressed_size: u32,
}

/// Mapping from resource key to its compression entry
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompressionDirectory {
    entries: IndexMap<ResourceKey, CompressionEntry>,
}

impl CompressionDirectory {
    /// Parse the decoded body of a compression directory resource
    ///
    /// | Offset | Field                                    |
    /// |--------|------------------------------------------|
    /// | 0x00   | record count (u32)                       |
    /// | 0x04   | `count` records of 24 bytes each          |
    ///
    /// A record is type, group, instance high and instance low (u32 each),
    /// the compression code (u16), a reserved u16 and the compressed size (u32).
    #[instrument(skip(bytes), fields(len = bytes.len()), err)]
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let corrupt = |reason: String| FormatError::CompressionDirectoryCorrupt { reason };

        let mut cursor = Cursor::new(bytes);
        let count = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| corrupt(format!("{} bytes is too short for a record count", bytes.len())))?
            as u64;

        let expected = 4 + count * DIRECTORY_RECORD_WIDTH;
        if expected != bytes.len() as u64 {
            return Err(corrupt(format!(
                "{count} records need {expected} bytes, resource holds {}",
                bytes.len()
            ))
            .into());
        }

        let mut entries = IndexMap::with_capacity(count as usize);
        for _ in 0..count {
            let entry = read_entry(&mut cursor).map_err(|e| corrupt(e.to_string()))?;
            match entries.entry(entry.key) {
                Entry::Vacant(slot) => {
                    slot.insert(entry);
                }
                Entry::Occupied(_) => {
                    warn!(key = %entry.key, "duplicate compression directory entry ignored");
                }
            }
        }

        debug!(entries = entries.len(), "built compression directory");
        Ok(Self { entries })
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&CompressionEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in the order the directory lists them
    pub fn entries(&self) -> impl Iterator<Item = &CompressionEntry> {
        self.entries.values()
    }
}

fn read_entry(cursor: &mut Cursor<&[u8]>) -> std::io::Result<CompressionEntry> {
    let type_id = cursor.read_u32::<LittleEndian>()?;
    let group_id = cursor.read_u32::<LittleEndian>()?;
    let instance_hi = cursor.read_u32::<LittleEndian>()?;
    let instance_lo = cursor.read_u32::<LittleEndian>()?;
    let code = cursor.read_u16::<LittleEndian>()?;
    let _reserved = cursor.read_u16::<LittleEndian>()?;
    let compressed_size = cursor.read_u32::<LittleEndian>()?;

    Ok(CompressionEntry {
        key: ResourceKey::from_parts(type_id, group_id, instance_hi, instance_lo),
        code,
        compressed_size,
    })
}

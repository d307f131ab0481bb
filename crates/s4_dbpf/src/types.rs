//! Base types for structure of DBPF file.

use std::{fmt, str::FromStr};

use binrw::{BinRead, BinWrite};

use crate::error::{Error, Result};

/// Size of the fixed header prefix shared by every revision
pub const HEADER_SIZE: usize = 96;

/// Signature every package starts with
pub const MAGIC: [u8; 4] = *b"DBPF";

/// Type id reserved for the compression directory resource
pub const COMPRESSION_DIRECTORY_TYPE: u32 = 0xE86B1EEF;

/// Addresses a resource inside a package by type, group and instance
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    /// The resource type identifier
    pub type_id: u32,

    /// The resource group identifier
    pub group_id: u32,

    /// The 64-bit instance identifier
    pub instance_id: u64,
}

impl ResourceKey {
    pub const fn new(type_id: u32, group_id: u32, instance_id: u64) -> Self {
        Self {
            type_id,
            group_id,
            instance_id,
        }
    }

    /// Assemble a key from the split instance words found on disk
    pub const fn from_parts(type_id: u32, group_id: u32, instance_hi: u32, instance_lo: u32) -> Self {
        Self::new(
            type_id,
            group_id,
            ((instance_hi as u64) << 32) | instance_lo as u64,
        )
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08X}:{:08X}:{:016X}",
            self.type_id, self.group_id, self.instance_id
        )
    }
}

impl FromStr for ResourceKey {
    type Err = Error;

    /// Parses `TYPE:GROUP:INSTANCE` written in hexadecimal, `0x` prefixes are optional
    fn from_str(s: &str) -> Result<Self> {
        fn hex<T>(part: Option<&str>, parse: fn(&str, u32) -> core::result::Result<T, std::num::ParseIntError>) -> Result<T> {
            let part = part.ok_or_else(|| Error::CustomError("expected TYPE:GROUP:INSTANCE".into()))?;
            let digits = part
                .trim()
                .trim_start_matches("0x")
                .trim_start_matches("0X");
            parse(digits, 16).map_err(|e| Error::CustomError(format!("invalid key part {part:?}: {e}")))
        }

        let mut parts = s.split(':');
        let key = ResourceKey::new(
            hex(parts.next(), u32::from_str_radix)?,
            hex(parts.next(), u32::from_str_radix)?,
            hex(parts.next(), u64::from_str_radix)?,
        );

        if parts.next().is_some() {
            return Err(Error::CustomError(format!("too many key parts in {s:?}")));
        }

        Ok(key)
    }
}

/// On-disk revisions of the format that this crate understands
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Revision {
    /// Version 1.x: 32-bit index offset at 0x28, index records without compression data
    Legacy,

    /// Version 2.x: 64-bit index offset at 0x40, flag-compacted index records
    Modern,
}

impl Revision {
    /// Map a header version pair onto a known revision
    pub fn detect(major: u32, minor: u32) -> Option<Self> {
        match (major, minor) {
            (1, 0) | (1, 1) => Some(Revision::Legacy),
            (2, 0) | (2, 1) => Some(Revision::Modern),
            _ => None,
        }
    }

    /// Header field positions for this revision
    pub const fn header_layout(self) -> HeaderLayout {
        match self {
            Revision::Legacy => HeaderLayout {
                index_offset: Field::new(0x28, Width::U32),
                index_size: Field::new(0x2C, Width::U32),
            },
            Revision::Modern => HeaderLayout {
                index_offset: Field::new(0x40, Width::U64),
                index_size: Field::new(0x2C, Width::U32),
            },
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Revision::Legacy => write!(f, "legacy"),
            Revision::Modern => write!(f, "modern"),
        }
    }
}

/// Width of an integer field in the header
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Width {
    U32,
    U64,
}

/// Position and width of a little endian field inside the header prefix
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Field {
    pub at: usize,
    pub width: Width,
}

impl Field {
    pub const fn new(at: usize, width: Width) -> Self {
        Self { at, width }
    }

    pub(crate) fn read(&self, prefix: &[u8; HEADER_SIZE]) -> u64 {
        use byteorder::{ByteOrder, LittleEndian};

        match self.width {
            Width::U32 => LittleEndian::read_u32(&prefix[self.at..self.at + 4]) as u64,
            Width::U64 => LittleEndian::read_u64(&prefix[self.at..self.at + 8]),
        }
    }
}

/// Revision specific location of the index fields inside the header
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HeaderLayout {
    pub index_offset: Field,
    pub index_size: Field,
}

/// How index records encode their key and payload location
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IndexLayout {
    /// Every key word is stored per record, there is no compression data
    Fixed {
        /// Records carry a second instance word holding the high 32 bits
        instance_high: bool,
    },

    /// A leading flags word marks key words stored once for the whole index
    Flagged,
}

impl IndexLayout {
    /// Width of a record when no key word has been collapsed
    pub const fn record_width(self) -> u64 {
        match self {
            IndexLayout::Fixed {
                instance_high: false,
            } => 20,
            IndexLayout::Fixed {
                instance_high: true,
            } => 24,
            IndexLayout::Flagged => 32,
        }
    }
}

/// DBPF file header
///
/// The fixed 96 byte prefix of every package. Fields whose meaning depends on the
/// revision are all read here and resolved through [`HeaderLayout`].
/// All data is stored in little endian format
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct RawHeader {
    /// Expected to be [`MAGIC`]
    pub magic: [u8; 4],

    pub major: u32,
    pub minor: u32,

    #[allow(dead_code)]
    pub user_major: u32,
    #[allow(dead_code)]
    pub user_minor: u32,
    #[allow(dead_code)]
    pub flags: u32,

    /// Creation timestamp
    pub created: u32,

    /// Modification timestamp
    pub modified: u32,

    pub index_major: u32,

    /// Number of records in the index
    pub index_count: u32,

    /// Legacy index offset
    pub index_offset_short: u32,

    /// Size of the index in bytes
    pub index_size: u32,

    #[allow(dead_code)]
    pub hole_count: u32,
    #[allow(dead_code)]
    pub hole_offset: u32,
    #[allow(dead_code)]
    pub hole_size: u32,

    /// Legacy index minor version, `2` selects records with a high instance word
    pub index_minor: u32,

    /// Modern index offset
    pub index_offset_wide: u64,

    pub reserved: [u8; 24],
}

impl Default for RawHeader {
    fn default() -> Self {
        Self {
            magic: MAGIC,
            major: 2,
            minor: 1,
            user_major: 0,
            user_minor: 0,
            flags: 0,
            created: 0,
            modified: 0,
            index_major: 0,
            index_count: 0,
            index_offset_short: 0,
            index_size: 0,
            hole_count: 0,
            hole_offset: 0,
            hole_size: 0,
            index_minor: 0,
            index_offset_wide: HEADER_SIZE as u64,
            reserved: [0; 24],
        }
    }
}

/// Validated header of an opened package
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub revision: Revision,
    pub major: u32,
    pub minor: u32,
    pub created: u32,
    pub modified: u32,
    pub index_count: u32,
    pub index_offset: u64,
    pub index_size: u64,
    pub index_layout: IndexLayout,
}

impl ArchiveHeader {
    /// Version as `(major, minor)`
    pub fn version(&self) -> (u32, u32) {
        (self.major, self.minor)
    }
}

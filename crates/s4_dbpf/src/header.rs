//! Parsing of the fixed size package header

use std::io::{Cursor, ErrorKind, Read};

use binrw::BinRead;
use tracing::{debug, instrument};

use crate::{
    error::{FormatError, Result},
    types::{ArchiveHeader, IndexLayout, RawHeader, Revision, HEADER_SIZE, MAGIC},
};

/// Reads the header prefix from a source positioned at offset 0.
///
/// Checks happen in order: enough bytes for the prefix, the magic, then the
/// version pair. The index range is checked against `file_len`.
#[instrument(skip(reader), err)]
pub fn read_header<R: Read>(reader: &mut R, file_len: u64) -> Result<ArchiveHeader> {
    let prefix = read_prefix(reader)?;
    let raw = RawHeader::read(&mut Cursor::new(&prefix[..]))?;

    if raw.magic != MAGIC {
        return Err(FormatError::BadMagic { found: raw.magic }.into());
    }

    let revision = Revision::detect(raw.major, raw.minor).ok_or(FormatError::UnsupportedRevision {
        major: raw.major,
        minor: raw.minor,
    })?;

    let layout = revision.header_layout();
    let index_offset = layout.index_offset.read(&prefix);
    let index_size = layout.index_size.read(&prefix);

    let in_bounds = index_offset
        .checked_add(index_size)
        .is_some_and(|end| end <= file_len);
    if !in_bounds {
        return Err(FormatError::IndexOutOfBounds {
            offset: index_offset,
            size: index_size,
            file_len,
        }
        .into());
    }

    let index_layout = match revision {
        Revision::Legacy => IndexLayout::Fixed {
            instance_high: raw.index_minor == 2,
        },
        Revision::Modern => IndexLayout::Flagged,
    };

    debug!(
        %revision,
        major = raw.major,
        minor = raw.minor,
        records = raw.index_count,
        index_offset,
        index_size,
        "parsed header"
    );

    Ok(ArchiveHeader {
        revision,
        major: raw.major,
        minor: raw.minor,
        created: raw.created,
        modified: raw.modified,
        index_count: raw.index_count,
        index_offset,
        index_size,
        index_layout,
    })
}

/// Fill the prefix buffer, reporting how far we got if the source runs dry
fn read_prefix<R: Read>(reader: &mut R) -> Result<[u8; HEADER_SIZE]> {
    let mut prefix = [0u8; HEADER_SIZE];
    let mut filled = 0;

    while filled < HEADER_SIZE {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    if filled < HEADER_SIZE {
        return Err(FormatError::Truncated {
            expected: HEADER_SIZE as u64,
            actual: filled as u64,
        }
        .into());
    }

    Ok(prefix)
}

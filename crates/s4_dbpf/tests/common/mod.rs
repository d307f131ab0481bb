//! In-memory package builder used to produce fixtures for the integration tests
#![allow(dead_code)]

use std::io::Write;

use flate2::{write::ZlibEncoder, Compression};
use s4_dbpf::{types::COMPRESSION_DIRECTORY_TYPE, ResourceKey};
use tempfile::NamedTempFile;

pub const TUNING: u32 = 0x0333406C;
pub const STRING_TABLE: u32 = 0x220557DA;
pub const DDS: u32 = 0x00B2D882;

pub const NONE: u16 = 0x0000;
pub const DEFLATE: u16 = 0x5A42;
pub const REFPACK: u16 = 0xFFFF;
pub const STREAMABLE: u16 = 0xFFFE;

struct Entry {
    key: ResourceKey,
    stored: Vec<u8>,
    code: u16,
    uncompressed: u32,
    extended: bool,
}

/// Builds version 1.1 or 2.x packages byte by byte
pub struct PackageBuilder {
    major: u32,
    minor: u32,
    entries: Vec<Entry>,
}

impl PackageBuilder {
    pub fn modern() -> Self {
        Self {
            major: 2,
            minor: 1,
            entries: Vec::new(),
        }
    }

    /// Version 1.1 with the wide record layout
    pub fn legacy() -> Self {
        Self {
            major: 1,
            minor: 1,
            entries: Vec::new(),
        }
    }

    pub fn version(mut self, major: u32, minor: u32) -> Self {
        self.major = major;
        self.minor = minor;
        self
    }

    /// Store `data` as is, with an authoritative compression code of zero
    pub fn raw(self, key: ResourceKey, data: &[u8]) -> Self {
        self.entry(key, data.to_vec(), NONE, data.len() as u32, true)
    }

    pub fn zlib(self, key: ResourceKey, data: &[u8]) -> Self {
        self.entry(key, zlib(data), DEFLATE, data.len() as u32, true)
    }

    pub fn refpack(self, key: ResourceKey, data: &[u8]) -> Self {
        self.entry(key, refpack_literals(data), REFPACK, data.len() as u32, true)
    }

    pub fn entry(
        mut self,
        key: ResourceKey,
        stored: Vec<u8>,
        code: u16,
        uncompressed: u32,
        extended: bool,
    ) -> Self {
        self.entries.push(Entry {
            key,
            stored,
            code,
            uncompressed,
            extended,
        });
        self
    }

    /// Add a compression directory resource listing `(key, code, compressed size)`
    pub fn directory(self, entries: &[(ResourceKey, u16, u32)]) -> Self {
        let body = directory_body(entries);
        self.raw(ResourceKey::new(COMPRESSION_DIRECTORY_TYPE, 0, 0), &body)
    }

    /// Add a compression directory resource with arbitrary bytes
    pub fn directory_bytes(self, body: &[u8]) -> Self {
        self.raw(ResourceKey::new(COMPRESSION_DIRECTORY_TYPE, 0, 0), body)
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0u8; 96];
        let mut offsets = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            offsets.push(out.len() as u32);
            out.extend(&entry.stored);
        }

        let index_offset = out.len();
        if self.major == 1 {
            for (entry, offset) in self.entries.iter().zip(&offsets) {
                out.extend(entry.key.type_id.to_le_bytes());
                out.extend(entry.key.group_id.to_le_bytes());
                out.extend((entry.key.instance_id as u32).to_le_bytes());
                out.extend(((entry.key.instance_id >> 32) as u32).to_le_bytes());
                out.extend(offset.to_le_bytes());
                out.extend((entry.stored.len() as u32).to_le_bytes());
            }
        } else {
            out.extend(0u32.to_le_bytes());
            for (entry, offset) in self.entries.iter().zip(&offsets) {
                let mut stored = entry.stored.len() as u32;
                if entry.extended {
                    stored |= 0x8000_0000;
                }
                out.extend(entry.key.type_id.to_le_bytes());
                out.extend(entry.key.group_id.to_le_bytes());
                out.extend(((entry.key.instance_id >> 32) as u32).to_le_bytes());
                out.extend((entry.key.instance_id as u32).to_le_bytes());
                out.extend(offset.to_le_bytes());
                out.extend(stored.to_le_bytes());
                out.extend(entry.uncompressed.to_le_bytes());
                out.extend(entry.code.to_le_bytes());
                out.extend(1u16.to_le_bytes());
            }
        }
        let index_size = out.len() - index_offset;

        out[0..4].copy_from_slice(b"DBPF");
        put_u32(&mut out, 0x04, self.major);
        put_u32(&mut out, 0x08, self.minor);
        put_u32(&mut out, 0x24, self.entries.len() as u32);
        put_u32(&mut out, 0x2C, index_size as u32);
        if self.major == 1 {
            put_u32(&mut out, 0x28, index_offset as u32);
            put_u32(&mut out, 0x3C, 2);
        } else {
            out[0x40..0x48].copy_from_slice(&(index_offset as u64).to_le_bytes());
        }

        out
    }

    /// Write the package to a temporary file that lives as long as the handle
    pub fn write_temp(&self) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("create temp file");
        file.write_all(&self.build()).expect("write package");
        file.flush().expect("flush package");
        file
    }
}

pub fn put_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn directory_body(entries: &[(ResourceKey, u16, u32)]) -> Vec<u8> {
    let mut body = (entries.len() as u32).to_le_bytes().to_vec();
    for (key, code, size) in entries {
        body.extend(key.type_id.to_le_bytes());
        body.extend(key.group_id.to_le_bytes());
        body.extend(((key.instance_id >> 32) as u32).to_le_bytes());
        body.extend((key.instance_id as u32).to_le_bytes());
        body.extend(code.to_le_bytes());
        body.extend(0u16.to_le_bytes());
        body.extend(size.to_le_bytes());
    }
    body
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("compress");
    encoder.finish().expect("finish compression")
}

/// RefPack stream made only of literal runs
pub fn refpack_literals(data: &[u8]) -> Vec<u8> {
    let len = data.len();
    let mut out = vec![0x10, 0xFB, (len >> 16) as u8, (len >> 8) as u8, len as u8];

    let mut rest = data;
    while rest.len() > 3 {
        let run = (rest.len() & !3).min(112);
        out.push(0xE0 | ((run / 4 - 1) as u8));
        out.extend_from_slice(&rest[..run]);
        rest = &rest[run..];
    }
    out.push(0xFC | rest.len() as u8);
    out.extend_from_slice(rest);
    out
}

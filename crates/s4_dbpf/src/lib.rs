//! This library handles reading **DBPF** packages, the container format used for
//! *The Sims 4* game data and mods.
//!
//! # DBPF Package Format Documentation
//!
//! A package stores many independently addressable resources in a single file. Packages
//! usually carry the `.package` extension. Every resource is addressed by a
//! [`ResourceKey`]: a 32-bit type, a 32-bit group and a 64-bit instance.
//!
//! ## File Structure
//!
//! A package consists of a fixed 96 byte header, resource payloads, and an index
//! describing where each payload lives. The index is usually the last thing in the file.
//!
//! | Offset (bytes) | Field                  | Description                                                |
//! |----------------|------------------------|------------------------------------------------------------|
//! | 0x0000         | Magic number           | 4 bytes: "DBPF"                                            |
//! | 0x0004         | Major version          | 4 bytes: `1` or `2`                                        |
//! | 0x0008         | Minor version          | 4 bytes: `0` or `1`                                        |
//! | 0x0018         | Created                | 4 bytes: creation timestamp                                |
//! | 0x001C         | Modified               | 4 bytes: modification timestamp                            |
//! | 0x0024         | Index Count            | 4 bytes: number of index records                           |
//! | 0x0028         | Index Offset (1.x)     | 4 bytes: offset of the index                               |
//! | 0x002C         | Index Size             | 4 bytes: size of the index in bytes                        |
//! | 0x003C         | Index Minor (1.x)      | 4 bytes: `2` selects records with a high instance word     |
//! | 0x0040         | Index Offset (2.x)     | 8 bytes: offset of the index                               |
//!
//! Fields not listed are ignored. All integers are little endian.
//!
//! ### Index, version 1.x
//!
//! Records have a fixed width and carry no compression data. Payloads are stored raw unless
//! the compression directory says otherwise.
//!
//! | Offset (bytes) | Field                  | Description                                             |
//! |----------------|------------------------|---------------------------------------------------------|
//! | 0x0000         | Type                   | 4 bytes                                                 |
//! | 0x0004         | Group                  | 4 bytes                                                 |
//! | 0x0008         | Instance Low           | 4 bytes                                                 |
//! | 0x000C         | Instance High          | 4 bytes: only present for index minor version `2`       |
//! | +0x00          | Offset                 | 4 bytes: payload offset from the start of the file      |
//! | +0x04          | Size                   | 4 bytes: payload size in the file                       |
//!
//! ### Index, version 2.x
//!
//! The index starts with a flags word. Bits 0 to 3 mark type, group, instance high and
//! instance low as constant for the whole index. Each set bit is followed by the constant
//! value, and those words are omitted from every record.
//!
//! | Field                  | Description                                                       |
//! |------------------------|-------------------------------------------------------------------|
//! | Type                   | 4 bytes, unless constant                                          |
//! | Group                  | 4 bytes, unless constant                                          |
//! | Instance High          | 4 bytes, unless constant                                          |
//! | Instance Low           | 4 bytes, unless constant                                          |
//! | Offset                 | 4 bytes: payload offset from the start of the file                |
//! | Stored Size            | 4 bytes: bit 31 set marks the compression code as authoritative   |
//! | Uncompressed Size      | 4 bytes                                                           |
//! | Compression            | 2 bytes: see [`CompressionKind`]                                  |
//! | Committed              | 2 bytes: ignored                                                  |
//!
//! ### Compression Directory
//!
//! A resource of type `0xE86B1EEF` may override the compression code and stored size of
//! other resources. When present its entries take precedence over the index. See
//! [`directory::CompressionDirectory`].
//!
//! ## Additional Information
//!
//! - **File Extension**: `.package`
//! - **Endianness**: Little-endian for all multi-byte integers, except RefPack size fields
//! - **Compression Methods**:
//!   - `0x0000`: None
//!   - `0x5A42`: Zlib
//!   - `0xFFFF`: RefPack
//!   - `0xFFFE`: Streamable RefPack
//!

pub mod compression;
pub mod directory;
pub mod error;
pub mod header;
pub mod index;
pub mod read;
pub mod registry;
pub mod types;

pub use compression::CompressionKind;
pub use read::{Package, PackageOptions, ResourceHandle};
pub use types::ResourceKey;

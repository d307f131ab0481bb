//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent warpper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent warpper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// The archive itself cannot be trusted
    #[error(transparent)]
    #[diagnostic(transparent)]
    Format(#[from] FormatError),

    /// A single resource could not be decoded
    #[error(transparent)]
    #[diagnostic(transparent)]
    Codec(#[from] CodecError),

    /// The package was used outside of its lifecycle
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// {0}
    #[error("{0}")]
    CustomError(String),
}

impl Error {
    /// Whether this error only concerns a single resource, leaving the package usable
    pub fn is_resource_scoped(&self) -> bool {
        matches!(self, Error::Codec(_))
    }
}

/// Structural problems with the archive, always surfaced as a failed open
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// file does not start with the DBPF signature
    #[error("file is not a dbpf package (magic {found:02X?})")]
    #[diagnostic(code(s4_dbpf::format::bad_magic))]
    BadMagic { found: [u8; 4] },

    /// version pair outside of the known revisions
    #[error("unsupported dbpf version {major}.{minor}")]
    #[diagnostic(
        code(s4_dbpf::format::unsupported_revision),
        help("known versions are 1.0, 1.1, 2.0 and 2.1")
    )]
    UnsupportedRevision { major: u32, minor: u32 },

    /// fewer bytes were available than required
    #[error("file is truncated: needed {expected} bytes, found {actual}")]
    #[diagnostic(code(s4_dbpf::format::truncated))]
    Truncated { expected: u64, actual: u64 },

    /// record count and record width disagree with the index size
    #[error("index size mismatch: records require {expected} bytes, header declares {actual}")]
    #[diagnostic(code(s4_dbpf::format::index_size_mismatch))]
    IndexSizeMismatch { expected: u64, actual: u64 },

    /// the index region does not fit inside the file
    #[error("index at {offset} with size {size} exceeds file length {file_len}")]
    #[diagnostic(code(s4_dbpf::format::index_out_of_bounds))]
    IndexOutOfBounds { offset: u64, size: u64, file_len: u64 },

    /// the compression directory resource could not be parsed
    #[error("compression directory is corrupt: {reason}")]
    #[diagnostic(code(s4_dbpf::format::compression_directory_corrupt))]
    CompressionDirectoryCorrupt { reason: String },
}

/// Failures decoding one resource, the package stays usable
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// compression code outside of the supported set
    #[error("unknown compression kind 0x{code:04X}")]
    #[diagnostic(code(s4_dbpf::codec::unknown_kind))]
    UnknownKind { code: u16 },

    /// input ended before the resource was complete
    #[error("resource data is truncated: needed {expected} bytes, found {actual}")]
    #[diagnostic(code(s4_dbpf::codec::truncated))]
    Truncated { expected: u64, actual: u64 },

    /// decoded length differs from the declared uncompressed size
    #[error("decoded {actual} bytes, expected {expected}")]
    #[diagnostic(code(s4_dbpf::codec::size_mismatch))]
    SizeMismatch { expected: u64, actual: u64 },

    /// the compressed stream is structurally invalid
    #[error("malformed compressed stream: {reason}")]
    #[diagnostic(code(s4_dbpf::codec::malformed))]
    Malformed { reason: String },

    /// a stored or decoded size exceeds the configured limit
    #[error("resource needs {size} bytes, limit is {limit}")]
    #[diagnostic(
        code(s4_dbpf::codec::too_large),
        help("raise PackageOptions::max_resource_size if the archive is trusted")
    )]
    ResourceTooLarge { size: u64, limit: u64 },
}

/// Calls made against a package outside of its valid states
#[derive(Error, Diagnostic, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// the package has been closed
    #[error("package has been closed")]
    #[diagnostic(code(s4_dbpf::lifecycle::closed))]
    Closed,

    /// the compression directory was requested while it was being built
    #[error("compression directory is already being built")]
    #[diagnostic(code(s4_dbpf::lifecycle::reentrant_init))]
    ReentrantInit,
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;

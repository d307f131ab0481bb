//! Types for reading DBPF packages
//!

use bon::Builder;
use parking_lot::{Condvar, Mutex};
use std::{
    borrow::Cow,
    fmt::{self, Debug},
    fs::File,
    io::{Read, Seek, SeekFrom, Write},
    ops::Range,
    path::Path,
    sync::Arc,
    thread::{self, ThreadId},
};
use tracing::{debug, instrument};

use crate::{
    compression::{self, CompressionKind},
    directory::CompressionDirectory,
    error::{CodecError, Error, FormatError, LifecycleError, Result},
    header::read_header,
    index::{IndexRecord, IndexTable, IndexedCompression},
    registry,
    types::{ArchiveHeader, ResourceKey, COMPRESSION_DIRECTORY_TYPE},
};

/// Default cap on the bytes a single resource may occupy, stored or decoded
pub const DEFAULT_MAX_RESOURCE_SIZE: u64 = 256 * 1024 * 1024;

/// Options for how a package should be read
#[derive(Debug, Clone, Copy, Builder)]
pub struct PackageOptions {
    /// Largest stored or decoded size accepted for a single resource
    #[builder(default = DEFAULT_MAX_RESOURCE_SIZE)]
    pub max_resource_size: u64,

    /// Build the compression directory while opening when the package declares one
    #[builder(default = true)]
    pub eager_compression_directory: bool,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

enum DirectoryState {
    Unbuilt,
    Building(ThreadId),
    Built(Arc<CompressionDirectory>),
}

/// Releases a `Building` slot however the build ends, waking any waiting threads.
///
/// A build that failed or panicked leaves the slot `Unbuilt` so a later call retries.
struct BuildingGuard<'a> {
    state: &'a Mutex<DirectoryState>,
    ready: &'a Condvar,
}

impl Drop for BuildingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if matches!(*state, DirectoryState::Building(_)) {
            *state = DirectoryState::Unbuilt;
        }
        self.ready.notify_all();
    }
}

/// Where the compression data used for an extraction came from
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionSource {
    /// The primary index record
    Index,
    /// A compression directory entry superseding the index
    Directory,
}

/// Compression data for a record after consulting the compression directory
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ResolvedCompression {
    /// Raw code, see [`CompressionKind`]
    pub code: u16,

    /// Number of bytes to read from the payload offset
    pub stored_size: u32,

    pub source: CompressionSource,
}

impl ResolvedCompression {
    /// The decoder for this code, fails for codes outside of [`CompressionKind`]
    pub fn kind(&self) -> core::result::Result<CompressionKind, CodecError> {
        CompressionKind::try_from(self.code)
    }
}

/// DBPF package reader
///
/// The header and index are read once while opening. Resources are only read and
/// decoded when [`ResourceHandle::extract`] is called.
///
/// ```no_run
/// fn list_package_contents(path: &str) -> s4_dbpf::error::Result<()> {
///     let package = s4_dbpf::Package::open(path)?;
///
///     for resource in package.resources()? {
///         println!("{} {}", resource.type_name(), resource.key());
///         let data = resource.extract()?;
///         println!("  {} bytes", data.len());
///     }
///
///     package.close()
/// }
/// ```
///
/// Reads are serialized internally, a shared `&Package` can be used from several threads.
/// After [`Package::close`] every operation, including those on previously issued
/// handles, fails with [`LifecycleError::Closed`].
pub struct Package<R = File> {
    reader: Mutex<Option<R>>,
    file_len: u64,
    header: ArchiveHeader,
    index: IndexTable,
    directory: Mutex<DirectoryState>,
    directory_ready: Condvar,
    options: PackageOptions,
}

impl<R> Debug for Package<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Package")
            .field("version", &self.header.version())
            .field("revision", &self.header.revision)
            .field("resources", &self.index.len())
            .field("closed", &self.reader.lock().is_none())
            .finish()
    }
}

impl Package<File> {
    /// Open the package at `path` with default options
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, PackageOptions::default())
    }

    /// Open the package at `path`.
    ///
    /// The file is closed again if the header or index cannot be parsed.
    #[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
    pub fn open_with(path: impl AsRef<Path>, options: PackageOptions) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_reader_with(file, options)
    }
}

impl<R: Read + Seek> Package<R> {
    /// Read a package from any seekable source with default options
    pub fn from_reader(reader: R) -> Result<Self> {
        Self::from_reader_with(reader, PackageOptions::default())
    }

    /// Read the header and index of a package.
    ///
    /// Nothing partially parsed is ever returned: on failure the reader is dropped.
    #[instrument(skip(reader), err)]
    pub fn from_reader_with(mut reader: R, options: PackageOptions) -> Result<Self> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let header = read_header(&mut reader, file_len)?;

        // The header reader already checked the index fits inside the file
        reader.seek(SeekFrom::Start(header.index_offset))?;
        let mut index_bytes = vec![0u8; header.index_size as usize];
        reader.read_exact(&mut index_bytes)?;
        let index = IndexTable::parse(&index_bytes, &header)?;

        let package = Package {
            reader: Mutex::new(Some(reader)),
            file_len,
            header,
            index,
            directory: Mutex::new(DirectoryState::Unbuilt),
            directory_ready: Condvar::new(),
            options,
        };

        if options.eager_compression_directory && package.index.directory_position().is_some() {
            package.compression_directory()?;
        }

        debug!(
            resources = package.index.len(),
            file_len, "opened package"
        );
        Ok(package)
    }

    /// Format version as `(major, minor)`
    pub fn version(&self) -> Result<(u32, u32)> {
        self.ensure_open()?;
        Ok(self.header.version())
    }

    /// The parsed header
    pub fn header(&self) -> Result<&ArchiveHeader> {
        self.ensure_open()?;
        Ok(&self.header)
    }

    /// The options this package was opened with
    pub fn options(&self) -> &PackageOptions {
        &self.options
    }

    /// Number of index records, duplicates included
    pub fn len(&self) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.index.len())
    }

    /// Whether this package contains no resources
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Every resource in on-disk order, duplicates included.
    ///
    /// Each call starts a fresh iteration.
    pub fn resources(&self) -> Result<Resources<'_, R>> {
        self.ensure_open()?;
        Ok(Resources {
            package: self,
            range: 0..self.index.len(),
        })
    }

    /// Look up a resource by key, the first record wins when a key is repeated
    pub fn get(&self, key: &ResourceKey) -> Result<Option<ResourceHandle<'_, R>>> {
        self.ensure_open()?;
        Ok(self
            .index
            .position_of(key)
            .map(|position| self.handle(position)))
    }

    /// Get a resource by its position in the index
    pub fn by_index(&self, position: usize) -> Result<Option<ResourceHandle<'_, R>>> {
        self.ensure_open()?;
        Ok((position < self.index.len()).then(|| self.handle(position)))
    }

    /// All resources of the given type, in on-disk order
    pub fn find_by_type(
        &self,
        type_id: u32,
    ) -> Result<impl Iterator<Item = ResourceHandle<'_, R>> + '_> {
        Ok(self
            .resources()?
            .filter(move |resource| resource.type_id() == type_id))
    }

    /// The first resource with the given instance id, whatever its type and group
    pub fn find_by_instance(&self, instance_id: u64) -> Result<Option<ResourceHandle<'_, R>>> {
        Ok(self
            .resources()?
            .find(|resource| resource.instance_id() == instance_id))
    }

    /// Records whose key already appeared earlier in the index.
    ///
    /// These are only reachable through [`Package::resources`] or [`Package::by_index`].
    pub fn duplicates(&self) -> Result<impl Iterator<Item = ResourceHandle<'_, R>> + '_> {
        self.ensure_open()?;
        Ok(self
            .index
            .duplicates()
            .iter()
            .map(move |&position| self.handle(position)))
    }

    /// Total size of the resources once decoded, if every record declares it
    pub fn decompressed_size(&self) -> Result<Option<u128>> {
        self.ensure_open()?;
        let mut total = 0u128;
        for record in self.index.records() {
            let Some(size) = record.uncompressed_size else {
                return Ok(None);
            };
            total += size as u128;
        }
        Ok(Some(total))
    }

    /// The compression directory, built on first use.
    ///
    /// Packages without a directory resource yield an empty directory. Other threads
    /// asking while a build is running wait for it. A request from the thread that is
    /// running the build fails with [`LifecycleError::ReentrantInit`].
    pub fn compression_directory(&self) -> Result<Arc<CompressionDirectory>> {
        self.ensure_open()?;

        let current = thread::current().id();
        {
            let mut state = self.directory.lock();
            loop {
                let owner = match &*state {
                    DirectoryState::Built(directory) => return Ok(directory.clone()),
                    DirectoryState::Building(owner) => Some(*owner),
                    DirectoryState::Unbuilt => None,
                };
                match owner {
                    Some(owner) if owner == current => {
                        return Err(LifecycleError::ReentrantInit.into())
                    }
                    Some(_) => self.directory_ready.wait(&mut state),
                    None => {
                        *state = DirectoryState::Building(current);
                        break;
                    }
                }
            }
        }

        let building = BuildingGuard {
            state: &self.directory,
            ready: &self.directory_ready,
        };
        let directory = Arc::new(self.build_directory()?);
        *self.directory.lock() = DirectoryState::Built(directory.clone());
        drop(building);

        Ok(directory)
    }

    /// Whether the compression directory has been built yet
    pub fn is_directory_loaded(&self) -> bool {
        matches!(*self.directory.lock(), DirectoryState::Built(_))
    }

    /// Release the underlying reader.
    ///
    /// Every later call on this package or its handles fails with [`LifecycleError::Closed`].
    pub fn close(&self) -> Result<()> {
        let reader = self.reader.lock().take();
        match reader {
            Some(reader) => {
                drop(reader);
                debug!("closed package");
                Ok(())
            }
            None => Err(LifecycleError::Closed.into()),
        }
    }

    /// Whether [`Package::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.reader.lock().is_none()
    }

    /// Unwrap and return the inner reader object
    ///
    /// The position of the reader is undefined.
    pub fn into_inner(self) -> Result<R> {
        self.reader
            .into_inner()
            .ok_or_else(|| LifecycleError::Closed.into())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(LifecycleError::Closed.into());
        }
        Ok(())
    }

    fn handle(&self, position: usize) -> ResourceHandle<'_, R> {
        ResourceHandle {
            package: self,
            position,
            record: &self.index.records()[position],
        }
    }

    #[instrument(skip(self), err)]
    fn build_directory(&self) -> Result<CompressionDirectory> {
        let Some(record) = self
            .index
            .directory_position()
            .and_then(|position| self.index.get(position))
        else {
            debug!("package declares no compression directory");
            return Ok(CompressionDirectory::default());
        };

        let corrupt = |e: Error| -> Error {
            match e {
                Error::Codec(e) => FormatError::CompressionDirectoryCorrupt {
                    reason: e.to_string(),
                }
                .into(),
                other => other,
            }
        };

        // The directory is always stored raw
        let stored = self
            .read_range(record.offset, record.stored_size)
            .map_err(corrupt)?;
        let bytes = compression::decode_bounded(
            &stored,
            CompressionKind::None,
            record.uncompressed_size,
            self.options.max_resource_size,
        )
        .map_err(|e| corrupt(e.into()))?;

        CompressionDirectory::parse(&bytes)
    }

    /// Read exactly `len` bytes at `offset`, after checking the range lies inside the file
    fn read_range(&self, offset: u64, len: u32) -> Result<Vec<u8>> {
        let len = len as u64;
        if len > self.options.max_resource_size {
            return Err(CodecError::ResourceTooLarge {
                size: len,
                limit: self.options.max_resource_size,
            }
            .into());
        }

        let end = offset.checked_add(len).unwrap_or(u64::MAX);
        if end > self.file_len {
            return Err(CodecError::Truncated {
                expected: end,
                actual: self.file_len,
            }
            .into());
        }

        let mut guard = self.reader.lock();
        let reader = guard.as_mut().ok_or(LifecycleError::Closed)?;
        reader.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len as usize];
        reader.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn resolve(&self, record: &IndexRecord) -> Result<ResolvedCompression> {
        let from_index = ResolvedCompression {
            code: record.compression.code(),
            stored_size: record.stored_size,
            source: CompressionSource::Index,
        };

        if record.key.type_id == COMPRESSION_DIRECTORY_TYPE {
            return Ok(ResolvedCompression {
                code: CompressionKind::None.code(),
                ..from_index
            });
        }

        let consult =
            self.index.directory_position().is_some() || record.compression.is_ambiguous();
        if !consult {
            return Ok(from_index);
        }

        let directory = self.compression_directory()?;
        Ok(match directory.get(&record.key) {
            Some(entry) => ResolvedCompression {
                code: entry.code,
                stored_size: entry.compressed_size,
                source: CompressionSource::Directory,
            },
            None => from_index,
        })
    }

    #[instrument(skip(self, record), fields(key = %record.key), err)]
    fn extract(&self, record: &IndexRecord) -> Result<Vec<u8>> {
        self.ensure_open()?;

        let resolved = self.resolve(record)?;
        let kind = resolved.kind()?;
        if let (IndexedCompression::Declared(code), CompressionSource::Directory) =
            (record.compression, resolved.source)
        {
            if code != resolved.code {
                debug!(
                    index = code,
                    directory = resolved.code,
                    "compression directory overrides index"
                );
            }
        }

        let stored = self.read_range(record.offset, resolved.stored_size)?;
        let data = compression::decode_bounded(
            &stored,
            kind,
            record.uncompressed_size,
            self.options.max_resource_size,
        )?;

        debug!(%kind, stored = stored.len(), decoded = data.len(), "extracted resource");
        Ok(data)
    }
}

/// Iterator over the resources of a package in on-disk order
pub struct Resources<'a, R> {
    package: &'a Package<R>,
    range: Range<usize>,
}

impl<R> Clone for Resources<'_, R> {
    fn clone(&self) -> Self {
        Self {
            package: self.package,
            range: self.range.clone(),
        }
    }
}

impl<'a, R: Read + Seek> Iterator for Resources<'a, R> {
    type Item = ResourceHandle<'a, R>;

    fn next(&mut self) -> Option<Self::Item> {
        self.range.next().map(|position| self.package.handle(position))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.range.size_hint()
    }
}

impl<R: Read + Seek> DoubleEndedIterator for Resources<'_, R> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.range
            .next_back()
            .map(|position| self.package.handle(position))
    }
}

impl<R: Read + Seek> ExactSizeIterator for Resources<'_, R> {}

/// A resource inside a package
///
/// Handles are cheap views onto an index record. Extraction reads only this resource's
/// bytes and never changes the package or other handles.
pub struct ResourceHandle<'a, R> {
    package: &'a Package<R>,
    position: usize,
    record: &'a IndexRecord,
}

impl<R> Clone for ResourceHandle<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for ResourceHandle<'_, R> {}

impl<R> Debug for ResourceHandle<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ResourceHandle({:#?})", self.record)
    }
}

/// Methods for retrieving information on package resources
impl<'a, R: Read + Seek> ResourceHandle<'a, R> {
    pub fn key(&self) -> ResourceKey {
        self.record.key
    }

    pub fn type_id(&self) -> u32 {
        self.record.key.type_id
    }

    pub fn group_id(&self) -> u32 {
        self.record.key.group_id
    }

    pub fn instance_id(&self) -> u64 {
        self.record.key.instance_id
    }

    /// Human readable type name, `Unknown_XXXXXXXX` for unregistered types
    pub fn type_name(&self) -> Cow<'static, str> {
        registry::type_name(self.record.key.type_id)
    }

    /// Position of this record in the index
    pub fn position(&self) -> usize {
        self.position
    }

    /// Get the starting offset of the data of the resource
    pub fn offset(&self) -> u64 {
        self.record.offset
    }

    /// Get the size of the resource, in bytes, in the package as the index states it
    pub fn stored_size(&self) -> u32 {
        self.record.stored_size
    }

    /// Get the size of the resource, in bytes, when decoded, if the index records it
    pub fn uncompressed_size(&self) -> Option<u32> {
        self.record.uncompressed_size
    }

    /// Compression as stated by the primary index
    pub fn indexed_compression(&self) -> IndexedCompression {
        self.record.compression
    }

    /// The index record backing this handle
    pub fn record(&self) -> &'a IndexRecord {
        self.record
    }

    /// Compression data after consulting the compression directory
    pub fn resolved_compression(&self) -> Result<ResolvedCompression> {
        self.package.ensure_open()?;
        self.package.resolve(self.record)
    }

    /// The decoder that [`ResourceHandle::extract`] will use
    pub fn compression_kind(&self) -> Result<CompressionKind> {
        Ok(self.resolved_compression()?.kind()?)
    }

    /// Read and decode this resource
    pub fn extract(&self) -> Result<Vec<u8>> {
        self.package.extract(self.record)
    }

    /// Decode this resource into `writer`, returning the number of bytes written
    pub fn extract_to<W: Write>(&self, writer: &mut W) -> Result<u64> {
        let data = self.extract()?;
        writer.write_all(&data)?;
        Ok(data.len() as u64)
    }
}

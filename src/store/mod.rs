//! Read store
//!
//! A store is a directory holding:
//!
//! ```text
//! info          StoreInfo header: magic, version, layout fingerprints, counts
//! libraries     Library records, library ID n at position n - 1
//! reads         Read records, read ID n at position n - 1
//! blobs.NNNN    size-capped payload files (see [`blob`])
//! partitions/   optional partition data (see [`partition`])
//! ```
//!
//! Metadata tables are loaded into memory whole when a store is opened. Payloads are read
//! lazily through blob readers, except in partitioned mode, where the payloads of the
//! assigned partition are loaded up front.

mod blob;
mod info;
mod library;
mod partition;
mod read;

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read as IoRead, Write};
use std::path::{Path, PathBuf};

use bytemuck::Pod;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;
use parking_lot::Mutex;

pub use blob::{BlobReader, BlobRef, BlobWriter, BLOB_MAGIC};
pub use info::{StoreInfo, SIZE_INFO};
pub use library::{Library, LibraryId, LIBRARY_DEFAULT_HASH, LIBRARY_DEFAULT_REF};
pub use partition::{PartitionIndex, PartitionMap, PartitionSlot, PARTITION_MAGIC};
pub use read::{Read, ReadData, ReadId, Stage};

use crate::error::{FormatError, Result, StoreError};
use partition::LoadedPartition;

/// Magic number opening the info header
pub const STORE_MAGIC: &[u8; 8] = b"RDSTORE:";

/// On-disk format version
pub const STORE_VERSION: u64 = 1;

/// Bits available for library IDs
pub const MAX_LIBRARIES_BITS: u32 = 6;

/// Largest library ID
pub const MAX_LIBRARIES: u32 = (1 << MAX_LIBRARIES_BITS) - 1;

/// Bytes reserved for a library name, including the terminating NUL
pub const LIBRARY_NAME_SIZE: usize = 128;

/// Bits available for a read length
pub const MAX_READ_LEN_BITS: u32 = 21;

/// Longest storable read, in bases
pub const MAX_READ_LEN: u32 = (1 << MAX_READ_LEN_BITS) - 1;

/// Largest read ID
pub const MAX_READS: u32 = u32::MAX;

/// Default size cap of one blob file
pub const DEFAULT_BLOB_FILE_MAX_SIZE: u64 = 1024 * 1024 * 1024;

const INFO_FILE: &str = "info";
const LIBRARIES_FILE: &str = "libraries";
const READS_FILE: &str = "reads";

/// How a store is opened
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStoreMode {
    /// Create a new store; fails if store files exist already
    Create,
    /// Modify an existing store, appending new libraries, reads and payloads
    Extend,
    /// Read an existing store; nothing may be modified
    ReadOnly,
    /// Read an existing store in order to build its partitions
    BuildPartitions,
}
impl ReadStoreMode {
    fn is_writable(self) -> bool {
        matches!(self, Self::Create | Self::Extend)
    }
}
impl fmt::Display for ReadStoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Extend => "extend",
            Self::ReadOnly => "read-only",
            Self::BuildPartitions => "build-partitions",
        };
        f.write_str(name)
    }
}

/// Tunables applied when a store is opened
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    blob_file_max_size: u64,
}
impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            blob_file_max_size: DEFAULT_BLOB_FILE_MAX_SIZE,
        }
    }
}
impl StoreOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the size at which the blob writer starts a new blob file
    #[must_use]
    pub fn blob_file_max_size(mut self, bytes: u64) -> Self {
        self.blob_file_max_size = bytes.max(1);
        self
    }
}

/// Loads a table of fixed-size records, checking it holds exactly `count` of them
pub(crate) fn load_table<T: Pod>(path: &Path, count: usize, table: &'static str) -> Result<Vec<T>> {
    let file = File::open(path)?;
    let found = file.metadata()?.len() as usize;
    let expected = count * size_of::<T>();
    if found != expected {
        return Err(FormatError::TableTruncation {
            table,
            found,
            expected,
        }
        .into());
    }
    if count == 0 {
        return Ok(Vec::new());
    }

    // Safety: store tables are only rewritten through a rename, never in place
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(mmap
        .chunks_exact(size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

/// `<path>.tmp`, where a new version of `path` is written before it replaces the old one
fn staged_path(path: &Path) -> PathBuf {
    let mut staged = path.as_os_str().to_owned();
    staged.push(".tmp");
    PathBuf::from(staged)
}

/// Writes `bytes` to the staged path of `path` and syncs it to disk
fn write_staged(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(staged_path(path))?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Replaces `path` with `bytes` through a temporary file and a rename
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    write_staged(path, bytes)?;
    fs::rename(staged_path(path), path)?;
    Ok(())
}

/// Moves staged metadata files of the store in `dir` into place, header last.
///
/// Files with nothing staged are skipped, so an interrupted commit can be repeated.
fn commit_staged(dir: &Path) -> Result<()> {
    for name in [LIBRARIES_FILE, READS_FILE, INFO_FILE] {
        let path = dir.join(name);
        match fs::rename(staged_path(&path), &path) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            other => other?,
        }
    }
    Ok(())
}

/// Settles a metadata commit that was interrupted before all renames completed.
///
/// The staged header is only written once both staged tables are synced, so a staged header
/// means the whole commit is on disk and is rolled forward. Without one the committed files
/// are still consistent, and writable handles discard the leftover staged tables.
fn recover_staged(dir: &Path, mode: ReadStoreMode) -> Result<()> {
    if staged_path(&dir.join(INFO_FILE)).is_file() {
        tracing::warn!(
            "completing interrupted metadata commit in {}",
            dir.display()
        );
        return commit_staged(dir);
    }
    if mode.is_writable() {
        for name in [LIBRARIES_FILE, READS_FILE] {
            let staged = staged_path(&dir.join(name));
            if staged.is_file() {
                tracing::warn!("discarding incomplete staged table {}", staged.display());
                fs::remove_file(staged)?;
            }
        }
    }
    Ok(())
}

pub(crate) fn write_table<T: Pod>(path: &Path, records: &[T]) -> Result<()> {
    write_atomic(path, bytemuck::cast_slice(records))
}

/// A read store opened in one [`ReadStoreMode`].
///
/// The handle owns the in-core library and read tables, the store's single blob writer,
/// and a convenience blob reader. Callers that load payloads from several threads should
/// take their own reader with [`ReadStore::blob_reader`].
///
/// Call [`ReadStore::close`] to persist changes. `close` consumes the handle, so a store
/// cannot be closed twice; a store dropped without being closed is closed best-effort and
/// a warning is logged.
///
/// # Examples
///
/// ```no_run
/// use readstore::{ReadStore, ReadStoreMode, Stage, Result};
///
/// fn main() -> Result<()> {
///     let mut store = ReadStore::open("reads.store", ReadStoreMode::Create)?;
///     let library = store.add_empty_library("pacbio")?.id();
///     let mut data = store.add_empty_read(library)?;
///     data.set_payload(Stage::Raw, 4, b"ACGT");
///     store.stash_read_data(&data)?;
///     store.close()
/// }
/// ```
pub struct ReadStore {
    path: PathBuf,
    mode: ReadStoreMode,
    info: StoreInfo,

    libraries: Vec<Library>,
    reads: Vec<Read>,

    writer: Option<BlobWriter>,
    reader: Mutex<BlobReader>,

    /// Present when the store was opened for a single partition
    partition: Option<LoadedPartition>,

    /// Set once partition data built from the old read table has been removed
    partitions_dropped: bool,

    closed: bool,
}

impl ReadStore {
    /// Opens the store at `path` with default options
    pub fn open<P: AsRef<Path>>(path: P, mode: ReadStoreMode) -> Result<Self> {
        Self::open_with(path, mode, StoreOptions::default())
    }

    /// Opens the store at `path`.
    ///
    /// # Errors
    ///
    /// * [`StoreError::AlreadyExists`] in create mode if `path` is a file or a directory
    ///   holding any files
    /// * [`StoreError::NotFound`] in any other mode if there is no info header
    /// * [`FormatError`] if the header or a table fails validation
    pub fn open_with<P: AsRef<Path>>(
        path: P,
        mode: ReadStoreMode,
        options: StoreOptions,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let (info, libraries, reads) = if mode == ReadStoreMode::Create {
            if path.is_file() || (path.is_dir() && fs::read_dir(&path)?.next().is_some()) {
                return Err(StoreError::AlreadyExists(path).into());
            }
            fs::create_dir_all(&path)?;
            (StoreInfo::default(), Vec::new(), Vec::new())
        } else {
            Self::load_metadata(&path, mode)?
        };

        let writer = if mode.is_writable() {
            Some(BlobWriter::new(&path, options.blob_file_max_size)?)
        } else {
            None
        };

        tracing::debug!(
            "opened read store {} ({mode}): {} libraries, {} reads",
            path.display(),
            info.num_libraries(),
            info.num_reads()
        );

        Ok(Self {
            reader: Mutex::new(BlobReader::new(&path)),
            path,
            mode,
            info,
            libraries,
            reads,
            writer,
            partition: None,
            partitions_dropped: false,
            closed: false,
        })
    }

    /// Opens the store read-only for a single partition.
    ///
    /// All payloads of the partition are loaded into memory; payloads of reads outside the
    /// partition cannot be loaded through this handle.
    pub fn open_partition<P: AsRef<Path>>(path: P, partition: u32) -> Result<Self> {
        let mut store = Self::open(path, ReadStoreMode::ReadOnly)?;
        let loaded = LoadedPartition::load(&store.path, partition, &mut store.reads)?;
        store.partition = Some(loaded);
        Ok(store)
    }

    fn load_metadata(
        path: &Path,
        mode: ReadStoreMode,
    ) -> Result<(StoreInfo, Vec<Library>, Vec<Read>)> {
        if path.is_dir() {
            recover_staged(path, mode)?;
        }
        let info_path = path.join(INFO_FILE);
        if !info_path.is_file() {
            return Err(StoreError::NotFound(path.to_path_buf()).into());
        }
        let info = StoreInfo::from_bytes(&fs::read(info_path)?)?;

        let libraries: Vec<Library> = load_table(
            &path.join(LIBRARIES_FILE),
            info.num_libraries() as usize,
            "libraries",
        )?;
        for (pos, library) in (1..).zip(&libraries) {
            if library.raw_id() != pos {
                return Err(FormatError::LibraryIdMismatch {
                    expected: pos,
                    found: library.raw_id(),
                }
                .into());
            }
        }

        let reads: Vec<Read> =
            load_table(&path.join(READS_FILE), info.num_reads() as usize, "reads")?;
        for (pos, read) in (1..).zip(&reads) {
            if read.raw_id() != pos {
                return Err(FormatError::ReadIdMismatch {
                    expected: pos,
                    found: read.raw_id(),
                }
                .into());
            }
            if !(1..=info.num_libraries()).contains(&read.library_id()) {
                return Err(FormatError::InvalidLibraryReference {
                    read: pos,
                    library: read.library_id(),
                    num_libraries: info.num_libraries(),
                }
                .into());
            }
        }

        Ok((info, libraries, reads))
    }

    /// Flushes payloads and, in create and extend modes, persists the tables and header.
    ///
    /// The library table, read table and header are first written to staged files and synced,
    /// header last, and only then renamed into place. A crash during the renames leaves a
    /// staged header behind, and the next open completes the commit before loading.
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        self.closed = true;
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        if self.mode.is_writable() {
            self.stage_metadata()?;
            commit_staged(&self.path)?;
        }
        tracing::debug!("closed read store {}", self.path.display());
        Ok(())
    }

    fn stage_metadata(&self) -> Result<()> {
        write_staged(
            &self.path.join(LIBRARIES_FILE),
            bytemuck::cast_slice(&self.libraries),
        )?;
        write_staged(&self.path.join(READS_FILE), bytemuck::cast_slice(&self.reads))?;
        write_staged(&self.path.join(INFO_FILE), self.info.as_bytes())
    }

    /// Deletes the store at `path`: blob files, partitions and metadata, then the directory
    /// itself if nothing else is left in it.
    ///
    /// The header is removed last, so a delete that fails part way can be repeated.
    pub fn delete<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let info_path = path.join(INFO_FILE);
        if !info_path.is_file() {
            return Err(StoreError::NotFound(path.to_path_buf()).into());
        }
        partition::remove(path)?;
        for file in blob::blob_files(path)? {
            fs::remove_file(file)?;
        }
        for name in [LIBRARIES_FILE, READS_FILE, INFO_FILE] {
            let staged = staged_path(&path.join(name));
            if staged.is_file() {
                fs::remove_file(staged)?;
            }
        }
        for name in [LIBRARIES_FILE, READS_FILE] {
            let table = path.join(name);
            if table.is_file() {
                fs::remove_file(table)?;
            }
        }
        fs::remove_file(info_path)?;
        if fs::read_dir(path)?.next().is_none() {
            fs::remove_dir(path)?;
        }
        tracing::info!("deleted read store {}", path.display());
        Ok(())
    }

    fn require_writable(&self, operation: &'static str) -> Result<()> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(StoreError::InvalidMode {
                operation,
                mode: self.mode,
            }
            .into())
        }
    }

    /// Removes existing partitions before the first change to the read table.
    ///
    /// Partitions carry their own copies of read records and payloads, which would otherwise
    /// keep serving the old contents.
    fn drop_stale_partitions(&mut self) -> Result<()> {
        if self.partitions_dropped {
            return Ok(());
        }
        if partition::partition_dir(&self.path).exists() {
            tracing::info!(
                "read table of {} is changing; removing its partitions",
                self.path.display()
            );
        }
        partition::remove(&self.path)?;
        self.partitions_dropped = true;
        Ok(())
    }

    fn read_index(&self, id: ReadId) -> Result<usize> {
        if id.get() > self.info.num_reads() {
            return Err(StoreError::OutOfRange {
                requested: id.get(),
                num_reads: self.info.num_reads(),
            }
            .into());
        }
        Ok(id.index())
    }

    fn library_of(&self, read: &Read) -> Result<LibraryId> {
        LibraryId::new(read.library_id())
            .filter(|id| id.get() <= self.info.num_libraries())
            .ok_or_else(|| {
                StoreError::InvalidLibrary {
                    library: read.library_id(),
                    num_libraries: self.info.num_libraries(),
                }
                .into()
            })
    }

    fn library_index(&self, id: LibraryId) -> Result<usize> {
        if id.get() > self.info.num_libraries() {
            return Err(StoreError::InvalidLibrary {
                library: id.get(),
                num_libraries: self.info.num_libraries(),
            }
            .into());
        }
        Ok(id.index())
    }
}

/// Accessors
impl ReadStore {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
    #[must_use]
    pub fn mode(&self) -> ReadStoreMode {
        self.mode
    }
    #[must_use]
    pub fn info(&self) -> &StoreInfo {
        &self.info
    }
    #[must_use]
    pub fn num_libraries(&self) -> u32 {
        self.info.num_libraries()
    }
    #[must_use]
    pub fn num_reads(&self) -> u32 {
        self.info.num_reads()
    }
    #[must_use]
    pub fn libraries(&self) -> &[Library] {
        &self.libraries
    }
    #[must_use]
    pub fn reads(&self) -> &[Read] {
        &self.reads
    }

    /// The partition this store was opened for, if any
    #[must_use]
    pub fn partition(&self) -> Option<u32> {
        self.partition.as_ref().map(|p| p.id)
    }

    pub fn library(&self, id: LibraryId) -> Result<&Library> {
        let idx = self.library_index(id)?;
        Ok(&self.libraries[idx])
    }

    /// Mutable access to a library, for renaming or changing its role flags
    pub fn library_mut(&mut self, id: LibraryId) -> Result<&mut Library> {
        self.require_writable("library_mut")?;
        let idx = self.library_index(id)?;
        Ok(&mut self.libraries[idx])
    }

    /// Returns the in-core record of read `id`
    pub fn get_read(&self, id: ReadId) -> Result<&Read> {
        let idx = self.read_index(id)?;
        Ok(&self.reads[idx])
    }

    /// True if `id` is served by this store: always when unpartitioned, otherwise only for
    /// reads of the partition the store was opened for
    #[must_use]
    pub fn read_in_partition(&self, id: ReadId) -> bool {
        self.partition.as_ref().is_none_or(|p| p.contains(id))
    }
}

/// Payload access
impl ReadStore {
    /// Creates an independent blob reader for one caller
    #[must_use]
    pub fn blob_reader(&self) -> BlobReader {
        BlobReader::new(&self.path)
    }

    /// Loads the active payload of read `id` into `out`.
    ///
    /// Unpartitioned stores read through the store's shared reader.
    pub fn load_read_data(&self, id: ReadId, out: &mut ReadData) -> Result<()> {
        let stage = self.get_read(id)?.active_stage().unwrap_or(Stage::Raw);
        self.load_stage_data(id, stage, out)
    }

    /// Loads the active payload of read `id` into `out` using the caller's own reader
    pub fn load_read_data_with(
        &self,
        reader: &mut BlobReader,
        id: ReadId,
        out: &mut ReadData,
    ) -> Result<()> {
        let stage = self.get_read(id)?.active_stage().unwrap_or(Stage::Raw);
        if let Some(blob) = self.prepare_load(id, stage, out)? {
            reader.read(blob, out.payload_mut())?;
        }
        Ok(())
    }

    /// Loads the payload of read `id` at a specific refinement stage
    pub fn load_stage_data(&self, id: ReadId, stage: Stage, out: &mut ReadData) -> Result<()> {
        if let Some(blob) = self.prepare_load(id, stage, out)? {
            self.reader.lock().read(blob, out.payload_mut())?;
        }
        Ok(())
    }

    /// Resets `out` for `stage` of read `id`, filling it from the loaded partition if there is
    /// one. Returns the blob still to be read from the blob files.
    fn prepare_load(
        &self,
        id: ReadId,
        stage: Stage,
        out: &mut ReadData,
    ) -> Result<Option<BlobRef>> {
        let read = self.get_read(id)?;
        let library = self.library_of(read)?;
        let length = read.stage_length(stage);
        out.reset(id, library, stage, length);

        let Some(blob) = read.blob(stage) else {
            if length > 0 {
                return Err(StoreError::MissingBlob {
                    read: id.get(),
                    stage,
                }
                .into());
            }
            return Ok(None);
        };

        match &self.partition {
            Some(partition) if !partition.contains(id) => Err(StoreError::NotInPartition {
                read: id.get(),
                partition: partition.id,
            }
            .into()),
            Some(partition) => {
                blob::frame_in_slice(&partition.blobs, blob, out.payload_mut())?;
                Ok(None)
            }
            None => Ok(Some(blob)),
        }
    }
}

/// Mutation
impl ReadStore {
    /// Appends a new, empty library
    ///
    /// # Errors
    ///
    /// * [`StoreError::CapacityExceeded`] if the library ID bit budget is exhausted
    pub fn add_empty_library(&mut self, name: &str) -> Result<&mut Library> {
        self.require_writable("add_empty_library")?;
        let next = self.info.num_libraries() + 1;
        let Some(id) = LibraryId::new(next) else {
            return Err(StoreError::CapacityExceeded {
                what: "library id",
                requested: u64::from(next),
                limit: u64::from(MAX_LIBRARIES),
            }
            .into());
        };
        self.libraries.push(Library::new(id, name));
        self.info.add_library();
        Ok(&mut self.libraries[id.index()])
    }

    /// Appends a new, empty read to `library` and returns a payload buffer for it
    pub fn add_empty_read(&mut self, library: LibraryId) -> Result<ReadData> {
        self.require_writable("add_empty_read")?;
        self.library_index(library)?;
        let num_reads = self.info.num_reads();
        let Some(id) = num_reads.checked_add(1).and_then(ReadId::new) else {
            return Err(StoreError::CapacityExceeded {
                what: "read id",
                requested: u64::from(num_reads) + 1,
                limit: u64::from(MAX_READS),
            }
            .into());
        };
        self.drop_stale_partitions()?;
        self.reads.push(Read::new(id, library));
        self.info.add_read();
        Ok(ReadData::new(id, library))
    }

    /// Writes `data`'s payload as a new blob and points its read at it.
    ///
    /// The previous payload of the same stage, if any, becomes unreachable. Refinement
    /// counters are bumped only the first time a stage appears on a read. Existing
    /// partitions are removed, as they no longer match the read table.
    pub fn stash_read_data(&mut self, data: &ReadData) -> Result<()> {
        self.require_writable("stash_read_data")?;
        let idx = self.read_index(data.id())?;
        if data.length() > MAX_READ_LEN {
            return Err(StoreError::CapacityExceeded {
                what: "read length",
                requested: u64::from(data.length()),
                limit: u64::from(MAX_READ_LEN),
            }
            .into());
        }
        self.drop_stale_partitions()?;
        let Some(writer) = self.writer.as_mut() else {
            return Err(StoreError::InvalidMode {
                operation: "stash_read_data",
                mode: self.mode,
            }
            .into());
        };

        let blob = writer.write(data.payload())?;
        let read = &mut self.reads[idx];
        let first = read.stage_length(data.stage()) == 0;
        read.set_stage(data.stage(), data.length(), blob);
        if first && data.length() > 0 {
            self.info.add_stage(data.stage(), data.length());
        }
        Ok(())
    }

    /// Sets the clear range of read `id` within its active sequence
    pub fn set_clear_range(&mut self, id: ReadId, begin: u32, end: u32) -> Result<()> {
        self.require_writable("set_clear_range")?;
        let idx = self.read_index(id)?;
        let length = self.reads[idx].sequence_length();
        if begin > end || end > length {
            return Err(StoreError::InvalidRange {
                read: id.get(),
                begin,
                end,
                length,
            }
            .into());
        }
        self.drop_stale_partitions()?;
        self.reads[idx].set_clear_range(begin, end);
        Ok(())
    }

    /// Recomputes the refinement counters from the read table
    pub fn recount_reads(&mut self) -> Result<()> {
        self.require_writable("recount_reads")?;
        self.info.recount(&self.reads);
        Ok(())
    }
}

/// Partitioning
impl ReadStore {
    /// Writes per-partition read tables, payload files and the partition index.
    ///
    /// Only valid in [`ReadStoreMode::BuildPartitions`]. The map is validated in full before
    /// anything is written, and the new partitions replace any old ones only once complete.
    pub fn build_partitions(&mut self, map: &PartitionMap) -> Result<()> {
        if self.mode != ReadStoreMode::BuildPartitions {
            return Err(StoreError::InvalidMode {
                operation: "build_partitions",
                mode: self.mode,
            }
            .into());
        }
        let index = PartitionIndex::from_map(map, self.info.num_reads())?;
        let mut reader = self.reader.lock();
        partition::build(&self.path, &self.reads, &mut reader, &index)?;
        tracing::info!(
            "built {} partitions over {} reads in {}",
            index.num_partitions(),
            index.num_reads(),
            self.path.display()
        );
        Ok(())
    }

    /// Removes the store's partition data
    pub fn delete_partitions(&mut self) -> Result<()> {
        if !matches!(
            self.mode,
            ReadStoreMode::Extend | ReadStoreMode::BuildPartitions
        ) {
            return Err(StoreError::InvalidMode {
                operation: "delete_partitions",
                mode: self.mode,
            }
            .into());
        }
        partition::remove(&self.path)
    }
}

/// Read packages: one read's metadata and active payload, serialised to a stream.
///
/// ```text
/// [Read record][stage: u32 LE][blob frame]
/// ```
impl ReadStore {
    pub fn write_read_package<W: Write>(&self, id: ReadId, writer: &mut W) -> Result<()> {
        let read = self.get_read(id)?;
        let mut data = ReadData::new(id, self.library_of(read)?);
        self.load_read_data(id, &mut data)?;
        writer.write_all(bytemuck::bytes_of(read))?;
        writer.write_u32::<LittleEndian>(data.stage().as_slot())?;
        blob::write_frame(writer, data.payload())?;
        Ok(())
    }

    /// Restores a read package written by [`ReadStore::write_read_package`]
    pub fn read_package<R: IoRead>(reader: &mut R) -> Result<(Read, ReadData)> {
        let mut record = [0u8; size_of::<Read>()];
        reader.read_exact(&mut record)?;
        let read: Read = bytemuck::pod_read_unaligned(&record);

        let slot = reader.read_u32::<LittleEndian>()?;
        let stage = Stage::from_slot(slot).ok_or_else(|| invalid_package(&format!("stage {slot}")))?;
        let id = ReadId::new(read.raw_id()).ok_or_else(|| invalid_package("read id 0"))?;
        let library = LibraryId::new(read.library_id())
            .ok_or_else(|| invalid_package(&format!("library {}", read.library_id())))?;

        let expected = BlobRef::new(0, 0, read.blob(stage).map_or(0, |b| b.len()));
        let mut data = ReadData::new(id, library);
        data.reset(id, library, stage, read.stage_length(stage));
        blob::read_frame(reader, expected, data.payload_mut())?;
        Ok((read, data))
    }
}

fn invalid_package(what: &str) -> crate::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("invalid read package: {what}")).into()
}

impl Drop for ReadStore {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        tracing::warn!(
            "read store {} dropped without close; closing now",
            self.path.display()
        );
        if let Err(err) = self.finish() {
            tracing::warn!("failed to close read store {}: {err}", self.path.display());
        }
    }
}

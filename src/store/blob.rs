//! Blob storage layer
//!
//! Variable-length read payloads live in append-only blob files next to the fixed-size
//! tables. Each payload is written as a frame:
//!
//! ```text
//! [magic "BLOB": 4 bytes][payload length: u32 LE][payload]
//! ```
//!
//! Blob files are capped in size. A frame that would cross the cap starts a new file
//! rather than being split, so a single oversized frame may still exceed the cap on its own.
//!
//! There is exactly one [`BlobWriter`] per store. [`BlobReader`]s hold their own file
//! handles and are intended to be owned by one caller each.

use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read as IoRead, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{FormatError, Result, StoreError};

/// Magic bytes opening every blob frame
pub const BLOB_MAGIC: &[u8; 4] = b"BLOB";

/// Bytes preceding the payload in a blob frame
pub const SIZE_FRAME_HEADER: u64 = 8;

const BLOB_FILE_PREFIX: &str = "blobs.";

/// Location of one payload: blob file, frame offset and payload length.
///
/// A reference with `file_id == 0` points nowhere. This is stored identically in memory
/// and on disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct BlobRef {
    file_id: u32,
    length: u32,
    offset: u64,
}
impl BlobRef {
    #[must_use]
    pub fn new(file_id: u32, offset: u64, length: u32) -> Self {
        Self {
            file_id,
            length,
            offset,
        }
    }
    #[must_use]
    pub fn file_id(&self) -> u32 {
        self.file_id
    }
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }
    /// Payload length in bytes, excluding the frame header
    #[must_use]
    pub fn len(&self) -> u32 {
        self.length
    }
    /// True if this reference points at no blob
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.file_id == 0
    }
}

/// Path of blob file `file_id` inside `dir`
pub(crate) fn blob_path(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{BLOB_FILE_PREFIX}{file_id:04}"))
}

fn blob_file_id(name: &OsStr) -> Option<u32> {
    name.to_str()
        .and_then(|name| name.strip_prefix(BLOB_FILE_PREFIX))
        .and_then(|id| id.parse::<u32>().ok())
}

/// Highest-numbered blob file present in `dir`, if any
fn last_blob_file(dir: &Path) -> Result<Option<u32>> {
    let mut last = None;
    for entry in fs::read_dir(dir)? {
        last = last.max(blob_file_id(&entry?.file_name()));
    }
    Ok(last)
}

/// Paths of every blob file in `dir`
pub(crate) fn blob_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if blob_file_id(&entry.file_name()).is_some() {
            files.push(entry.path());
        }
    }
    Ok(files)
}

/// Writes one frame, returning the number of bytes it occupies
pub(crate) fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<u64> {
    let length = u32::try_from(payload.len()).map_err(|_| StoreError::CapacityExceeded {
        what: "blob length",
        requested: payload.len() as u64,
        limit: u64::from(u32::MAX),
    })?;
    writer.write_all(BLOB_MAGIC)?;
    writer.write_u32::<LittleEndian>(length)?;
    writer.write_all(payload)?;
    Ok(SIZE_FRAME_HEADER + payload.len() as u64)
}

/// Reads the frame `blob` points at from a stream positioned at the frame start
pub(crate) fn read_frame<R: IoRead>(reader: &mut R, blob: BlobRef, dst: &mut Vec<u8>) -> Result<()> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != *BLOB_MAGIC {
        return Err(FormatError::InvalidBlobMagic {
            file_id: blob.file_id,
            offset: blob.offset,
        }
        .into());
    }
    let length = reader.read_u32::<LittleEndian>()?;
    if length != blob.length {
        return Err(FormatError::BlobLengthMismatch {
            offset: blob.offset,
            found: length,
            expected: blob.length,
        }
        .into());
    }
    let start = dst.len();
    dst.resize(start + length as usize, 0);
    reader.read_exact(&mut dst[start..])?;
    Ok(())
}

/// Resolves the frame `blob` points at inside an in-core buffer
pub(crate) fn frame_in_slice(bytes: &[u8], blob: BlobRef, dst: &mut Vec<u8>) -> Result<()> {
    let offset = blob.offset as usize;
    let frame = bytes.get(offset..).unwrap_or_default();
    let mut cursor = frame;
    read_frame(&mut cursor, blob, dst)
}

/// The single writer appending frames to a store's blob files
pub struct BlobWriter {
    dir: PathBuf,

    /// Size cap per blob file
    max_file_size: u64,

    /// Current file, zero before the first file is opened
    file_id: u32,

    /// Bytes already in the current file
    size: u64,

    inner: Option<BufWriter<File>>,
}
impl BlobWriter {
    /// Creates a writer appending after the last existing blob file in `dir`
    pub fn new(dir: &Path, max_file_size: u64) -> Result<Self> {
        let (file_id, size) = match last_blob_file(dir)? {
            Some(id) => (id, fs::metadata(blob_path(dir, id))?.len()),
            None => (0, 0),
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            max_file_size,
            file_id,
            size,
            inner: None,
        })
    }

    /// Appends `payload` as a new frame and returns its reference.
    ///
    /// The frame is flushed before returning so readers can resolve it immediately.
    pub fn write(&mut self, payload: &[u8]) -> Result<BlobRef> {
        let frame = SIZE_FRAME_HEADER + payload.len() as u64;
        if self.file_id == 0 || (self.size > 0 && self.size + frame > self.max_file_size) {
            self.roll()?;
        }
        let inner = match &mut self.inner {
            Some(inner) => inner,
            slot @ None => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(blob_path(&self.dir, self.file_id))?;
                slot.insert(BufWriter::new(file))
            }
        };

        let blob = BlobRef::new(self.file_id, self.size, payload.len() as u32);
        self.size += write_frame(inner, payload)?;
        inner.flush()?;
        Ok(blob)
    }

    /// Starts the next blob file
    fn roll(&mut self) -> Result<()> {
        self.flush()?;
        self.inner = None;
        self.file_id += 1;
        self.size = 0;
        tracing::debug!("starting blob file {}", self.file_id);
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(inner) = self.inner.as_mut() {
            inner.flush()?;
        }
        Ok(())
    }

    /// Number of the blob file currently being appended to
    #[must_use]
    pub fn current_file(&self) -> u32 {
        self.file_id
    }
}

/// An independent reader over a store's blob files.
///
/// Holds its own lazily opened file handles. A reader is `Send` but meant to be owned by a
/// single caller; concurrent callers each take their own.
pub struct BlobReader {
    dir: PathBuf,
    files: Vec<Option<BufReader<File>>>,
}
impl BlobReader {
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            files: Vec::new(),
        }
    }

    /// Reads the payload `blob` points at, replacing the contents of `dst`
    pub fn read(&mut self, blob: BlobRef, dst: &mut Vec<u8>) -> Result<()> {
        dst.clear();
        let idx = blob.file_id as usize;
        if self.files.len() <= idx {
            self.files.resize_with(idx + 1, || None);
        }
        let handle = match &mut self.files[idx] {
            Some(handle) => handle,
            slot @ None => {
                let file = File::open(blob_path(&self.dir, blob.file_id))?;
                slot.insert(BufReader::new(file))
            }
        };
        handle.seek(SeekFrom::Start(blob.offset))?;
        read_frame(handle, blob, dst)
    }
}

//! Store partitioning
//!
//! A partitioned store keeps, next to the ordinary tables, a `partitions/` directory:
//!
//! ```text
//! partitions/index        [IndexHeader][reads per partition: u32 x P][PartitionSlot x N]
//! partitions/reads.NNNN   read records of partition NNNN, in local order
//! partitions/blobs.NNNN   every payload of partition NNNN, back to back
//! ```
//!
//! Read records in a partition's table point into that partition's blob file, which a
//! worker loads into memory whole when it opens the store for its partition.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use memmap2::Mmap;

use super::blob::{write_frame, BlobReader, BlobRef};
use super::{load_table, write_table, Read, ReadId, Stage};
use crate::error::{FormatError, PartitionError, Result};

/// Magic number of the partition index file
pub const PARTITION_MAGIC: &[u8; 8] = b"RSPARTIX";

const PARTITION_DIR: &str = "partitions";
const PARTITION_STAGING_DIR: &str = "partitions.building";
const INDEX_FILE: &str = "index";

pub(crate) fn partition_dir(store: &Path) -> PathBuf {
    store.join(PARTITION_DIR)
}

fn reads_path(dir: &Path, partition: u32) -> PathBuf {
    dir.join(format!("reads.{partition:04}"))
}

fn blobs_path(dir: &Path, partition: u32) -> PathBuf {
    dir.join(format!("blobs.{partition:04}"))
}

/// An externally computed assignment of reads to partitions
#[derive(Clone, Debug, Default)]
pub struct PartitionMap {
    num_partitions: u32,

    /// Partition of read `i + 1`
    assignment: Vec<Option<u32>>,
}
impl PartitionMap {
    /// Creates an empty map over `num_partitions` partitions
    #[must_use]
    pub fn new(num_partitions: u32) -> Self {
        Self {
            num_partitions,
            assignment: Vec::new(),
        }
    }

    /// Creates a map where `partitions[i]` is the partition of read `i + 1`
    #[must_use]
    pub fn from_slice(num_partitions: u32, partitions: &[u32]) -> Self {
        Self {
            num_partitions,
            assignment: partitions.iter().copied().map(Some).collect(),
        }
    }

    /// Assigns `read` to `partition`, replacing any earlier assignment
    pub fn assign(&mut self, read: ReadId, partition: u32) {
        let idx = read.index();
        if self.assignment.len() <= idx {
            self.assignment.resize(idx + 1, None);
        }
        self.assignment[idx] = Some(partition);
    }

    #[must_use]
    pub fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    /// Number of read slots the map covers, assigned or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.assignment.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignment.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Zeroable, Pod)]
#[repr(C)]
struct IndexHeader {
    magic: [u8; 8],
    num_partitions: u32,
    num_reads: u32,
}

/// Where a read lives once partitioned.
///
/// This is stored identically in memory and on disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct PartitionSlot {
    pub partition: u32,
    pub local_index: u32,
}

/// Mapping from global read ID to (partition, local index)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionIndex {
    reads_per_partition: Vec<u32>,
    slots: Vec<PartitionSlot>,
}
impl PartitionIndex {
    /// Validates `map` against a store of `num_reads` reads and assigns local indices.
    ///
    /// Every read must be mapped to a partition below the declared partition count.
    pub fn from_map(map: &PartitionMap, num_reads: u32) -> Result<Self> {
        if map.num_partitions == 0 {
            return Err(PartitionError::NoPartitions.into());
        }
        if map.len() > num_reads as usize {
            return Err(PartitionError::MapSizeMismatch {
                found: map.len() as u32,
                expected: num_reads,
            }
            .into());
        }

        let mut reads_per_partition = vec![0u32; map.num_partitions as usize];
        let mut slots = Vec::with_capacity(num_reads as usize);
        for read in 1..=num_reads {
            let Some(partition) = map.assignment.get(read as usize - 1).copied().flatten() else {
                return Err(PartitionError::UnmappedRead(read).into());
            };
            if partition >= map.num_partitions {
                return Err(PartitionError::PartitionOutOfRange {
                    read,
                    partition,
                    num_partitions: map.num_partitions,
                }
                .into());
            }
            let count = &mut reads_per_partition[partition as usize];
            slots.push(PartitionSlot {
                partition,
                local_index: *count,
            });
            *count += 1;
        }

        Ok(Self {
            reads_per_partition,
            slots,
        })
    }

    #[must_use]
    pub fn num_partitions(&self) -> u32 {
        self.reads_per_partition.len() as u32
    }

    #[must_use]
    pub fn num_reads(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Number of reads assigned to `partition`
    #[must_use]
    pub fn reads_in(&self, partition: u32) -> u32 {
        self.reads_per_partition
            .get(partition as usize)
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn slot(&self, read: ReadId) -> Option<PartitionSlot> {
        self.slots.get(read.index()).copied()
    }

    fn write(&self, path: &Path) -> Result<()> {
        let header = IndexHeader {
            magic: *PARTITION_MAGIC,
            num_partitions: self.num_partitions(),
            num_reads: self.num_reads(),
        };
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(bytemuck::bytes_of(&header))?;
        writer.write_all(bytemuck::cast_slice(&self.reads_per_partition))?;
        writer.write_all(bytemuck::cast_slice(&self.slots))?;
        writer.flush()?;
        Ok(())
    }

    fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // Safety: partition data is never modified once built
        let mmap = unsafe { Mmap::map(&file)? };

        let size_header = size_of::<IndexHeader>();
        let Some(header_bytes) = mmap.get(..size_header) else {
            return Err(invalid_index("file shorter than its header"));
        };
        let header: IndexHeader = bytemuck::pod_read_unaligned(header_bytes);
        if header.magic != *PARTITION_MAGIC {
            return Err(invalid_index("bad magic"));
        }

        let counts_len = header.num_partitions as usize * size_of::<u32>();
        let slots_len = header.num_reads as usize * size_of::<PartitionSlot>();
        if mmap.len() != size_header + counts_len + slots_len {
            return Err(FormatError::TableTruncation {
                table: "partition index",
                found: mmap.len(),
                expected: size_header + counts_len + slots_len,
            }
            .into());
        }

        let counts = &mmap[size_header..size_header + counts_len];
        let slots = &mmap[size_header + counts_len..];
        Ok(Self {
            reads_per_partition: counts
                .chunks_exact(size_of::<u32>())
                .map(bytemuck::pod_read_unaligned)
                .collect(),
            slots: slots
                .chunks_exact(size_of::<PartitionSlot>())
                .map(bytemuck::pod_read_unaligned)
                .collect(),
        })
    }
}

fn invalid_index(reason: &str) -> crate::Error {
    FormatError::InvalidPartitionIndex(reason.to_string()).into()
}

/// Writes partition data for `reads` under `store`.
///
/// Everything is staged in a side directory and moved into place only once complete, so a
/// failed build leaves the store as it was.
pub(crate) fn build(
    store: &Path,
    reads: &[Read],
    reader: &mut BlobReader,
    index: &PartitionIndex,
) -> Result<()> {
    let staging = store.join(PARTITION_STAGING_DIR);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    index.write(&staging.join(INDEX_FILE))?;

    let num_partitions = index.num_partitions();
    let mut blob_files = (0..num_partitions)
        .map(|p| Ok(BufWriter::new(File::create(blobs_path(&staging, p))?)))
        .collect::<Result<Vec<_>>>()?;
    let mut blob_sizes = vec![0u64; num_partitions as usize];
    let mut tables: Vec<Vec<Read>> = (0..num_partitions)
        .map(|p| Vec::with_capacity(index.reads_in(p) as usize))
        .collect();

    let mut buf = Vec::new();
    for read in reads {
        let Some(slot) = index.slot(read.id()) else {
            return Err(PartitionError::UnmappedRead(read.raw_id()).into());
        };
        let p = slot.partition as usize;
        let mut local = *read;
        for stage in Stage::ALL {
            let Some(blob) = read.blob(stage) else {
                continue;
            };
            reader.read(blob, &mut buf)?;
            let offset = blob_sizes[p];
            blob_sizes[p] += write_frame(&mut blob_files[p], &buf)?;
            local.set_blob(stage, BlobRef::new(slot.partition + 1, offset, blob.len()));
        }
        tables[p].push(local);
    }

    for (p, (mut blobs, table)) in blob_files.into_iter().zip(tables).enumerate() {
        blobs.flush()?;
        write_table(&reads_path(&staging, p as u32), &table)?;
        tracing::debug!(
            "partition {p}: {} reads, {} blob bytes",
            table.len(),
            blob_sizes[p]
        );
    }

    let target = partition_dir(store);
    if target.exists() {
        fs::remove_dir_all(&target)?;
    }
    fs::rename(&staging, &target)?;
    Ok(())
}

/// The partition a store was opened for, with its payloads held in core
pub(crate) struct LoadedPartition {
    pub(crate) id: u32,
    pub(crate) index: PartitionIndex,
    pub(crate) blobs: Vec<u8>,
}
impl LoadedPartition {
    /// Loads partition `partition` of the store at `store`.
    ///
    /// Records of reads in the partition are replaced in `reads` by their partition copies,
    /// whose blob references point into the in-core buffer.
    pub(crate) fn load(store: &Path, partition: u32, reads: &mut [Read]) -> Result<Self> {
        let dir = partition_dir(store);
        let index_path = dir.join(INDEX_FILE);
        if !index_path.exists() {
            return Err(PartitionError::NotPartitioned(store.to_path_buf()).into());
        }
        let index = PartitionIndex::load(&index_path)?;
        if index.num_reads() as usize != reads.len() {
            return Err(invalid_index(&format!(
                "index covers {} reads, store holds {}",
                index.num_reads(),
                reads.len()
            )));
        }
        if partition >= index.num_partitions() {
            return Err(PartitionError::UnknownPartition {
                partition,
                num_partitions: index.num_partitions(),
            }
            .into());
        }

        let local: Vec<Read> = load_table(
            &reads_path(&dir, partition),
            index.reads_in(partition) as usize,
            "partition reads",
        )?;
        for (local_index, record) in local.into_iter().enumerate() {
            let slot = ReadId::new(record.raw_id()).and_then(|id| index.slot(id));
            match slot {
                Some(slot)
                    if slot.partition == partition && slot.local_index as usize == local_index =>
                {
                    reads[record.id().index()] = record;
                }
                _ => {
                    return Err(invalid_index(&format!(
                        "read {} is misplaced in partition {partition}",
                        record.raw_id()
                    )))
                }
            }
        }

        let blobs = fs::read(blobs_path(&dir, partition))?;
        tracing::debug!(
            "loaded partition {partition}: {} reads, {} blob bytes",
            index.reads_in(partition),
            blobs.len()
        );
        Ok(Self {
            id: partition,
            index,
            blobs,
        })
    }

    /// True if `read` is assigned to this partition
    pub(crate) fn contains(&self, read: ReadId) -> bool {
        self.index
            .slot(read)
            .is_some_and(|slot| slot.partition == self.id)
    }
}

/// Removes any partition data of the store at `store`
pub(crate) fn remove(store: &Path) -> Result<()> {
    for dir in [partition_dir(store), store.join(PARTITION_STAGING_DIR)] {
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn id(raw: u32) -> ReadId {
        ReadId::new(raw).unwrap()
    }

    #[test]
    fn test_index_assigns_local_indices() -> Result<()> {
        let map = PartitionMap::from_slice(2, &[0, 1, 0, 1, 1]);
        let index = PartitionIndex::from_map(&map, 5)?;
        assert_eq!(index.num_partitions(), 2);
        assert_eq!(index.reads_in(0), 2);
        assert_eq!(index.reads_in(1), 3);
        assert_eq!(index.reads_in(7), 0);
        assert_eq!(
            index.slot(id(4)),
            Some(PartitionSlot {
                partition: 1,
                local_index: 1
            })
        );
        assert_eq!(index.slot(id(3)).map(|s| s.local_index), Some(1));
        Ok(())
    }

    #[test]
    fn test_index_rejects_unmapped_read() {
        let mut map = PartitionMap::new(2);
        map.assign(id(1), 0);
        map.assign(id(3), 1);
        let err = PartitionIndex::from_map(&map, 3).unwrap_err();
        assert!(matches!(
            err,
            Error::PartitionError(PartitionError::UnmappedRead(2))
        ));

        // A map that stops short leaves the tail unmapped
        let err = PartitionIndex::from_map(&map, 4).unwrap_err();
        assert!(err.is_inconsistent_partition_map());
    }

    #[test]
    fn test_index_rejects_partition_out_of_range() {
        let map = PartitionMap::from_slice(2, &[0, 2]);
        let err = PartitionIndex::from_map(&map, 2).unwrap_err();
        assert!(matches!(
            err,
            Error::PartitionError(PartitionError::PartitionOutOfRange {
                read: 2,
                partition: 2,
                num_partitions: 2
            })
        ));
    }

    #[test]
    fn test_index_rejects_oversized_and_empty_maps() {
        let map = PartitionMap::from_slice(1, &[0, 0, 0]);
        assert!(PartitionIndex::from_map(&map, 2)
            .unwrap_err()
            .is_inconsistent_partition_map());

        let map = PartitionMap::from_slice(0, &[]);
        assert!(matches!(
            PartitionIndex::from_map(&map, 0),
            Err(Error::PartitionError(PartitionError::NoPartitions))
        ));
    }

    #[test]
    fn test_index_file_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let map = PartitionMap::from_slice(3, &[2, 0, 1, 2, 2, 0]);
        let index = PartitionIndex::from_map(&map, 6)?;
        let path = dir.path().join(INDEX_FILE);
        index.write(&path)?;
        assert_eq!(PartitionIndex::load(&path)?, index);
        Ok(())
    }

    #[test]
    fn test_index_file_rejects_truncation() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let map = PartitionMap::from_slice(2, &[0, 1, 1]);
        let path = dir.path().join(INDEX_FILE);
        PartitionIndex::from_map(&map, 3)?.write(&path)?;

        let bytes = fs::read(&path)?;
        fs::write(&path, &bytes[..bytes.len() - 4])?;
        assert!(PartitionIndex::load(&path)
            .unwrap_err()
            .is_incompatible_format());
        Ok(())
    }
}

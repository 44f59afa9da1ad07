use std::path::PathBuf;

use crate::layout::Role;
use crate::store::{ReadStoreMode, Stage};

/// Custom Result type for readstore operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the readstore library, encompassing all possible error cases
/// that can occur while managing a read store or laying out overlap jobs.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The on-disk data cannot be interpreted by this implementation
    #[error("Incompatible store format: {0}")]
    FormatError(#[from] FormatError),

    /// Errors raised by store operations
    #[error("Error in read store: {0}")]
    StoreError(#[from] StoreError),

    /// Errors raised while building or opening partitions
    #[error("Error partitioning store: {0}")]
    PartitionError(#[from] PartitionError),

    /// Errors raised by the job layout generator
    #[error("Error laying out overlap jobs: {0}")]
    LayoutError(#[from] LayoutError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),
}
impl Error {
    /// Checks if the error means the store on disk was written with an incompatible layout.
    ///
    /// Such stores are never openable and must be rebuilt.
    #[must_use]
    pub fn is_incompatible_format(&self) -> bool {
        matches!(self, Self::FormatError(_))
    }

    /// Checks if the error was caused by a partition map failing its coverage checks
    #[must_use]
    pub fn is_inconsistent_partition_map(&self) -> bool {
        match self {
            Self::PartitionError(err) => err.is_inconsistent_map(),
            _ => false,
        }
    }
}

/// Errors raised when the header or tables of a store fail validation
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    /// The magic number in the info header does not match
    #[error("Invalid magic number: {0:?}")]
    InvalidMagicNumber([u8; 8]),

    /// The format version is not the one this implementation writes
    #[error("Invalid format version: {found} (expected {expected})")]
    InvalidFormatVersion { found: u64, expected: u64 },

    /// A struct-size fingerprint in the header disagrees with the compiled layout
    ///
    /// # Fields
    /// * `field` - Which fingerprint failed
    /// * `found` - The value recorded in the store
    /// * `expected` - The value of the running implementation
    #[error("Layout fingerprint '{field}' mismatch: store has {found}, expected {expected}")]
    FingerprintMismatch {
        field: &'static str,
        found: u32,
        expected: u32,
    },

    /// The info header is not the expected number of bytes
    #[error("Invalid info header size: {0} bytes. Expected: {1}")]
    InvalidHeaderSize(usize, usize),

    /// A table file does not hold the number of records the header claims
    #[error("Table '{table}' holds {found} bytes, expected {expected} - possibly truncated")]
    TableTruncation {
        table: &'static str,
        found: usize,
        expected: usize,
    },

    /// A read record's ID does not match its position in the read table
    #[error("Read at table position {expected} claims ID {found}")]
    ReadIdMismatch { expected: u32, found: u32 },

    /// A library record's ID does not match its position in the library table
    #[error("Library at table position {expected} claims ID {found}")]
    LibraryIdMismatch { expected: u32, found: u32 },

    /// A read record names a library the store does not have
    #[error("Read {read} belongs to library {library}, but the store has {num_libraries} libraries")]
    InvalidLibraryReference {
        read: u32,
        library: u32,
        num_libraries: u32,
    },

    /// A blob frame did not start with the blob magic
    #[error("Invalid blob magic at offset {offset} in blob file {file_id}")]
    InvalidBlobMagic { file_id: u32, offset: u64 },

    /// A blob frame length disagrees with the reference pointing at it
    #[error("Blob at offset {offset} holds {found} bytes, reference expects {expected}")]
    BlobLengthMismatch {
        offset: u64,
        found: u32,
        expected: u32,
    },

    /// The partition index file is malformed or describes a different store
    #[error("Invalid partition index: {0}")]
    InvalidPartitionIndex(String),
}

/// Errors raised by the read store facade
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// No valid store exists at the given path
    #[error("No read store found at {0}")]
    NotFound(PathBuf),

    /// Create mode was requested but store files are already present
    #[error("A read store already exists at {0}")]
    AlreadyExists(PathBuf),

    /// The requested operation is not permitted in the current mode
    #[error("Operation '{operation}' is not allowed in mode {mode:?}")]
    InvalidMode {
        operation: &'static str,
        mode: ReadStoreMode,
    },

    /// An ID space or length field would exceed its bit budget
    #[error("Capacity exceeded for {what}: {requested} is above the limit of {limit}")]
    CapacityExceeded {
        what: &'static str,
        requested: u64,
        limit: u64,
    },

    /// A library ID does not exist in the store
    #[error("Library {library} does not exist (store has {num_libraries} libraries)")]
    InvalidLibrary { library: u32, num_libraries: u32 },

    /// A clear range is reversed or runs past the active sequence
    #[error("Invalid clear range {begin}-{end} for read {read} of length {length}")]
    InvalidRange {
        read: u32,
        begin: u32,
        end: u32,
        length: u32,
    },

    /// A read ID outside `1..=num_reads` was requested
    #[error("Requested read ID ({requested}) is out of range (1..={num_reads})")]
    OutOfRange { requested: u32, num_reads: u32 },

    /// The read belongs to another partition than the one this store serves
    #[error("Read {read} is not in partition {partition}")]
    NotInPartition { read: u32, partition: u32 },

    /// The refinement stage has a length but no stored payload
    #[error("Read {read} has no stored {stage:?} payload")]
    MissingBlob { read: u32, stage: Stage },
}

/// Errors raised while building or opening store partitions
#[derive(thiserror::Error, Debug)]
pub enum PartitionError {
    /// A read is not assigned to any partition
    #[error("Inconsistent partition map: read {0} is not assigned to a partition")]
    UnmappedRead(u32),

    /// A read is assigned to a partition ID beyond the declared partition count
    #[error(
        "Inconsistent partition map: read {read} assigned to partition {partition}, only {num_partitions} partitions"
    )]
    PartitionOutOfRange {
        read: u32,
        partition: u32,
        num_partitions: u32,
    },

    /// The map covers a different number of reads than the store holds
    #[error("Inconsistent partition map: covers {found} reads, store holds {expected}")]
    MapSizeMismatch { found: u32, expected: u32 },

    /// A partition map must declare at least one partition
    #[error("Inconsistent partition map: zero partitions declared")]
    NoPartitions,

    /// The store was opened for a partition that does not exist
    #[error("Partition {partition} does not exist (store has {num_partitions} partitions)")]
    UnknownPartition { partition: u32, num_partitions: u32 },

    /// The store was opened partitioned but no partitions were ever built
    #[error("Store at {0} has not been partitioned")]
    NotPartitioned(PathBuf),
}
impl PartitionError {
    /// Checks if this error reports a partition map failing its completeness checks
    #[must_use]
    pub fn is_inconsistent_map(&self) -> bool {
        matches!(
            self,
            Self::UnmappedRead(_)
                | Self::PartitionOutOfRange { .. }
                | Self::MapSizeMismatch { .. }
                | Self::NoPartitions
        )
    }
}

/// Errors raised by the job layout generator
#[derive(thiserror::Error, Debug)]
pub enum LayoutError {
    /// The generator was asked for a plan before read lengths were loaded
    #[error("Read lengths must be loaded before jobs can be laid out")]
    MissingRequiredLength,

    /// A role set names a library the store does not have
    #[error("{role} library {library} is invalid; only {num_libraries} libraries exist")]
    InvalidLibrarySpec {
        role: Role,
        library: u32,
        num_libraries: u32,
    },

    /// A library is in neither the hash nor the reference role set
    #[error("Library {0} is not mentioned in either the hash or the reference libraries")]
    LibraryNotClassified(u32),

    /// A required block length was not configured
    #[error("Missing required {0} block length")]
    MissingBlockLength(Role),

    /// A library range expression could not be parsed
    #[error("Unable to parse library range '{0}'")]
    InvalidRangeSpec(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_format_error() {
        let error: Error = FormatError::InvalidMagicNumber(*b"notastor").into();
        assert!(error.is_incompatible_format());
        assert!(!error.is_inconsistent_partition_map());
    }

    #[test]
    fn test_partition_map_errors_are_inconsistent() {
        let error: Error = PartitionError::UnmappedRead(7).into();
        assert!(error.is_inconsistent_partition_map());
        assert!(format!("{error}").contains('7'));

        let error: Error = PartitionError::UnknownPartition {
            partition: 4,
            num_partitions: 2,
        }
        .into();
        assert!(!error.is_inconsistent_partition_map());
    }

    #[test]
    fn test_store_error_invalid_range() {
        let error = StoreError::InvalidRange {
            read: 3,
            begin: 50,
            end: 10,
            length: 100,
        };
        let error_str = format!("{error}");
        assert!(error_str.contains("50-10"));
        assert!(error_str.contains("100"));
    }

    #[test]
    fn test_layout_error_invalid_library_spec() {
        let error = LayoutError::InvalidLibrarySpec {
            role: Role::Hash,
            library: 9,
            num_libraries: 3,
        };
        let error_str = format!("{error}");
        assert!(error_str.contains("Hash library 9"));
        assert!(error_str.contains('3'));
    }

    #[test]
    fn test_fingerprint_mismatch_display() {
        let error = FormatError::FingerprintMismatch {
            field: "read record size",
            found: 64,
            expected: 80,
        };
        let error_str = format!("{error}");
        assert!(error_str.contains("read record size"));
        assert!(error_str.contains("64"));
        assert!(error_str.contains("80"));
    }
}

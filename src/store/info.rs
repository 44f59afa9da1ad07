use std::fmt;

use bytemuck::{Pod, Zeroable};

use super::{
    Library, Read, Stage, MAX_LIBRARIES_BITS, MAX_READ_LEN_BITS, STORE_MAGIC, STORE_VERSION,
};
use crate::error::{FormatError, Result};

/// Size of the info header in bytes
pub const SIZE_INFO: usize = size_of::<StoreInfo>();

/// The store's singleton header.
///
/// Holds the format magic and version, fingerprints of the record layouts the store was
/// written with, and aggregate counts. This is stored identically in memory and on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct StoreInfo {
    // Format identification (16 bytes)
    magic: [u8; 8],
    version: u64,

    // Layout fingerprints (16 bytes)
    library_size: u32,
    read_size: u32,
    max_library_bits: u32,
    max_read_len_bits: u32,

    // Counts (24 bytes)
    num_libraries: u32,
    num_reads: u32,
    num_raw_reads: u32,
    num_corrected_reads: u32,
    num_trimmed_reads: u32,
    reserved: u32,

    // Base totals (24 bytes)
    num_raw_bases: u64,
    num_corrected_bases: u64,
    num_trimmed_bases: u64,
}
impl Default for StoreInfo {
    fn default() -> Self {
        Self {
            magic: *STORE_MAGIC,
            version: STORE_VERSION,
            library_size: size_of::<Library>() as u32,
            read_size: size_of::<Read>() as u32,
            max_library_bits: MAX_LIBRARIES_BITS,
            max_read_len_bits: MAX_READ_LEN_BITS,
            num_libraries: 0,
            num_reads: 0,
            num_raw_reads: 0,
            num_corrected_reads: 0,
            num_trimmed_reads: 0,
            reserved: 0,
            num_raw_bases: 0,
            num_corrected_bases: 0,
            num_trimmed_bases: 0,
        }
    }
}

impl StoreInfo {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Decodes and validates a header.
    ///
    /// Magic and version must match exactly and every layout fingerprint must agree with the
    /// running implementation, otherwise the store is refused.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SIZE_INFO {
            return Err(FormatError::InvalidHeaderSize(bytes.len(), SIZE_INFO).into());
        }
        let info: Self = bytemuck::pod_read_unaligned(bytes);
        info.validate()?;
        Ok(info)
    }

    fn validate(&self) -> Result<()> {
        if self.magic != *STORE_MAGIC {
            return Err(FormatError::InvalidMagicNumber(self.magic).into());
        }
        if self.version != STORE_VERSION {
            return Err(FormatError::InvalidFormatVersion {
                found: self.version,
                expected: STORE_VERSION,
            }
            .into());
        }
        let expected = Self::default();
        let fingerprints = [
            ("library record size", self.library_size, expected.library_size),
            ("read record size", self.read_size, expected.read_size),
            ("library id bits", self.max_library_bits, expected.max_library_bits),
            ("read length bits", self.max_read_len_bits, expected.max_read_len_bits),
        ];
        for (field, found, expected) in fingerprints {
            if found != expected {
                return Err(FormatError::FingerprintMismatch {
                    field,
                    found,
                    expected,
                }
                .into());
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn num_libraries(&self) -> u32 {
        self.num_libraries
    }
    #[must_use]
    pub fn num_reads(&self) -> u32 {
        self.num_reads
    }
    #[must_use]
    pub fn num_raw_reads(&self) -> u32 {
        self.num_raw_reads
    }
    #[must_use]
    pub fn num_corrected_reads(&self) -> u32 {
        self.num_corrected_reads
    }
    #[must_use]
    pub fn num_trimmed_reads(&self) -> u32 {
        self.num_trimmed_reads
    }
    #[must_use]
    pub fn num_raw_bases(&self) -> u64 {
        self.num_raw_bases
    }
    #[must_use]
    pub fn num_corrected_bases(&self) -> u64 {
        self.num_corrected_bases
    }
    #[must_use]
    pub fn num_trimmed_bases(&self) -> u64 {
        self.num_trimmed_bases
    }

    pub(crate) fn add_library(&mut self) {
        self.num_libraries += 1;
    }

    pub(crate) fn add_read(&mut self) {
        self.num_reads += 1;
    }

    /// Counts the first appearance of a refinement stage on some read
    pub(crate) fn add_stage(&mut self, stage: Stage, bases: u32) {
        let (reads, total) = match stage {
            Stage::Raw => (&mut self.num_raw_reads, &mut self.num_raw_bases),
            Stage::Corrected => (&mut self.num_corrected_reads, &mut self.num_corrected_bases),
            Stage::Trimmed => (&mut self.num_trimmed_reads, &mut self.num_trimmed_bases),
        };
        *reads += 1;
        *total += u64::from(bases);
    }

    /// Recomputes the refinement counters from a read table
    pub(crate) fn recount(&mut self, reads: &[Read]) {
        self.num_raw_reads = 0;
        self.num_corrected_reads = 0;
        self.num_trimmed_reads = 0;
        self.num_raw_bases = 0;
        self.num_corrected_bases = 0;
        self.num_trimmed_bases = 0;
        for read in reads {
            for stage in Stage::ALL {
                let length = read.stage_length(stage);
                if length > 0 {
                    self.add_stage(stage, length);
                }
            }
        }
    }
}

impl fmt::Display for StoreInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "version            {}", self.version)?;
        writeln!(f, "libraryRecordSize  {}", self.library_size)?;
        writeln!(f, "readRecordSize     {}", self.read_size)?;
        writeln!(f, "libraryIdBits      {}", self.max_library_bits)?;
        writeln!(f, "readLengthBits     {}", self.max_read_len_bits)?;
        writeln!(f, "numLibraries       {}", self.num_libraries)?;
        writeln!(f, "numReads           {}", self.num_reads)?;
        writeln!(
            f,
            "numRawReads        {:>10} {:>14} bases",
            self.num_raw_reads, self.num_raw_bases
        )?;
        writeln!(
            f,
            "numCorrectedReads  {:>10} {:>14} bases",
            self.num_corrected_reads, self.num_corrected_bases
        )?;
        writeln!(
            f,
            "numTrimmedReads    {:>10} {:>14} bases",
            self.num_trimmed_reads, self.num_trimmed_bases
        )
    }
}

use crate::error::{FormatError, Result};
use crate::store::{ReadStore, Stage};

use super::config::RoleSet;

/// Active sequence length and library of every read, indexed by read ID.
///
/// This is all the layout generator needs from a store; payloads are never touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadLengths {
    lengths: Vec<u32>,
    libraries: Vec<u32>,
    num_libraries: u32,
}

/// Read and base totals of one refinement stage
#[derive(Debug, Clone, Copy, Default)]
struct StageTotals {
    reads: u64,
    bases: u64,
}

impl ReadLengths {
    /// Creates an empty table for a store with `num_libraries` libraries
    #[must_use]
    pub fn new(num_libraries: u32) -> Self {
        Self {
            num_libraries,
            ..Self::default()
        }
    }

    /// Scans the read table of `store`.
    ///
    /// Verifies that every read sits at the position its ID claims and logs the per-stage
    /// read and base totals.
    pub fn load(store: &ReadStore) -> Result<Self> {
        let mut lengths = Self::new(store.num_libraries());
        lengths.lengths.reserve(store.reads().len());
        lengths.libraries.reserve(store.reads().len());

        let mut totals = [StageTotals::default(); 3];
        for (pos, read) in (1..).zip(store.reads()) {
            if read.id().get() != pos {
                return Err(FormatError::ReadIdMismatch {
                    expected: pos,
                    found: read.id().get(),
                }
                .into());
            }
            for (stage, total) in Stage::ALL.into_iter().zip(totals.iter_mut()) {
                let length = read.stage_length(stage);
                if length > 0 {
                    total.reads += 1;
                    total.bases += u64::from(length);
                }
            }
            lengths.push(read.library_id(), read.sequence_length());
        }

        let [raw, corrected, trimmed] = totals;
        tracing::info!(
            "loaded {} read lengths: raw {} reads / {} bases, corrected {} reads / {} bases, trimmed {} reads / {} bases",
            lengths.len(),
            raw.reads,
            raw.bases,
            corrected.reads,
            corrected.bases,
            trimmed.reads,
            trimmed.bases
        );
        Ok(lengths)
    }

    /// Appends a read of `library` with active length `length`, returning its read ID
    pub fn push(&mut self, library: u32, length: u32) -> u32 {
        self.lengths.push(length);
        self.libraries.push(library);
        self.num_reads()
    }

    #[must_use]
    pub fn num_reads(&self) -> u32 {
        self.lengths.len() as u32
    }

    #[must_use]
    pub fn num_libraries(&self) -> u32 {
        self.num_libraries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Active length of read `id`; zero for IDs outside the table
    #[must_use]
    pub fn length(&self, id: u32) -> u32 {
        id.checked_sub(1)
            .and_then(|idx| self.lengths.get(idx as usize))
            .copied()
            .unwrap_or(0)
    }

    /// First and last read IDs eligible for a role, or `None` if no read is.
    ///
    /// An unrestricted set spans the whole table.
    #[must_use]
    pub fn bounds(&self, set: &RoleSet) -> Option<(u32, u32)> {
        if set.is_all() {
            return (!self.is_empty()).then_some((1, self.num_reads()));
        }
        let mut eligible = (1..)
            .zip(&self.libraries)
            .filter(|&(_, &lib)| set.contains(lib))
            .map(|(id, _)| id);
        let min = eligible.next()?;
        let max = eligible.last().unwrap_or(min);
        Some((min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LibraryId, ReadStoreMode};

    #[test]
    fn test_bounds_follow_role_set() {
        let mut lengths = ReadLengths::new(3);
        for lib in [1, 1, 2, 3, 2, 1] {
            lengths.push(lib, 100);
        }
        assert_eq!(lengths.bounds(&RoleSet::all()), Some((1, 6)));
        assert_eq!(lengths.bounds(&"2".parse().unwrap()), Some((3, 5)));
        assert_eq!(lengths.bounds(&"3".parse().unwrap()), Some((4, 4)));
        assert_eq!(lengths.bounds(&"2-3".parse().unwrap()), Some((3, 5)));
        assert_eq!(lengths.bounds(&"9".parse().unwrap()), None);
        assert_eq!(ReadLengths::new(1).bounds(&RoleSet::all()), None);
    }

    #[test]
    fn test_length_out_of_range_is_zero() {
        let mut lengths = ReadLengths::new(1);
        let id = lengths.push(1, 42);
        assert_eq!(id, 1);
        assert_eq!(lengths.length(1), 42);
        assert_eq!(lengths.length(0), 0);
        assert_eq!(lengths.length(2), 0);
    }

    #[test]
    fn test_load_uses_active_length() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = ReadStore::open(dir.path().join("store"), ReadStoreMode::Create)?;
        let a = store.add_empty_library("a")?.id();
        let b = store.add_empty_library("b")?.id();

        let stash = |store: &mut ReadStore, library: LibraryId, stages: &[(Stage, u32)]| {
            let mut data = store.add_empty_read(library)?;
            for &(stage, length) in stages {
                data.set_payload(stage, length, b"payload");
                store.stash_read_data(&data)?;
            }
            Ok::<_, crate::Error>(())
        };
        stash(&mut store, a, &[(Stage::Raw, 100)])?;
        stash(&mut store, b, &[(Stage::Raw, 100), (Stage::Corrected, 90)])?;
        stash(
            &mut store,
            a,
            &[(Stage::Raw, 100), (Stage::Corrected, 90), (Stage::Trimmed, 80)],
        )?;
        stash(&mut store, b, &[])?;

        let lengths = ReadLengths::load(&store)?;
        assert_eq!(lengths.num_reads(), 4);
        assert_eq!(lengths.num_libraries(), 2);
        assert_eq!(
            (1..=4).map(|id| lengths.length(id)).collect::<Vec<_>>(),
            [100, 90, 80, 0]
        );
        assert_eq!(lengths.bounds(&"2".parse().unwrap()), Some((2, 4)));
        store.close()
    }
}

//! Overlap job layout
//!
//! Tiles the read-vs-read comparison space into jobs. Each job compares a "hash" range of
//! reads, loaded into an in-memory table, against a "reference" range streamed past it.
//! Ranges grow greedily until a byte budget is reached.
//!
//! Comparisons are symmetric, so unless both roles draw from the same explicitly named
//! libraries only the lower triangle is laid out: a reference range never runs past the
//! end of the hash range it is paired with.

mod config;
mod lengths;
mod output;

use std::fmt;
use std::path::Path;

pub use config::{LayoutConfig, LayoutConfigBuilder, RoleSet, RoleSets, DEFAULT_BATCH_MAX};
pub use lengths::ReadLengths;
pub use output::{
    plan_path, JobDescriptor, JobSink, PlanFiles, PlanWriter, BATCH_SUFFIX, JOB_SUFFIX,
    OPTIONS_SUFFIX,
};

use crate::error::{LayoutError, Result};
use crate::store::ReadStore;

/// Side of the comparison a library feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Reads loaded into the hash table
    Hash,
    /// Reads streamed against the hash table
    Reference,
}
impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hash => f.write_str("Hash"),
            Self::Reference => f.write_str("Reference"),
        }
    }
}

/// A range being grown over consecutive read IDs
#[derive(Debug, Clone, Copy, Default)]
struct Block {
    begin: u32,
    end: u32,
    reads: u32,
    bases: u64,
}

/// Lays out overlap jobs for one [`LayoutConfig`]
#[derive(Debug, Clone)]
pub struct LayoutGenerator {
    config: LayoutConfig,
    lengths: Option<ReadLengths>,
}
impl LayoutGenerator {
    #[must_use]
    pub fn new(config: LayoutConfig) -> Self {
        Self {
            config,
            lengths: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    #[must_use]
    pub fn lengths(&self) -> Option<&ReadLengths> {
        self.lengths.as_ref()
    }

    /// Checks the role sets against `store` and loads its read lengths
    pub fn load_lengths(&mut self, store: &ReadStore) -> Result<&ReadLengths> {
        self.config
            .roles()
            .validate(store.num_libraries(), self.config.check_all_libraries_used())?;
        Ok(self.lengths.insert(ReadLengths::load(store)?))
    }

    /// Uses lengths gathered elsewhere instead of loading them from a store
    #[must_use]
    pub fn with_lengths(mut self, lengths: ReadLengths) -> Self {
        self.lengths = Some(lengths);
        self
    }

    /// True if options lines should carry the hash read count and data length.
    ///
    /// That is the case when the hash side is restricted to a subset of the libraries.
    #[must_use]
    pub fn hash_options(&self) -> bool {
        self.lengths
            .as_ref()
            .is_some_and(|l| !self.config.roles().hash.covers(l.num_libraries()))
    }

    /// Lays out all jobs into `sink`, returning how many were emitted
    ///
    /// # Errors
    ///
    /// * [`LayoutError::MissingRequiredLength`] if no read lengths were loaded
    /// * [`LayoutError::InvalidLibrarySpec`] or [`LayoutError::LibraryNotClassified`] if the
    ///   role sets do not fit the libraries the lengths were taken from
    pub fn plan<S: JobSink>(&self, sink: &mut S) -> Result<u32> {
        let Some(lengths) = self.lengths.as_ref() else {
            return Err(LayoutError::MissingRequiredLength.into());
        };
        let config = &self.config;
        let roles = config.roles();
        roles.validate(lengths.num_libraries(), config.check_all_libraries_used())?;

        let (Some((hash_min, hash_max)), Some((ref_min, ref_max))) = (
            lengths.bounds(&roles.hash),
            lengths.bounds(&roles.reference),
        ) else {
            tracing::warn!("no reads are eligible for both roles; no jobs laid out");
            return Ok(0);
        };
        let symmetric = roles.is_symmetric();
        let min_length = config.min_overlap_length();
        tracing::info!(
            "laying out jobs: hash reads {hash_min}-{hash_max} ({}), reference reads {ref_min}-{ref_max} ({}), {}",
            roles.hash,
            roles.reference,
            if symmetric { "all-vs-all" } else { "triangular" }
        );

        let mut jobs: u32 = 0;
        let mut hash_begin = hash_min;
        loop {
            let hash = grow(
                lengths,
                min_length,
                hash_begin,
                hash_max,
                config.hash_block_length(),
                1,
            );

            let ref_limit = if symmetric {
                ref_max
            } else {
                ref_max.min(hash.end)
            };
            let mut ref_begin = ref_min;
            while ref_begin <= ref_limit {
                let reference = grow(
                    lengths,
                    min_length,
                    ref_begin,
                    ref_limit,
                    config.ref_block_length(),
                    0,
                );
                let job = JobDescriptor {
                    hash_range: (hash.begin, hash.end),
                    hash_reads: hash.reads,
                    hash_bases: hash.bases,
                    ref_range: (reference.begin, reference.end),
                    ref_reads: reference.reads,
                    ref_bases: reference.bases,
                    batch_id: jobs / config.batch_max() + 1,
                    job_id: jobs + 1,
                };
                tracing::debug!(
                    "job {:>6} hash {:>10}-{:<10} {:>9} {:>12} ref {:>10}-{:<10} {:>9} {:>12}",
                    job.job_id,
                    hash.begin,
                    hash.end,
                    hash.reads,
                    hash.bases,
                    reference.begin,
                    reference.end,
                    reference.reads,
                    reference.bases
                );
                sink.emit(&job)?;
                jobs += 1;

                if reference.end == ref_limit {
                    break;
                }
                ref_begin = reference.end + 1;
            }

            if hash.end == hash_max {
                break;
            }
            hash_begin = hash.end + 1;
        }

        tracing::info!(
            "laid out {jobs} jobs in {} batches",
            jobs.div_ceil(config.batch_max())
        );
        Ok(jobs)
    }
}

/// Grows a block from `begin` until it holds `budget` bytes or reaches `max`.
///
/// Each read of at least `min_length` adds its length plus `overhead` bytes to the budget
/// and its length plus one terminator byte to the reported bases. Shorter reads add nothing
/// but are still passed over, so the block always ends on a real read ID.
fn grow(
    lengths: &ReadLengths,
    min_length: u32,
    begin: u32,
    max: u32,
    budget: u64,
    overhead: u64,
) -> Block {
    let mut block = Block {
        begin,
        end: begin,
        ..Block::default()
    };
    let mut size = 0u64;
    let mut id = begin;
    loop {
        let length = lengths.length(id);
        if length >= min_length {
            size += u64::from(length) + overhead;
            block.reads += 1;
            block.bases += u64::from(length) + 1;
        }
        block.end = id;
        if size >= budget || id >= max {
            return block;
        }
        id += 1;
    }
}

/// Loads read lengths from `store` and writes the full job plan under `prefix`.
///
/// The three plan files appear under their final names only once every job is written.
pub fn write_job_plan(store: &ReadStore, config: LayoutConfig, prefix: &Path) -> Result<u32> {
    let mut generator = LayoutGenerator::new(config);
    generator.load_lengths(store)?;
    let mut files = PlanFiles::create(prefix, generator.hash_options())?;
    let jobs = generator.plan(&mut files)?;
    files.finish()?;
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::store::{ReadStoreMode, Stage};
    use crate::Error;

    fn config(hash: u64, reference: u64) -> LayoutConfigBuilder {
        LayoutConfig::builder()
            .hash_block_length(hash)
            .ref_block_length(reference)
    }

    fn uniform(num_reads: u32, length: u32) -> ReadLengths {
        let mut lengths = ReadLengths::new(1);
        for _ in 0..num_reads {
            lengths.push(1, length);
        }
        lengths
    }

    fn plan(builder: LayoutConfigBuilder, lengths: ReadLengths) -> Result<Vec<JobDescriptor>> {
        let generator = LayoutGenerator::new(builder.build()?).with_lengths(lengths);
        let mut jobs = Vec::new();
        generator.plan(&mut jobs)?;
        Ok(jobs)
    }

    /// Distinct hash ranges in emission order
    fn hash_ranges(jobs: &[JobDescriptor]) -> Vec<(u32, u32)> {
        let mut ranges: Vec<(u32, u32)> = jobs.iter().map(|j| j.hash_range).collect();
        ranges.dedup();
        ranges
    }

    /// Asserts `ranges` tile `[min, max]` in order without gaps or overlaps
    fn assert_tiles(ranges: &[(u32, u32)], min: u32, max: u32) {
        assert_eq!(ranges.first().map(|r| r.0), Some(min), "{ranges:?}");
        assert_eq!(ranges.last().map(|r| r.1), Some(max), "{ranges:?}");
        for window in ranges.windows(2) {
            assert_eq!(window[0].1 + 1, window[1].0, "{ranges:?}");
        }
        assert!(ranges.iter().all(|r| r.0 <= r.1), "{ranges:?}");
    }

    #[test]
    fn test_plan_requires_lengths() -> Result<()> {
        let generator = LayoutGenerator::new(config(250, 250).build()?);
        let mut jobs: Vec<JobDescriptor> = Vec::new();
        assert!(matches!(
            generator.plan(&mut jobs),
            Err(Error::LayoutError(LayoutError::MissingRequiredLength))
        ));
        assert!(jobs.is_empty());
        Ok(())
    }

    #[test]
    fn test_ten_uniform_reads() -> Result<()> {
        let jobs = plan(config(250, 250), uniform(10, 100))?;

        assert_tiles(&hash_ranges(&jobs), 1, 10);
        for job in &jobs {
            let (begin, end) = job.hash_range;
            assert!(job.hash_bases >= 250 || end == 10, "{job:?}");
            assert_eq!(job.hash_bases, u64::from(end - begin + 1) * 101);
        }
        assert_eq!(jobs.last().map(|j| j.ref_range.1), Some(10));
        assert_eq!(jobs.first().map(|j| j.job_id), Some(1));
        assert!(jobs.iter().all(|j| j.batch_id == 1));
        Ok(())
    }

    #[test]
    fn test_hash_block_fills_budget() -> Result<()> {
        let jobs = plan(config(250, 250), uniform(10, 100))?;
        // 101 + 101 = 202 is below the budget, the third read reaches 303
        assert_eq!(
            hash_ranges(&jobs),
            vec![(1, 3), (4, 6), (7, 9), (10, 10)]
        );
        // Reference blocks take 100 bytes per read: 300 after three reads
        let first: Vec<(u32, u32)> = jobs
            .iter()
            .filter(|j| j.hash_range == (4, 6))
            .map(|j| j.ref_range)
            .collect();
        assert_eq!(first, [(1, 3), (4, 6)]);
        Ok(())
    }

    #[test]
    fn test_triangular_when_roles_unrestricted() -> Result<()> {
        let jobs = plan(config(1000, 300), uniform(50, 100))?;
        for job in &jobs {
            assert!(job.ref_range.1 <= job.hash_range.1, "{job:?}");
        }
        for hash in hash_ranges(&jobs) {
            let refs: Vec<(u32, u32)> = jobs
                .iter()
                .filter(|j| j.hash_range == hash)
                .map(|j| j.ref_range)
                .collect();
            assert_tiles(&refs, 1, hash.1);
        }
        Ok(())
    }

    #[test]
    fn test_symmetric_roles_extend_past_hash_end() -> Result<()> {
        let builder = config(250, 250)
            .hash_libraries("1".parse()?)
            .ref_libraries("1".parse()?);
        let jobs = plan(builder, uniform(10, 100))?;
        assert!(jobs.iter().any(|j| j.ref_range.1 > j.hash_range.1));
        for hash in hash_ranges(&jobs) {
            let refs: Vec<(u32, u32)> = jobs
                .iter()
                .filter(|j| j.hash_range == hash)
                .map(|j| j.ref_range)
                .collect();
            assert_tiles(&refs, 1, 10);
        }
        assert_tiles(&hash_ranges(&jobs), 1, 10);
        Ok(())
    }

    #[test]
    fn test_overlapping_unequal_roles_are_triangular() -> Result<()> {
        // Library 1: reads 1-4, library 2: reads 5-8, library 3: reads 9-12
        let mut lengths = ReadLengths::new(3);
        for lib in 1..=3 {
            for _ in 0..4 {
                lengths.push(lib, 100);
            }
        }
        let builder = config(250, 250)
            .hash_libraries("1-2".parse()?)
            .ref_libraries("2-3".parse()?);
        let jobs = plan(builder, lengths)?;

        // Hash blocks below the first reference read have nothing to compare against
        let pairs: Vec<_> = jobs.iter().map(|j| (j.hash_range, j.ref_range)).collect();
        assert_eq!(
            pairs,
            [((4, 6), (5, 6)), ((7, 8), (5, 7)), ((7, 8), (8, 8))]
        );
        for job in &jobs {
            assert!(job.ref_range.1 <= job.hash_range.1, "{job:?}");
        }
        Ok(())
    }

    #[test]
    fn test_hash_range_starting_below_references_emits_nothing_for_it() -> Result<()> {
        let mut lengths = ReadLengths::new(2);
        for lib in [1, 1, 2, 2] {
            lengths.push(lib, 100);
        }
        let builder = config(100, 100)
            .hash_libraries("1-2".parse()?)
            .ref_libraries("2".parse()?);
        let jobs = plan(builder, lengths)?;
        let pairs: Vec<_> = jobs.iter().map(|j| (j.hash_range, j.ref_range)).collect();
        assert_eq!(
            pairs,
            [((3, 3), (3, 3)), ((4, 4), (3, 3)), ((4, 4), (4, 4))]
        );
        Ok(())
    }

    #[test]
    fn test_short_reads_are_passed_over() -> Result<()> {
        let mut lengths = ReadLengths::new(1);
        for length in [100, 10, 10, 100, 10, 100] {
            lengths.push(1, length);
        }
        let jobs = plan(config(150, 1000).min_overlap_length(50), lengths)?;

        assert_eq!(hash_ranges(&jobs), vec![(1, 4), (5, 6)]);
        let first = jobs[0];
        assert_eq!(first.hash_reads, 2);
        assert_eq!(first.hash_bases, 202);
        assert_eq!(first.ref_range, (1, 4));
        assert_eq!(first.ref_reads, 2);
        // Reference reads are budgeted by length alone but reported with a terminator
        assert_eq!(first.ref_bases, 202);

        // Short reads count for nothing but stay inside the range
        let second = jobs.iter().find(|j| j.hash_range == (5, 6)).unwrap();
        assert_eq!(second.hash_reads, 1);
        Ok(())
    }

    #[test]
    fn test_no_eligible_reads() -> Result<()> {
        assert!(plan(config(10, 10), ReadLengths::new(1))?.is_empty());

        let mut lengths = ReadLengths::new(2);
        lengths.push(1, 100);
        let builder = config(10, 10)
            .hash_libraries("2".parse()?)
            .ref_libraries(RoleSet::all());
        assert!(plan(builder, lengths)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_plan_validates_library_spec() {
        let builder = config(10, 10).hash_libraries("4".parse().unwrap());
        assert!(matches!(
            plan(builder, uniform(3, 10)),
            Err(Error::LayoutError(LayoutError::InvalidLibrarySpec {
                role: Role::Hash,
                library: 4,
                num_libraries: 1
            }))
        ));
    }

    #[test]
    fn test_batch_rollover() -> Result<()> {
        // 2001 single-read hash blocks, each paired with one reference read
        let mut lengths = ReadLengths::new(2);
        lengths.push(2, 100);
        for _ in 0..2001 {
            lengths.push(1, 100);
        }
        let builder = config(1, 1_000_000)
            .hash_libraries("1".parse()?)
            .ref_libraries("2".parse()?);
        let jobs = plan(builder, lengths)?;

        assert_eq!(jobs.len(), 2001);
        let mut writer = PlanWriter::new(Vec::new(), Vec::new(), Vec::new());
        for job in &jobs {
            writer.emit(job)?;
        }
        let (batches, ids, _) = writer.into_inner()?;
        let batches: Vec<String> = String::from_utf8(batches)
            .unwrap()
            .lines()
            .map(String::from)
            .collect();
        let mut distinct = batches.clone();
        distinct.dedup();
        assert_eq!(distinct, ["001", "002", "003"]);
        assert_eq!(batches[999], "001");
        assert_eq!(batches[1000], "002");
        assert_eq!(batches[1999], "002");
        assert_eq!(batches[2000], "003");

        let ids = String::from_utf8(ids).unwrap();
        assert_eq!(ids.lines().next(), Some("000001"));
        assert_eq!(ids.lines().last(), Some("002001"));
        Ok(())
    }

    #[test]
    fn test_custom_batch_max() -> Result<()> {
        let jobs = plan(config(100, 100).batch_max(2), uniform(3, 100))?;
        let batches: Vec<u32> = jobs.iter().map(|j| j.batch_id).collect();
        assert_eq!(jobs.len(), 6);
        assert_eq!(batches, [1, 1, 2, 2, 3, 3]);
        Ok(())
    }

    #[test]
    fn test_random_lengths_tile_without_gaps() -> Result<()> {
        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..50 {
            let num_reads = rng.random_range(1..300);
            let mut lengths = ReadLengths::new(1);
            for _ in 0..num_reads {
                lengths.push(1, rng.random_range(0..5000));
            }
            let builder = config(rng.random_range(1..50_000), rng.random_range(1..50_000))
                .min_overlap_length(rng.random_range(0..1000));
            let jobs = plan(builder, lengths)?;

            assert_tiles(&hash_ranges(&jobs), 1, num_reads);
            for hash in hash_ranges(&jobs) {
                let refs: Vec<(u32, u32)> = jobs
                    .iter()
                    .filter(|j| j.hash_range == hash)
                    .map(|j| j.ref_range)
                    .collect();
                assert_tiles(&refs, 1, hash.1);
            }
            for (job_id, job) in (1..).zip(&jobs) {
                assert_eq!(job.job_id, job_id);
            }
        }
        Ok(())
    }

    #[test]
    fn test_write_job_plan_from_store() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("store");
        let mut store = ReadStore::open(&path, ReadStoreMode::Create)?;
        let first = store.add_empty_library("first")?.id();
        let second = store.add_empty_library("second")?.id();
        for library in [first, first, first, second, second] {
            let mut data = store.add_empty_read(library)?;
            data.set_payload(Stage::Raw, 100, b"ACGT");
            store.stash_read_data(&data)?;
        }
        store.close()?;

        let store = ReadStore::open(&path, ReadStoreMode::ReadOnly)?;
        let prefix = dir.path().join("plan");

        // Library 2 is in neither role set
        let strict = config(250, 250)
            .hash_libraries("1".parse()?)
            .ref_libraries("1".parse()?)
            .build()?;
        assert!(matches!(
            write_job_plan(&store, strict.clone(), &prefix),
            Err(Error::LayoutError(LayoutError::LibraryNotClassified(2)))
        ));
        assert!(!plan_path(&prefix, OPTIONS_SUFFIX).exists());

        let lenient = config(250, 250)
            .roles(strict.roles().clone())
            .check_all_libraries_used(false)
            .build()?;
        let jobs = write_job_plan(&store, lenient, &prefix)?;
        assert!(jobs > 0);

        let options = std::fs::read_to_string(plan_path(&prefix, OPTIONS_SUFFIX))?;
        let first_line = options.lines().next().unwrap_or_default();
        assert_eq!(first_line, "-h 1-3 -r 1-3 --hashstrings 3 --hashdatalen 303");
        assert_eq!(options.lines().count(), jobs as usize);
        Ok(())
    }

    #[test]
    fn test_role_sets_from_library_flags() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = ReadStore::open(dir.path().join("store"), ReadStoreMode::Create)?;
        store.add_empty_library("both")?;
        store.add_empty_library("stream only")?.set_default_hash(false);

        let roles = RoleSets::from_library_flags(&store);
        assert_eq!(roles.hash, "1".parse::<RoleSet>()?);
        assert_eq!(roles.reference, "1-2".parse::<RoleSet>()?);
        assert!(!roles.is_symmetric());
        store.close()
    }
}

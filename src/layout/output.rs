//! Job plan output.
//!
//! A plan is three line-oriented streams aligned by line number:
//!
//! ```text
//! <prefix>.ovlbat   batch name per job, e.g. 001
//! <prefix>.ovljob   job name, e.g. 000001
//! <prefix>.ovlopt   comparison options: -h 1-2 -r 1-2 [--hashstrings N --hashdatalen B]
//! ```
//!
//! Files are written under a `.tmp` suffix and renamed once the plan is complete.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

pub const BATCH_SUFFIX: &str = "ovlbat";
pub const JOB_SUFFIX: &str = "ovljob";
pub const OPTIONS_SUFFIX: &str = "ovlopt";

const TMP_SUFFIX: &str = "tmp";

/// One unit of comparison work: a hash range compared against a reference range.
///
/// Ranges are inclusive read ID ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobDescriptor {
    pub hash_range: (u32, u32),
    /// Reads in the hash range long enough to take part
    pub hash_reads: u32,
    /// Bytes the hash range loads, one terminator byte per read included
    pub hash_bases: u64,

    pub ref_range: (u32, u32),
    pub ref_reads: u32,
    /// Bytes the reference range streams, one terminator byte per read included. The
    /// reference budget itself counts bases only.
    pub ref_bases: u64,

    pub batch_id: u32,
    pub job_id: u32,
}

/// Receives jobs as the generator lays them out
pub trait JobSink {
    fn emit(&mut self, job: &JobDescriptor) -> Result<()>;
}

impl JobSink for Vec<JobDescriptor> {
    fn emit(&mut self, job: &JobDescriptor) -> Result<()> {
        self.push(*job);
        Ok(())
    }
}

/// Writes jobs to the three plan streams
pub struct PlanWriter<W: Write> {
    batches: W,
    jobs: W,
    options: W,

    /// Append the hash read count and data length to each options line
    hash_options: bool,
}
impl<W: Write> PlanWriter<W> {
    pub fn new(batches: W, jobs: W, options: W) -> Self {
        Self {
            batches,
            jobs,
            options,
            hash_options: false,
        }
    }

    /// Set whether options lines carry `--hashstrings` and `--hashdatalen`
    #[must_use]
    pub fn hash_options(mut self, enabled: bool) -> Self {
        self.hash_options = enabled;
        self
    }

    pub fn flush(&mut self) -> Result<()> {
        self.batches.flush()?;
        self.jobs.flush()?;
        self.options.flush()?;
        Ok(())
    }

    /// Flushes and returns the batch, job and options streams
    pub fn into_inner(mut self) -> Result<(W, W, W)> {
        self.flush()?;
        Ok((self.batches, self.jobs, self.options))
    }
}
impl<W: Write> JobSink for PlanWriter<W> {
    fn emit(&mut self, job: &JobDescriptor) -> Result<()> {
        writeln!(self.batches, "{:03}", job.batch_id)?;
        writeln!(self.jobs, "{:06}", job.job_id)?;
        write!(
            self.options,
            "-h {}-{} -r {}-{}",
            job.hash_range.0, job.hash_range.1, job.ref_range.0, job.ref_range.1
        )?;
        if self.hash_options {
            write!(
                self.options,
                " --hashstrings {} --hashdatalen {}",
                job.hash_reads, job.hash_bases
            )?;
        }
        writeln!(self.options)?;
        Ok(())
    }
}

/// `<prefix>.<suffix>`
#[must_use]
pub fn plan_path(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

/// A plan being written to `<prefix>.ovlbat`, `<prefix>.ovljob` and `<prefix>.ovlopt`.
///
/// Nothing appears under the final names until [`PlanFiles::finish`] succeeds.
pub struct PlanFiles {
    paths: [PathBuf; 3],
    writer: PlanWriter<BufWriter<File>>,
}
impl PlanFiles {
    pub fn create(prefix: &Path, hash_options: bool) -> Result<Self> {
        let paths = [BATCH_SUFFIX, JOB_SUFFIX, OPTIONS_SUFFIX].map(|s| plan_path(prefix, s));
        let open = |path: &Path| -> Result<BufWriter<File>> {
            Ok(BufWriter::new(File::create(tmp_path(path))?))
        };
        let writer = PlanWriter::new(open(&paths[0])?, open(&paths[1])?, open(&paths[2])?)
            .hash_options(hash_options);
        Ok(Self { paths, writer })
    }

    /// Flushes all streams and moves them to their final names
    pub fn finish(self) -> Result<()> {
        let (batches, jobs, options) = self.writer.into_inner()?;
        for stream in [batches, jobs, options] {
            stream.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        }
        for path in &self.paths {
            fs::rename(tmp_path(path), path)?;
        }
        Ok(())
    }
}
impl JobSink for PlanFiles {
    fn emit(&mut self, job: &JobDescriptor) -> Result<()> {
        self.writer.emit(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(job_id: u32, batch_id: u32) -> JobDescriptor {
        JobDescriptor {
            hash_range: (1, 2),
            hash_reads: 2,
            hash_bases: 202,
            ref_range: (3, 10),
            ref_reads: 8,
            ref_bases: 800,
            batch_id,
            job_id,
        }
    }

    fn lines(bytes: &[u8]) -> Vec<&str> {
        std::str::from_utf8(bytes).unwrap().lines().collect()
    }

    #[test]
    fn test_plan_writer_formats() -> Result<()> {
        let mut writer = PlanWriter::new(Vec::new(), Vec::new(), Vec::new());
        writer.emit(&job(1, 1))?;
        writer.emit(&job(12, 3))?;
        let (batches, jobs, options) = writer.into_inner()?;
        assert_eq!(lines(&batches), ["001", "003"]);
        assert_eq!(lines(&jobs), ["000001", "000012"]);
        assert_eq!(lines(&options), ["-h 1-2 -r 3-10", "-h 1-2 -r 3-10"]);
        Ok(())
    }

    #[test]
    fn test_plan_writer_hash_options() -> Result<()> {
        let mut writer =
            PlanWriter::new(Vec::new(), Vec::new(), Vec::new()).hash_options(true);
        writer.emit(&job(1, 1))?;
        let (_, _, options) = writer.into_inner()?;
        assert_eq!(
            lines(&options),
            ["-h 1-2 -r 3-10 --hashstrings 2 --hashdatalen 202"]
        );
        Ok(())
    }

    #[test]
    fn test_plan_files_appear_on_finish() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let prefix = dir.path().join("overlap.v1");
        let mut files = PlanFiles::create(&prefix, false)?;
        files.emit(&job(1, 1))?;

        let finals: Vec<PathBuf> = [BATCH_SUFFIX, JOB_SUFFIX, OPTIONS_SUFFIX]
            .iter()
            .map(|s| plan_path(&prefix, s))
            .collect();
        assert!(finals.iter().all(|p| !p.exists()));
        assert!(finals.iter().all(|p| tmp_path(p).exists()));

        files.finish()?;
        assert!(finals.iter().all(|p| p.exists() && !tmp_path(p).exists()));
        assert_eq!(fs::read_to_string(&finals[1])?, "000001\n");
        assert_eq!(
            finals[0].file_name().unwrap().to_str(),
            Some("overlap.v1.ovlbat")
        );
        Ok(())
    }
}

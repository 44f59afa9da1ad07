//! # readstore
//!
//! A versioned on-disk store of sequencing reads, and the layout of overlap jobs over it.
//!
//! Reads are grouped into libraries. Fixed-size metadata for both lives in tables that are
//! loaded whole on open, while sequence payloads live in size-capped blob files and are
//! read lazily. A store can be split into partitions so that each worker loads only the
//! payloads of the reads it was assigned.
//!
//! The [`layout`] module walks store metadata to tile the all-pairs comparison space into
//! jobs of bounded size.

pub mod error;
pub mod layout;
pub mod store;

pub use error::{Error, Result};
pub use layout::{
    write_job_plan, JobDescriptor, JobSink, LayoutConfig, LayoutConfigBuilder, LayoutGenerator,
    ReadLengths, Role, RoleSet, RoleSets,
};
pub use store::{
    BlobReader, BlobRef, Library, LibraryId, PartitionIndex, PartitionMap, Read, ReadData,
    ReadId, ReadStore, ReadStoreMode, Stage, StoreInfo, StoreOptions,
};

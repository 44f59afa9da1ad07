use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::Role;
use crate::error::{LayoutError, Result};
use crate::store::ReadStore;

/// Default number of jobs grouped into one batch
pub const DEFAULT_BATCH_MAX: u32 = 1000;

/// A set of library IDs feeding one side of the comparison.
///
/// An empty set means "all libraries".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSet(BTreeSet<u32>);
impl RoleSet {
    /// The empty set, selecting every library
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, library: u32) {
        self.0.insert(library);
    }

    /// True if reads of `library` take part in this role
    #[must_use]
    pub fn contains(&self, library: u32) -> bool {
        self.0.is_empty() || self.0.contains(&library)
    }

    /// True if this set explicitly names `library`
    #[must_use]
    pub fn names(&self, library: u32) -> bool {
        self.0.contains(&library)
    }

    /// True if no library is named, which selects all of them
    #[must_use]
    pub fn is_all(&self) -> bool {
        self.0.is_empty()
    }

    /// True if the set names every library in `1..=num_libraries` (or names none)
    #[must_use]
    pub fn covers(&self, num_libraries: u32) -> bool {
        self.is_all() || (1..=num_libraries).all(|lib| self.0.contains(&lib))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Named library IDs in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }
}
impl FromIterator<u32> for RoleSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Parses comma separated IDs and inclusive ranges, e.g. `"1-3,5"`
impl FromStr for RoleSet {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || LayoutError::InvalidRangeSpec(s.to_string());
        let mut set = Self::default();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (lo, hi) = match part.split_once('-') {
                Some((lo, hi)) => (lo.trim(), hi.trim()),
                None => (part, part),
            };
            let lo: u32 = lo.parse().map_err(|_| invalid())?;
            let hi: u32 = hi.parse().map_err(|_| invalid())?;
            if lo > hi {
                return Err(invalid().into());
            }
            set.0.extend(lo..=hi);
        }
        Ok(set)
    }
}
impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all() {
            return f.write_str("all");
        }
        let mut ids = self.iter().peekable();
        let mut first = true;
        while let Some(lo) = ids.next() {
            let mut hi = lo;
            while ids.next_if(|&next| next == hi + 1).is_some() {
                hi += 1;
            }
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if lo == hi {
                write!(f, "{lo}")?;
            } else {
                write!(f, "{lo}-{hi}")?;
            }
        }
        Ok(())
    }
}

/// The hash and reference role sets of one layout
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSets {
    pub hash: RoleSet,
    pub reference: RoleSet,
}
impl RoleSets {
    /// Derives role sets from the default role flags of the store's libraries
    #[must_use]
    pub fn from_library_flags(store: &ReadStore) -> Self {
        let mut sets = Self::default();
        for library in store.libraries() {
            if library.is_default_hash() {
                sets.hash.insert(library.id().get());
            }
            if library.is_default_ref() {
                sets.reference.insert(library.id().get());
            }
        }
        sets
    }

    /// True if both roles draw from the same explicitly named libraries.
    ///
    /// Only then is the comparison all-vs-all; everything else is laid out triangular.
    #[must_use]
    pub fn is_symmetric(&self) -> bool {
        !self.hash.is_all() && self.hash == self.reference
    }

    pub(crate) fn get(&self, role: Role) -> &RoleSet {
        match role {
            Role::Hash => &self.hash,
            Role::Reference => &self.reference,
        }
    }

    /// Checks the sets against a store holding `num_libraries` libraries.
    ///
    /// Every named library must exist. When both sets are restricted, a library in neither
    /// of them is an error if `strict`, otherwise it is reported and skipped.
    pub fn validate(&self, num_libraries: u32, strict: bool) -> Result<()> {
        for role in [Role::Hash, Role::Reference] {
            if let Some(library) = self
                .get(role)
                .iter()
                .find(|&lib| lib == 0 || lib > num_libraries)
            {
                return Err(LayoutError::InvalidLibrarySpec {
                    role,
                    library,
                    num_libraries,
                }
                .into());
            }
        }

        if self.hash.is_all() || self.reference.is_all() {
            return Ok(());
        }
        for library in 1..=num_libraries {
            if self.hash.names(library) || self.reference.names(library) {
                continue;
            }
            if strict {
                return Err(LayoutError::LibraryNotClassified(library).into());
            }
            tracing::warn!("library {library} is in neither the hash nor the reference libraries");
        }
        Ok(())
    }
}

/// Settings of one job layout run, built with [`LayoutConfigBuilder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutConfig {
    min_overlap_length: u32,
    hash_block_length: u64,
    ref_block_length: u64,
    roles: RoleSets,
    check_all_libraries_used: bool,
    batch_max: u32,
}
impl LayoutConfig {
    #[must_use]
    pub fn builder() -> LayoutConfigBuilder {
        LayoutConfigBuilder::default()
    }
    #[must_use]
    pub fn min_overlap_length(&self) -> u32 {
        self.min_overlap_length
    }
    #[must_use]
    pub fn hash_block_length(&self) -> u64 {
        self.hash_block_length
    }
    #[must_use]
    pub fn ref_block_length(&self) -> u64 {
        self.ref_block_length
    }
    #[must_use]
    pub fn roles(&self) -> &RoleSets {
        &self.roles
    }
    #[must_use]
    pub fn check_all_libraries_used(&self) -> bool {
        self.check_all_libraries_used
    }
    #[must_use]
    pub fn batch_max(&self) -> u32 {
        self.batch_max
    }
}

/// Builder for [`LayoutConfig`].
///
/// Both block lengths are required; everything else has a default.
///
/// ```
/// use readstore::layout::LayoutConfigBuilder;
///
/// let config = LayoutConfigBuilder::default()
///     .hash_block_length(250)
///     .ref_block_length(250)
///     .min_overlap_length(500)
///     .build()
///     .unwrap();
/// assert_eq!(config.batch_max(), 1000);
/// ```
#[derive(Debug, Clone)]
pub struct LayoutConfigBuilder {
    min_overlap_length: u32,
    hash_block_length: Option<u64>,
    ref_block_length: Option<u64>,
    roles: RoleSets,
    check_all_libraries_used: bool,
    batch_max: u32,
}
impl Default for LayoutConfigBuilder {
    fn default() -> Self {
        Self {
            min_overlap_length: 0,
            hash_block_length: None,
            ref_block_length: None,
            roles: RoleSets::default(),
            check_all_libraries_used: true,
            batch_max: DEFAULT_BATCH_MAX,
        }
    }
}
impl LayoutConfigBuilder {
    /// Reads shorter than this contribute nothing to any job
    #[must_use]
    pub fn min_overlap_length(mut self, length: u32) -> Self {
        self.min_overlap_length = length;
        self
    }

    /// Bytes of sequence loaded into the hash table per job
    #[must_use]
    pub fn hash_block_length(mut self, length: u64) -> Self {
        self.hash_block_length = Some(length);
        self
    }

    /// Bases streamed against the hash table per job
    #[must_use]
    pub fn ref_block_length(mut self, length: u64) -> Self {
        self.ref_block_length = Some(length);
        self
    }

    #[must_use]
    pub fn hash_libraries(mut self, set: RoleSet) -> Self {
        self.roles.hash = set;
        self
    }

    #[must_use]
    pub fn ref_libraries(mut self, set: RoleSet) -> Self {
        self.roles.reference = set;
        self
    }

    /// Replace both role sets at once
    #[must_use]
    pub fn roles(mut self, roles: RoleSets) -> Self {
        self.roles = roles;
        self
    }

    /// Set whether a library in neither role set is an error (the default) or a warning
    #[must_use]
    pub fn check_all_libraries_used(mut self, check: bool) -> Self {
        self.check_all_libraries_used = check;
        self
    }

    #[must_use]
    pub fn batch_max(mut self, jobs: u32) -> Self {
        self.batch_max = jobs.max(1);
        self
    }

    pub fn build(self) -> Result<LayoutConfig> {
        let hash_block_length = self
            .hash_block_length
            .filter(|&len| len > 0)
            .ok_or(LayoutError::MissingBlockLength(Role::Hash))?;
        let ref_block_length = self
            .ref_block_length
            .filter(|&len| len > 0)
            .ok_or(LayoutError::MissingBlockLength(Role::Reference))?;
        Ok(LayoutConfig {
            min_overlap_length: self.min_overlap_length,
            hash_block_length,
            ref_block_length,
            roles: self.roles,
            check_all_libraries_used: self.check_all_libraries_used,
            batch_max: self.batch_max,
        })
    }
}

use std::fmt;

use bytemuck::{Pod, Zeroable};

use super::{LIBRARY_NAME_SIZE, MAX_LIBRARIES};

/// Reads of this library feed the hash table side by default
pub const LIBRARY_DEFAULT_HASH: u32 = 1 << 0;

/// Reads of this library feed the streamed reference side by default
pub const LIBRARY_DEFAULT_REF: u32 = 1 << 1;

/// A validated library identifier in `1..=MAX_LIBRARIES`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LibraryId(u32);
impl LibraryId {
    /// Wraps a raw library ID, rejecting zero and IDs beyond the library bit budget
    #[must_use]
    pub fn new(id: u32) -> Option<Self> {
        (1..=MAX_LIBRARIES).contains(&id).then_some(Self(id))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Position of this library in the in-core table
    pub(crate) fn index(self) -> usize {
        self.0 as usize - 1
    }
}
impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named group of reads sharing provenance and processing role.
///
/// This is stored identically in memory and on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct Library {
    library_id: u32,
    flags: u32,
    name: [u8; LIBRARY_NAME_SIZE],
}
impl Library {
    pub(crate) fn new(id: LibraryId, name: &str) -> Self {
        let mut library = Self {
            library_id: id.get(),
            flags: LIBRARY_DEFAULT_HASH | LIBRARY_DEFAULT_REF,
            name: [0; LIBRARY_NAME_SIZE],
        };
        library.set_name(name);
        library
    }

    #[must_use]
    pub fn id(&self) -> LibraryId {
        LibraryId(self.library_id)
    }

    pub(crate) fn raw_id(&self) -> u32 {
        self.library_id
    }

    /// Returns the library name, stopping at the first NUL byte
    #[must_use]
    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(LIBRARY_NAME_SIZE);
        std::str::from_utf8(&self.name[..len]).unwrap_or_default()
    }

    /// Replaces the library name.
    ///
    /// Names longer than the on-disk field are truncated on a character boundary, always
    /// leaving room for a terminating NUL.
    pub fn set_name(&mut self, name: &str) {
        let mut len = name.len().min(LIBRARY_NAME_SIZE - 1);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        self.name = [0; LIBRARY_NAME_SIZE];
        self.name[..len].copy_from_slice(&name.as_bytes()[..len]);
    }

    #[must_use]
    pub fn flags(&self) -> u32 {
        self.flags
    }
    #[must_use]
    pub fn is_default_hash(&self) -> bool {
        self.flags & LIBRARY_DEFAULT_HASH != 0
    }
    #[must_use]
    pub fn is_default_ref(&self) -> bool {
        self.flags & LIBRARY_DEFAULT_REF != 0
    }
    pub fn set_default_hash(&mut self, enabled: bool) {
        self.set_flag(LIBRARY_DEFAULT_HASH, enabled);
    }
    pub fn set_default_ref(&mut self, enabled: bool) {
        self.set_flag(LIBRARY_DEFAULT_REF, enabled);
    }
    fn set_flag(&mut self, flag: u32, enabled: bool) {
        if enabled {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }
}

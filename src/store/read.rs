use std::fmt;

use bytemuck::{Pod, Zeroable};

use super::{BlobRef, LibraryId};

/// A read identifier.
///
/// Read IDs are dense and 1-based; ID `n` lives at position `n - 1` of the read table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReadId(u32);
impl ReadId {
    /// Wraps a raw read ID, rejecting zero
    #[must_use]
    pub fn new(id: u32) -> Option<Self> {
        (id != 0).then_some(Self(id))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize - 1
    }
}
impl fmt::Display for ReadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A refinement stage of a read's sequence
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Raw,
    Corrected,
    Trimmed,
}
impl Stage {
    /// All stages in storage order
    pub const ALL: [Stage; 3] = [Stage::Raw, Stage::Corrected, Stage::Trimmed];

    /// Stages in precedence order: the first present one is the active sequence
    pub const PRECEDENCE: [Stage; 3] = [Stage::Trimmed, Stage::Corrected, Stage::Raw];

    fn slot(self) -> usize {
        match self {
            Self::Raw => 0,
            Self::Corrected => 1,
            Self::Trimmed => 2,
        }
    }

    pub(crate) fn from_slot(slot: u32) -> Option<Self> {
        match slot {
            0 => Some(Self::Raw),
            1 => Some(Self::Corrected),
            2 => Some(Self::Trimmed),
            _ => None,
        }
    }

    pub(crate) fn as_slot(self) -> u32 {
        self.slot() as u32
    }
}

/// Fixed-size metadata for one read.
///
/// This is stored identically in memory and on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct Read {
    read_id: u32,
    library_id: u32,

    /// Lengths per stage, indexed by [`Stage`] slot; zero means absent
    lengths: [u32; 3],

    clear_begin: u32,
    clear_end: u32,
    reserved: u32,

    /// Payload references per stage, indexed by [`Stage`] slot
    blobs: [BlobRef; 3],
}
impl Read {
    pub(crate) fn new(id: ReadId, library: LibraryId) -> Self {
        Self {
            read_id: id.get(),
            library_id: library.get(),
            lengths: [0; 3],
            clear_begin: 0,
            clear_end: 0,
            reserved: 0,
            blobs: [BlobRef::default(); 3],
        }
    }

    #[must_use]
    pub fn id(&self) -> ReadId {
        ReadId(self.read_id)
    }

    pub(crate) fn raw_id(&self) -> u32 {
        self.read_id
    }

    /// Raw library ID as stored; only validated on access through the store
    #[must_use]
    pub fn library_id(&self) -> u32 {
        self.library_id
    }

    #[must_use]
    pub fn raw_length(&self) -> u32 {
        self.lengths[Stage::Raw.slot()]
    }
    #[must_use]
    pub fn corrected_length(&self) -> u32 {
        self.lengths[Stage::Corrected.slot()]
    }
    #[must_use]
    pub fn trimmed_length(&self) -> u32 {
        self.lengths[Stage::Trimmed.slot()]
    }

    #[must_use]
    pub fn stage_length(&self, stage: Stage) -> u32 {
        self.lengths[stage.slot()]
    }

    /// The most refined stage present: trimmed, then corrected, then raw
    #[must_use]
    pub fn active_stage(&self) -> Option<Stage> {
        Stage::PRECEDENCE
            .into_iter()
            .find(|&stage| self.stage_length(stage) > 0)
    }

    /// Length of the active sequence, or zero if no stage is present
    #[must_use]
    pub fn sequence_length(&self) -> u32 {
        self.active_stage().map_or(0, |stage| self.stage_length(stage))
    }

    #[must_use]
    pub fn clear_range(&self) -> (u32, u32) {
        (self.clear_begin, self.clear_end)
    }

    #[must_use]
    pub fn blob(&self, stage: Stage) -> Option<BlobRef> {
        let blob = self.blobs[stage.slot()];
        (!blob.is_empty()).then_some(blob)
    }

    pub(crate) fn set_clear_range(&mut self, begin: u32, end: u32) {
        self.clear_begin = begin;
        self.clear_end = end;
    }

    /// Replaces a stage's length and payload reference.
    ///
    /// Resets the clear range to the full sequence when this makes `stage` the active one.
    pub(crate) fn set_stage(&mut self, stage: Stage, length: u32, blob: BlobRef) {
        self.lengths[stage.slot()] = length;
        self.blobs[stage.slot()] = blob;
        if self.active_stage() == Some(stage) {
            self.set_clear_range(0, length);
        }
    }

    pub(crate) fn set_blob(&mut self, stage: Stage, blob: BlobRef) {
        self.blobs[stage.slot()] = blob;
    }
}

/// A read's payload at one refinement stage.
///
/// Filled by the store when loading and handed back to it when stashing. The buffer is
/// reused across loads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadData {
    id: ReadId,
    library: LibraryId,
    stage: Stage,
    length: u32,
    payload: Vec<u8>,
}
impl ReadData {
    #[must_use]
    pub fn new(id: ReadId, library: LibraryId) -> Self {
        Self {
            id,
            library,
            stage: Stage::Raw,
            length: 0,
            payload: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ReadId {
        self.id
    }
    #[must_use]
    pub fn library(&self) -> LibraryId {
        self.library
    }
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }
    /// Sequence length in bases
    #[must_use]
    pub fn length(&self) -> u32 {
        self.length
    }
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Replaces the payload with `payload`, describing a sequence of `length` bases at `stage`
    pub fn set_payload(&mut self, stage: Stage, length: u32, payload: &[u8]) {
        self.stage = stage;
        self.length = length;
        self.payload.clear();
        self.payload.extend_from_slice(payload);
    }

    /// Resets this buffer to describe `read` before its payload is loaded
    pub(crate) fn reset(&mut self, id: ReadId, library: LibraryId, stage: Stage, length: u32) {
        self.id = id;
        self.library = library;
        self.stage = stage;
        self.length = length;
        self.payload.clear();
    }

    pub(crate) fn payload_mut(&mut self) -> &mut Vec<u8> {
        &mut self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_with(raw: u32, corrected: u32, trimmed: u32) -> Read {
        let mut read = Read::new(ReadId::new(1).unwrap(), LibraryId::new(1).unwrap());
        read.lengths = [raw, corrected, trimmed];
        read
    }

    #[test]
    fn test_read_record_size() {
        assert_eq!(size_of::<Read>(), 80);
    }

    #[test]
    fn test_read_id_rejects_zero() {
        assert!(ReadId::new(0).is_none());
        assert_eq!(ReadId::new(5).unwrap().index(), 4);
    }

    #[test]
    fn test_sequence_length_precedence() {
        for raw in [0, 100] {
            for corrected in [0, 90] {
                for trimmed in [0, 80] {
                    let read = read_with(raw, corrected, trimmed);
                    let expected = if trimmed != 0 {
                        trimmed
                    } else if corrected != 0 {
                        corrected
                    } else {
                        raw
                    };
                    assert_eq!(
                        read.sequence_length(),
                        expected,
                        "raw={raw} corrected={corrected} trimmed={trimmed}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_active_stage() {
        assert_eq!(read_with(0, 0, 0).active_stage(), None);
        assert_eq!(read_with(10, 0, 0).active_stage(), Some(Stage::Raw));
        assert_eq!(read_with(10, 9, 0).active_stage(), Some(Stage::Corrected));
        assert_eq!(read_with(0, 0, 8).active_stage(), Some(Stage::Trimmed));
    }

    #[test]
    fn test_set_stage_resets_clear_range_when_active() {
        let mut read = read_with(0, 0, 0);
        let blob = BlobRef::new(1, 0, 16);
        read.set_stage(Stage::Corrected, 50, blob);
        assert_eq!(read.clear_range(), (0, 50));
        assert_eq!(read.blob(Stage::Corrected), Some(blob));

        // Raw is shadowed by corrected, so the clear range stays put
        read.set_clear_range(5, 45);
        read.set_stage(Stage::Raw, 70, BlobRef::new(1, 24, 16));
        assert_eq!(read.clear_range(), (5, 45));
        assert_eq!(read.sequence_length(), 50);
    }

    #[test]
    fn test_stage_slots() {
        for stage in Stage::ALL {
            assert_eq!(Stage::from_slot(stage.as_slot()), Some(stage));
        }
        assert_eq!(Stage::from_slot(3), None);
    }
}

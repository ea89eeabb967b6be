//! Tag records and the encoding of the per-object tag slot.
//!
//! A slot holds one 64-bit value. `0` means untagged, two small values are
//! reserved for the sentinel markers and everything else is a handle into
//! a [`TagArena`](super::TagArena). The record itself never lives in the
//! slot.

use bitflags::bitflags;

/// Slot value of an untagged object.
pub const UNTAGGED: i64 = 0;
/// Object touched by the current traversal and reachable without passing
/// through the start object.
pub const FRESH_MARKER: i64 = 1;
/// Object retained by the start object, waiting to be collected into the
/// result.
pub const HELD_MARKER: i64 = 2;

/// Low-word values below this are never handle indices.
const RESERVED_LOW: u64 = 3;
const LOW_MASK: u64 = 0xFFFF_FFFF;

bitflags! {
    /// Retention flags carried by one [`TagInfo`] entry.
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TagState: u8 {
        const START = 0b0001;
        const IN_SUBTREE = 0b0010;
        const REACHABLE_OUTSIDE = 0b0100;
        const VISITED = 0b1000;
    }
}

impl TagState {
    pub fn new(start: bool, in_subtree: bool, reachable_outside: bool, visited: bool) -> Self {
        let mut state = TagState::empty();
        state.set(TagState::START, start);
        state.set(TagState::IN_SUBTREE, in_subtree);
        state.set(TagState::REACHABLE_OUTSIDE, reachable_outside);
        state.set(TagState::VISITED, visited);
        state
    }

    /// State of the object whose retained size is being computed.
    pub fn start() -> Self {
        TagState::START | TagState::IN_SUBTREE
    }

    /// Retained means inside the start object's subtree and not reachable
    /// from any root around it.
    pub fn is_retained(&self) -> bool {
        self.contains(TagState::IN_SUBTREE) && !self.contains(TagState::REACHABLE_OUTSIDE)
    }

    pub fn is_start(&self) -> bool {
        self.contains(TagState::START)
    }
}

/// One marking contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagInfo {
    pub state: TagState,
}

/// Per-object record addressed by a handle in the object's tag slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub class_id: i64,
    pub size: i64,
    infos: Vec<TagInfo>,
}

impl Tag {
    pub fn new(class_id: i64, size: i64, state: TagState) -> Self {
        Self {
            class_id,
            size,
            infos: vec![TagInfo { state }],
        }
    }

    pub fn infos(&self) -> &[TagInfo] {
        &self.infos
    }

    pub fn push_info(&mut self, state: TagState) {
        self.infos.push(TagInfo { state });
    }

    pub fn is_retained(&self) -> bool {
        self.infos.iter().any(|info| info.state.is_retained())
    }

    pub fn is_start(&self) -> bool {
        self.infos.iter().any(|info| info.state.is_start())
    }

    pub(crate) fn take_infos(&mut self) -> Vec<TagInfo> {
        std::mem::take(&mut self.infos)
    }
}

/// Address of a record inside one arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagHandle {
    pub arena: u16,
    pub generation: u16,
    pub index: u32,
}

impl TagHandle {
    pub fn encode(self) -> i64 {
        debug_assert!(self.arena != 0, "arena ids start at 1");
        let raw = (u64::from(self.arena) << 48)
            | (u64::from(self.generation) << 32)
            | (u64::from(self.index) + RESERVED_LOW);
        raw as i64
    }
}

/// Decoded slot value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotTag {
    Untagged,
    Fresh,
    Held,
    Record(TagHandle),
    /// A value this engine never writes.
    Foreign(i64),
}

impl SlotTag {
    pub fn decode(raw: i64) -> Self {
        match raw {
            UNTAGGED => return SlotTag::Untagged,
            FRESH_MARKER => return SlotTag::Fresh,
            HELD_MARKER => return SlotTag::Held,
            _ => {}
        }

        let bits = raw as u64;
        let arena = (bits >> 48) as u16;
        let low = bits & LOW_MASK;
        if arena == 0 || low < RESERVED_LOW {
            return SlotTag::Foreign(raw);
        }

        SlotTag::Record(TagHandle {
            arena,
            generation: (bits >> 32) as u16,
            index: (low - RESERVED_LOW) as u32,
        })
    }

    pub fn encode(self) -> i64 {
        match self {
            SlotTag::Untagged => UNTAGGED,
            SlotTag::Fresh => FRESH_MARKER,
            SlotTag::Held => HELD_MARKER,
            SlotTag::Record(handle) => handle.encode(),
            SlotTag::Foreign(raw) => raw,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, SlotTag::Fresh | SlotTag::Held)
    }
}

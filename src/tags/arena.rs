//! Reference-counted tag records behind generation-checked handles.
//!
//! One arena is created per top-level operation and threaded through every
//! phase, so its allocation balance describes exactly that operation.

use std::sync::atomic::{AtomicU16, Ordering};

use thiserror::Error;

use super::model::{SlotTag, Tag, TagHandle, TagInfo, TagState};
use crate::error::{SizesError, SizesResult};

static NEXT_ARENA_ID: AtomicU16 = AtomicU16::new(1);

fn next_arena_id() -> u16 {
    loop {
        let id = NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

/// Tag records still allocated when the arena was expected to be empty.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("MEMORY LEAK FOUND: {outstanding} tag records outstanding")]
pub struct TagLeak {
    pub outstanding: i64,
}

#[derive(Debug)]
struct Record {
    tag: Tag,
    refcount: u32,
}

#[derive(Debug, Default)]
struct Entry {
    generation: u16,
    record: Option<Record>,
}

/// Owner of every [`Tag`] created during one operation.
///
/// # Examples
///
/// ```
/// use retained_size::tags::{TagArena, TagState};
///
/// let mut arena = TagArena::new();
/// let value = arena.create(0, 16, TagState::VISITED);
/// assert_eq!(arena.balance(), 1);
///
/// arena.ref_tag(value).unwrap();
/// assert!(arena.unref(value).unwrap().is_none());
/// assert!(arena.unref(value).unwrap().is_some());
/// assert_eq!(arena.balance(), 0);
/// assert!(arena.get(value).is_none());
/// ```
#[derive(Debug)]
pub struct TagArena {
    id: u16,
    entries: Vec<Entry>,
    free: Vec<u32>,
    balance: i64,
}

impl Default for TagArena {
    fn default() -> Self {
        Self::new()
    }
}

impl TagArena {
    pub fn new() -> Self {
        Self {
            id: next_arena_id(),
            entries: Vec::new(),
            free: Vec::new(),
            balance: 0,
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    /// Allocate a record with refcount 1 and a single entry. Returns the
    /// value to store in the object's tag slot.
    pub fn create(&mut self, class_id: i64, size: i64, state: TagState) -> i64 {
        let record = Record {
            tag: Tag::new(class_id, size, state),
            refcount: 1,
        };

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.entries.push(Entry::default());
                (self.entries.len() - 1) as u32
            }
        };

        let entry = &mut self.entries[index as usize];
        entry.record = Some(record);
        self.balance += 1;

        TagHandle {
            arena: self.id,
            generation: entry.generation,
            index,
        }
        .encode()
    }

    /// Handle addressed by `value` if it names a live record of this arena.
    pub fn live_handle(&self, value: i64) -> Option<TagHandle> {
        let SlotTag::Record(handle) = SlotTag::decode(value) else {
            return None;
        };
        if handle.arena != self.id {
            return None;
        }

        let entry = self.entries.get(handle.index as usize)?;
        (entry.generation == handle.generation && entry.record.is_some()).then_some(handle)
    }

    pub fn is_live(&self, value: i64) -> bool {
        self.live_handle(value).is_some()
    }

    pub fn get(&self, value: i64) -> Option<&Tag> {
        let handle = self.live_handle(value)?;
        self.entries[handle.index as usize]
            .record
            .as_ref()
            .map(|record| &record.tag)
    }

    pub fn get_mut(&mut self, value: i64) -> Option<&mut Tag> {
        let handle = self.live_handle(value)?;
        self.entries[handle.index as usize]
            .record
            .as_mut()
            .map(|record| &mut record.tag)
    }

    fn record_mut(&mut self, value: i64) -> SizesResult<&mut Record> {
        let handle = self.live_handle(value).ok_or(SizesError::StaleTag(value))?;
        self.entries[handle.index as usize]
            .record
            .as_mut()
            .ok_or(SizesError::StaleTag(value))
    }

    pub fn ref_tag(&mut self, value: i64) -> SizesResult<()> {
        self.record_mut(value)?.refcount += 1;
        Ok(())
    }

    /// Drop one reference. The record is freed when the count reaches zero
    /// and handed back to the caller; releasing a record whose retained
    /// entries were never drained is refused.
    pub fn unref(&mut self, value: i64) -> SizesResult<Option<Tag>> {
        let record = self.record_mut(value)?;
        if record.refcount > 1 {
            record.refcount -= 1;
            return Ok(None);
        }
        if record.tag.is_retained() {
            return Err(SizesError::UndrainedTag(value));
        }

        Ok(self.free_entry(value))
    }

    /// Consume the entries of a record so it can be released.
    pub fn drain(&mut self, value: i64) -> SizesResult<Vec<TagInfo>> {
        Ok(self.record_mut(value)?.tag.take_infos())
    }

    /// Free a record regardless of its refcount or entries. Used when an
    /// operation is abandoned and its tags are purged from the heap.
    pub fn discard(&mut self, value: i64) -> bool {
        self.live_handle(value).is_some() && self.free_entry(value).is_some()
    }

    fn free_entry(&mut self, value: i64) -> Option<Tag> {
        let handle = self.live_handle(value)?;
        let entry = &mut self.entries[handle.index as usize];
        let record = entry.record.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.balance -= 1;
        Some(record.tag)
    }

    /// Allocations minus releases.
    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn live_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.record.is_some())
            .count()
    }

    pub fn verify_balanced(&self) -> Result<(), TagLeak> {
        match self.balance {
            0 => Ok(()),
            outstanding => Err(TagLeak { outstanding }),
        }
    }
}

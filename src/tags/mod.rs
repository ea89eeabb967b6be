//! Tag model and lifecycle.

pub mod arena;
pub mod model;

pub use arena::{TagArena, TagLeak};
pub use model::{SlotTag, Tag, TagHandle, TagInfo, TagState, FRESH_MARKER, HELD_MARKER, UNTAGGED};

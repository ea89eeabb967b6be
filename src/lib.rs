//! Retained size estimation over a tag-based heap introspection service.
//!
//! Given one object, computes the total shallow size of everything that
//! would become unreachable if that object were removed, together with the
//! list of those held objects. The heap is never copied: all bookkeeping
//! lives in the per-object `i64` tag slot the service exposes.

pub mod action;
pub mod config;
pub mod error;
pub mod execution;
pub mod interfaces;
pub mod resolver;
pub mod simulated;
pub mod tags;
pub mod traversal;

pub use action::{clean_heap_tags, compute_retained_size_and_held_objects, RetainedSizeAction};
pub use config::SizesConfig;
pub use error::{ServiceError, SizesError, SizesResult};
pub use traversal::{RetainedSizeReport, TraversalDriver};

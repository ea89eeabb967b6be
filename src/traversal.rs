//! Retained size computation over the shared tag slots.
//!
//! Every object's tag slot goes through three generations in one run:
//!
//! 1. Stale reclamation clears whatever earlier runs left on objects
//!    reachable from the roots or from the start object, so `0` means "not
//!    seen yet".
//! 2. The start object gets a `{START, IN_SUBTREE}` record. An outside sweep
//!    from the roots, never expanding the start object, marks every object
//!    it reaches with [`FRESH_MARKER`]. A retention sweep from the start
//!    object then gives every referent that is still untagged its own
//!    `{IN_SUBTREE}` record: an object left untagged by the outside sweep has
//!    no root path avoiding the start object.
//! 3. Summation walks the whole heap, folds each retained record's size into
//!    the total and leaves [`HELD_MARKER`] on the held objects and `0`
//!    everywhere else.
//!
//! An object is never expanded twice by one sweep, so cycles terminate and
//! every object is counted at most once.

use std::collections::HashSet;

use crate::error::{SizesError, SizesResult};
use crate::execution::CancellationToken;
use crate::interfaces::{
    EdgeVisit, HeapFilter, HeapIntrospection, IterationControl, VisitControl,
};
use crate::resolver;
use crate::tags::{SlotTag, TagArena, TagState, FRESH_MARKER, HELD_MARKER, UNTAGGED};

/// Result of one successful computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedSizeReport<O> {
    pub retained_size: i64,
    /// Objects kept alive only through the start object. The start object
    /// itself is counted in `retained_size` but not listed here.
    pub held_objects: Vec<O>,
}

pub struct TraversalDriver<'a, H: HeapIntrospection + ?Sized> {
    heap: &'a H,
    token: &'a CancellationToken,
    arena: TagArena,
}

impl<'a, H: HeapIntrospection + ?Sized> TraversalDriver<'a, H> {
    pub fn new(heap: &'a H, token: &'a CancellationToken) -> Self {
        Self {
            heap,
            token,
            arena: TagArena::new(),
        }
    }

    pub fn arena(&self) -> &TagArena {
        &self.arena
    }

    /// Run every phase for `object`.
    pub fn run(&mut self, object: H::Object) -> SizesResult<RetainedSizeReport<H::Object>> {
        self.reclaim_stale_tags(object)?;
        self.tag_start_object(object)?;
        self.mark_reachable_outside()?;
        self.propagate_retention(object)?;
        let retained_size = self.sum_retained()?;
        let held_objects = self.collect_held_objects()?;

        Ok(RetainedSizeReport {
            retained_size,
            held_objects,
        })
    }

    /// Clear every non-zero tag on objects reachable from the roots or from
    /// `object`. Returns the number of slots cleared.
    pub fn reclaim_stale_tags(&mut self, object: H::Object) -> SizesResult<usize> {
        let token = self.token;
        let arena = &mut self.arena;
        let mut reclaimed = 0usize;

        let mut clear = |visit: &mut EdgeVisit<'_>| {
            if token.should_stop() {
                return VisitControl::Abort;
            }

            let value = *visit.tag;
            if value != UNTAGGED {
                arena.discard(value);
                *visit.tag = UNTAGGED;
                reclaimed += 1;
            }
            VisitControl::Visit
        };

        log::debug!("find stale tags");
        self.heap.follow_references(None, &mut clear)?;
        self.token.check()?;
        self.heap.follow_references(Some(object), &mut clear)?;
        self.token.check()?;

        log::debug!("reclaimed {reclaimed} stale tags");
        Ok(reclaimed)
    }

    /// Give `object` a fresh start record.
    pub fn tag_start_object(&mut self, object: H::Object) -> SizesResult<()> {
        let value = self.arena.create(0, 0, TagState::start());
        if let Err(err) = self.heap.set_tag(object, value) {
            self.arena.discard(value);
            return Err(err.into());
        }

        self.token.check()
    }

    /// Mark everything reachable from a root without passing through the
    /// start object.
    pub fn mark_reachable_outside(&mut self) -> SizesResult<()> {
        let token = self.token;

        log::debug!("tag heap outside the start object");
        self.heap.follow_references(None, &mut |visit| {
            if token.should_stop() {
                return VisitControl::Abort;
            }

            match SlotTag::decode(*visit.tag) {
                SlotTag::Untagged => {
                    *visit.tag = FRESH_MARKER;
                    VisitControl::Visit
                }
                // The start record blocks every path through the start
                // object; anything else was already expanded.
                _ => VisitControl::Skip,
            }
        })?;

        self.token.check()
    }

    /// Tag every object reachable from `object` that the outside sweep did
    /// not reach.
    pub fn propagate_retention(&mut self, object: H::Object) -> SizesResult<()> {
        let token = self.token;
        let arena = &mut self.arena;

        log::debug!("tag objects retained by the start object");
        self.heap.follow_references(Some(object), &mut |visit| {
            if token.should_stop() {
                return VisitControl::Abort;
            }

            match SlotTag::decode(*visit.tag) {
                SlotTag::Untagged => {
                    *visit.tag = arena.create(visit.class_id, visit.size, TagState::IN_SUBTREE);
                    VisitControl::Visit
                }
                _ => VisitControl::Skip,
            }
        })?;

        self.token.check()
    }

    /// Fold retained records into the total and retag held objects.
    ///
    /// # Panics
    ///
    /// If any tag record is still allocated once the whole heap has been
    /// summed. The bookkeeping is broken at that point and no size it
    /// produced can be trusted.
    pub fn sum_retained(&mut self) -> SizesResult<i64> {
        let token = self.token;
        let arena = &mut self.arena;
        let mut retained_size = 0i64;
        let mut failure: Option<SizesError> = None;

        log::debug!("calculate retained size");
        self.heap.iterate_heap(HeapFilter::All, &mut |visit| {
            if token.should_stop() {
                return IterationControl::Abort;
            }

            let value = *visit.tag;
            if value == UNTAGGED {
                return IterationControl::Continue;
            }

            *visit.tag = UNTAGGED;
            let Some(tag) = arena.get(value) else {
                // Fresh marker of this run, or leftovers of an earlier one.
                return IterationControl::Continue;
            };

            let is_start = tag.is_start();
            let infos = match arena.drain(value) {
                Ok(infos) => infos,
                Err(err) => {
                    failure = Some(err);
                    return IterationControl::Abort;
                }
            };
            if infos.iter().any(|info| info.state.is_retained()) {
                retained_size += visit.size;
                if !is_start {
                    *visit.tag = HELD_MARKER;
                }
            }

            if let Err(err) = arena.unref(value) {
                failure = Some(err);
                return IterationControl::Abort;
            }
            IterationControl::Continue
        })?;

        if let Some(err) = failure {
            return Err(err);
        }
        self.token.check()?;

        if let Err(leak) = self.arena.verify_balanced() {
            log::error!("{leak}");
            panic!("{leak}");
        }

        Ok(retained_size)
    }

    pub fn collect_held_objects(&self) -> SizesResult<Vec<H::Object>> {
        log::debug!("collect held objects");
        resolver::resolve_objects_by_tags(self.heap, &[HELD_MARKER])
    }

    /// Best-effort cleanup after a failed or cancelled run: clear every tag
    /// in the heap and free every record this driver still owns.
    pub fn abandon(&mut self) -> SizesResult<usize> {
        let arena = &mut self.arena;
        let cleared = resolver::purge_tags_except(self.heap, &HashSet::new(), &mut |value| {
            arena.discard(value);
        })?;

        if arena.balance() != 0 {
            log::warn!(
                "{} tag records were not attached to any object",
                arena.balance()
            );
        }
        Ok(cleared)
    }
}

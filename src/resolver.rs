//! Batch tag resolution and heap-wide tag purging.

use std::collections::HashSet;

use crate::error::SizesResult;
use crate::interfaces::{HeapFilter, HeapIntrospection, IterationControl};

/// Every live object carrying one of `tags`, paired with its tag.
///
/// The service buffer is copied out and handed back before returning.
pub fn resolve_by_tags<H>(heap: &H, tags: &[i64]) -> SizesResult<Vec<(H::Object, i64)>>
where
    H: HeapIntrospection + ?Sized,
{
    log::debug!("call get_objects_with_tags for {} tags", tags.len());
    let buffer = heap.get_objects_with_tags(tags)?;
    let resolved = buffer.as_ref().to_vec();
    heap.deallocate(buffer)?;
    log::debug!("get_objects_with_tags finished: {} objects", resolved.len());

    Ok(resolved)
}

/// Like [`resolve_by_tags`] without the tags.
pub fn resolve_objects_by_tags<H>(heap: &H, tags: &[i64]) -> SizesResult<Vec<H::Object>>
where
    H: HeapIntrospection + ?Sized,
{
    Ok(resolve_by_tags(heap, tags)?
        .into_iter()
        .map(|(object, _)| object)
        .collect())
}

/// Clear every tag not in `keep` back to zero.
///
/// `on_release` runs once per distinct cleared value, however many objects
/// shared it. Returns the number of objects whose slot was cleared.
pub fn purge_tags_except<H>(
    heap: &H,
    keep: &HashSet<i64>,
    on_release: &mut dyn FnMut(i64),
) -> SizesResult<usize>
where
    H: HeapIntrospection + ?Sized,
{
    let mut released = HashSet::new();
    let mut cleared = 0usize;

    log::debug!("remove tags");
    heap.iterate_heap(HeapFilter::TaggedOnly, &mut |visit| {
        let value = *visit.tag;
        if keep.contains(&value) {
            return IterationControl::Continue;
        }

        *visit.tag = 0;
        cleared += 1;
        if released.insert(value) {
            on_release(value);
        }
        IterationControl::Continue
    })?;
    log::debug!("tags removed from {cleared} objects");

    Ok(cleared)
}

/// Purge everything outside `tags`, then resolve what is left.
pub fn purge_and_resolve<H>(
    heap: &H,
    tags: &[i64],
    on_release: &mut dyn FnMut(i64),
) -> SizesResult<Vec<(H::Object, i64)>>
where
    H: HeapIntrospection + ?Sized,
{
    let unique: HashSet<i64> = tags.iter().copied().collect();
    purge_tags_except(heap, &unique, on_release)?;

    let mut unique: Vec<i64> = unique.into_iter().collect();
    unique.sort_unstable();
    resolve_by_tags(heap, &unique)
}

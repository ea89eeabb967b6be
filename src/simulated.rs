//! Deterministic in-memory heap implementing the full introspection service.
//!
//! Objects are plain records with a class id, a shallow size, a tag slot
//! and an ordered list of outgoing references. Roots are explicit. Threads
//! are named records that can be suspended and resumed. Every service call
//! is counted and can be made to fail once, which is what the tests use to
//! drive error paths.
//!
//! # Examples
//!
//! ```
//! use retained_size::interfaces::{HeapIntrospection, ReferenceKind};
//! use retained_size::simulated::SimulatedHeap;
//!
//! let heap = SimulatedHeap::new();
//! let holder = heap.allocate(1, 16);
//! let child = heap.allocate(2, 24);
//! heap.add_reference(holder, child);
//! heap.add_root(ReferenceKind::StackLocal, holder);
//!
//! assert_eq!(heap.object_count(), 2);
//! assert_eq!(heap.get_tag(child).unwrap(), 0);
//! ```

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;

use crate::error::ServiceError;
use crate::interfaces::{
    EdgeCallback, EdgeVisit, HeapFilter, HeapIntrospection, IterationControl, ObjectCallback,
    ObjectVisit, ReferenceKind, ThreadControl, VisitControl,
};

/// Handle of an object in a [`SimulatedHeap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub usize);

/// Handle of a thread in a [`SimulatedHeap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimulatedThread(pub usize);

/// Result storage owned by the simulated service until deallocated.
#[derive(Debug)]
pub struct SimulatedBuffer {
    id: u64,
    entries: Vec<(ObjectId, i64)>,
}

impl AsRef<[(ObjectId, i64)]> for SimulatedBuffer {
    fn as_ref(&self) -> &[(ObjectId, i64)] {
        &self.entries
    }
}

/// Call counters exposed for verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub traversals: usize,
    pub iterations: usize,
    pub edges_reported: usize,
    pub objects_reported: usize,
    pub buffers_allocated: usize,
    pub buffers_deallocated: usize,
    pub suspends: usize,
    pub resumes: usize,
    /// Suspended thread count observed when the last traversal started.
    pub suspended_during_last_traversal: usize,
}

#[derive(Debug)]
struct HeapObject {
    class_id: i64,
    size: i64,
    tag: i64,
    references: Vec<(ReferenceKind, ObjectId)>,
}

#[derive(Debug)]
struct ThreadRecord {
    name: String,
    suspended: bool,
    refuses_suspension: bool,
}

#[derive(Debug, Default)]
struct Failures {
    traversal: Option<ServiceError>,
    iteration: Option<ServiceError>,
    lookup: Option<ServiceError>,
    deallocate: Option<ServiceError>,
    thread_enumeration: Option<ServiceError>,
}

#[derive(Debug)]
struct HeapState {
    objects: Vec<HeapObject>,
    roots: Vec<(ReferenceKind, ObjectId)>,
    threads: Vec<ThreadRecord>,
    current_thread: usize,
    outstanding_buffers: HashSet<u64>,
    next_buffer: u64,
    failures: Failures,
    stats: HeapStats,
}

impl HeapState {
    fn object(&self, id: ObjectId) -> Result<&HeapObject, ServiceError> {
        self.objects.get(id.0).ok_or(ServiceError::InvalidObject)
    }

    fn object_mut(&mut self, id: ObjectId) -> Result<&mut HeapObject, ServiceError> {
        self.objects.get_mut(id.0).ok_or(ServiceError::InvalidObject)
    }

    fn thread_mut(&mut self, thread: SimulatedThread) -> Result<&mut ThreadRecord, ServiceError> {
        self.threads.get_mut(thread.0).ok_or(ServiceError::InvalidThread)
    }

    fn suspended_count(&self) -> usize {
        self.threads.iter().filter(|thread| thread.suspended).count()
    }
}

/// In-memory heap and thread table.
#[derive(Debug)]
pub struct SimulatedHeap {
    state: Mutex<HeapState>,
}

impl Default for SimulatedHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHeap {
    /// An empty heap whose only thread, `main`, is the current one.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HeapState {
                objects: Vec::new(),
                roots: Vec::new(),
                threads: vec![ThreadRecord {
                    name: "main".to_string(),
                    suspended: false,
                    refuses_suspension: false,
                }],
                current_thread: 0,
                outstanding_buffers: HashSet::new(),
                next_buffer: 0,
                failures: Failures::default(),
                stats: HeapStats::default(),
            }),
        }
    }

    pub fn allocate(&self, class_id: i64, size: i64) -> ObjectId {
        let mut state = self.state.lock();
        state.objects.push(HeapObject {
            class_id,
            size,
            tag: 0,
            references: Vec::new(),
        });
        ObjectId(state.objects.len() - 1)
    }

    /// Add a field reference `from -> to`.
    pub fn add_reference(&self, from: ObjectId, to: ObjectId) {
        self.add_reference_of_kind(from, ReferenceKind::Field, to);
    }

    pub fn add_reference_of_kind(&self, from: ObjectId, kind: ReferenceKind, to: ObjectId) {
        let mut state = self.state.lock();
        assert!(to.0 < state.objects.len(), "reference to unknown object {to:?}");
        state.objects[from.0].references.push((kind, to));
    }

    pub fn clear_references(&self, object: ObjectId) {
        self.state.lock().objects[object.0].references.clear();
    }

    pub fn add_root(&self, kind: ReferenceKind, object: ObjectId) {
        debug_assert!(kind.is_root(), "{kind:?} is not a root kind");
        let mut state = self.state.lock();
        assert!(object.0 < state.objects.len(), "root to unknown object {object:?}");
        state.roots.push((kind, object));
    }

    pub fn remove_roots_to(&self, object: ObjectId) {
        self.state.lock().roots.retain(|(_, target)| *target != object);
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn shallow_size(&self, object: ObjectId) -> i64 {
        self.state.lock().objects[object.0].size
    }

    pub fn references_of(&self, object: ObjectId) -> Vec<ObjectId> {
        self.state.lock().objects[object.0]
            .references
            .iter()
            .map(|(_, target)| *target)
            .collect()
    }

    pub fn roots(&self) -> Vec<ObjectId> {
        self.state.lock().roots.iter().map(|(_, target)| *target).collect()
    }

    /// Objects whose slot is not zero.
    pub fn tagged_objects(&self) -> Vec<(ObjectId, i64)> {
        self.state
            .lock()
            .objects
            .iter()
            .enumerate()
            .filter(|(_, object)| object.tag != 0)
            .map(|(index, object)| (ObjectId(index), object.tag))
            .collect()
    }

    pub fn stats(&self) -> HeapStats {
        self.state.lock().stats.clone()
    }

    pub fn outstanding_buffers(&self) -> usize {
        self.state.lock().outstanding_buffers.len()
    }

    pub fn spawn_thread(&self, name: &str) -> SimulatedThread {
        let mut state = self.state.lock();
        state.threads.push(ThreadRecord {
            name: name.to_string(),
            suspended: false,
            refuses_suspension: false,
        });
        SimulatedThread(state.threads.len() - 1)
    }

    pub fn set_current_thread(&self, thread: SimulatedThread) {
        let mut state = self.state.lock();
        assert!(thread.0 < state.threads.len(), "unknown thread {thread:?}");
        state.current_thread = thread.0;
    }

    /// Make `suspend_thread` fail for this thread.
    pub fn refuse_suspension(&self, thread: SimulatedThread) {
        self.state.lock().threads[thread.0].refuses_suspension = true;
    }

    pub fn is_suspended(&self, thread: SimulatedThread) -> bool {
        self.state.lock().threads[thread.0].suspended
    }

    pub fn suspended_count(&self) -> usize {
        self.state.lock().suspended_count()
    }

    pub fn fail_next_traversal(&self, err: ServiceError) {
        self.state.lock().failures.traversal = Some(err);
    }

    pub fn fail_next_iteration(&self, err: ServiceError) {
        self.state.lock().failures.iteration = Some(err);
    }

    pub fn fail_next_lookup(&self, err: ServiceError) {
        self.state.lock().failures.lookup = Some(err);
    }

    pub fn fail_next_deallocate(&self, err: ServiceError) {
        self.state.lock().failures.deallocate = Some(err);
    }

    pub fn fail_next_thread_enumeration(&self, err: ServiceError) {
        self.state.lock().failures.thread_enumeration = Some(err);
    }
}

impl HeapIntrospection for SimulatedHeap {
    type Object = ObjectId;
    type Buffer = SimulatedBuffer;

    fn get_tag(&self, object: ObjectId) -> Result<i64, ServiceError> {
        Ok(self.state.lock().object(object)?.tag)
    }

    fn set_tag(&self, object: ObjectId, tag: i64) -> Result<(), ServiceError> {
        self.state.lock().object_mut(object)?.tag = tag;
        Ok(())
    }

    fn follow_references(
        &self,
        start: Option<ObjectId>,
        callback: &mut EdgeCallback<'_>,
    ) -> Result<(), ServiceError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.stats.traversals += 1;
        state.stats.suspended_during_last_traversal = state.suspended_count();
        if let Some(err) = state.failures.traversal.take() {
            return Err(err);
        }

        let mut expanded = vec![false; state.objects.len()];
        let mut queue = VecDeque::new();

        match start {
            Some(object) => {
                state.object(object)?;
                expanded[object.0] = true;
                queue.push_back(object);
            }
            None => {
                for &(kind, target) in &state.roots {
                    let referent = &mut state.objects[target.0];
                    let mut visit = EdgeVisit {
                        kind,
                        referrer_tag: None,
                        class_id: referent.class_id,
                        size: referent.size,
                        tag: &mut referent.tag,
                    };
                    state.stats.edges_reported += 1;
                    match callback(&mut visit) {
                        VisitControl::Visit if !expanded[target.0] => {
                            expanded[target.0] = true;
                            queue.push_back(target);
                        }
                        VisitControl::Abort => return Ok(()),
                        _ => {}
                    }
                }
            }
        }

        while let Some(referrer) = queue.pop_front() {
            let references = state.objects[referrer.0].references.clone();
            for (kind, target) in references {
                // Re-read per edge: a self reference may have retagged it.
                let referrer_tag = state.objects[referrer.0].tag;
                let referent = &mut state.objects[target.0];
                let mut visit = EdgeVisit {
                    kind,
                    referrer_tag: Some(referrer_tag),
                    class_id: referent.class_id,
                    size: referent.size,
                    tag: &mut referent.tag,
                };
                state.stats.edges_reported += 1;
                match callback(&mut visit) {
                    VisitControl::Visit if !expanded[target.0] => {
                        expanded[target.0] = true;
                        queue.push_back(target);
                    }
                    VisitControl::Abort => return Ok(()),
                    _ => {}
                }
            }
        }

        Ok(())
    }

    fn iterate_heap(
        &self,
        filter: HeapFilter,
        callback: &mut ObjectCallback<'_>,
    ) -> Result<(), ServiceError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.stats.iterations += 1;
        if let Some(err) = state.failures.iteration.take() {
            return Err(err);
        }

        for object in state.objects.iter_mut() {
            if !filter.accepts(object.tag) {
                continue;
            }

            state.stats.objects_reported += 1;
            let mut visit = ObjectVisit {
                class_id: object.class_id,
                size: object.size,
                tag: &mut object.tag,
            };
            if callback(&mut visit) == IterationControl::Abort {
                break;
            }
        }

        Ok(())
    }

    fn get_objects_with_tags(&self, tags: &[i64]) -> Result<SimulatedBuffer, ServiceError> {
        let mut state = self.state.lock();
        if let Some(err) = state.failures.lookup.take() {
            return Err(err);
        }

        let wanted: HashSet<i64> = tags.iter().copied().collect();
        let entries = state
            .objects
            .iter()
            .enumerate()
            .filter(|(_, object)| wanted.contains(&object.tag))
            .map(|(index, object)| (ObjectId(index), object.tag))
            .collect();

        let id = state.next_buffer;
        state.next_buffer += 1;
        state.outstanding_buffers.insert(id);
        state.stats.buffers_allocated += 1;

        Ok(SimulatedBuffer { id, entries })
    }

    fn deallocate(&self, buffer: SimulatedBuffer) -> Result<(), ServiceError> {
        let mut state = self.state.lock();
        if let Some(err) = state.failures.deallocate.take() {
            return Err(err);
        }
        if !state.outstanding_buffers.remove(&buffer.id) {
            return Err(ServiceError::IllegalArgument);
        }

        state.stats.buffers_deallocated += 1;
        Ok(())
    }
}

impl ThreadControl for SimulatedHeap {
    type Thread = SimulatedThread;

    fn all_threads(&self) -> Result<Vec<SimulatedThread>, ServiceError> {
        let mut state = self.state.lock();
        if let Some(err) = state.failures.thread_enumeration.take() {
            return Err(err);
        }
        Ok((0..state.threads.len()).map(SimulatedThread).collect())
    }

    fn current_thread(&self) -> Result<SimulatedThread, ServiceError> {
        Ok(SimulatedThread(self.state.lock().current_thread))
    }

    fn thread_name(&self, thread: &SimulatedThread) -> Result<String, ServiceError> {
        Ok(self.state.lock().thread_mut(*thread)?.name.clone())
    }

    fn suspend_thread(&self, thread: &SimulatedThread) -> Result<(), ServiceError> {
        let mut state = self.state.lock();
        let record = state.thread_mut(*thread)?;
        if record.refuses_suspension {
            return Err(ServiceError::ThreadNotAlive);
        }
        if record.suspended {
            return Err(ServiceError::ThreadSuspended);
        }

        record.suspended = true;
        state.stats.suspends += 1;
        Ok(())
    }

    fn resume_thread(&self, thread: &SimulatedThread) -> Result<(), ServiceError> {
        let mut state = self.state.lock();
        let record = state.thread_mut(*thread)?;
        if !record.suspended {
            return Err(ServiceError::ThreadNotSuspended);
        }

        record.suspended = false;
        state.stats.resumes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_edges(heap: &SimulatedHeap, start: Option<ObjectId>) -> Vec<(Option<i64>, i64)> {
        let mut edges = Vec::new();
        heap.follow_references(start, &mut |visit| {
            edges.push((visit.referrer_tag, visit.size));
            VisitControl::Visit
        })
        .unwrap();
        edges
    }

    #[test]
    fn traversal_reports_roots_then_expands_once() {
        let heap = SimulatedHeap::new();
        let root = heap.allocate(1, 10);
        let shared = heap.allocate(1, 20);
        heap.add_reference(root, shared);
        heap.add_reference(root, shared);
        heap.add_reference(shared, root);
        heap.add_root(ReferenceKind::JniGlobal, root);

        let edges = collect_edges(&heap, None);
        // root edge, two edges to shared, one edge back
        assert_eq!(edges.len(), 4);
        assert_eq!(edges[0], (None, 10));
        assert_eq!(heap.stats().edges_reported, 4);
    }

    #[test]
    fn skipped_referents_are_not_expanded() {
        let heap = SimulatedHeap::new();
        let root = heap.allocate(1, 10);
        let blocked = heap.allocate(1, 20);
        let hidden = heap.allocate(1, 30);
        heap.add_reference(root, blocked);
        heap.add_reference(blocked, hidden);
        heap.add_root(ReferenceKind::StackLocal, root);

        let mut sizes = Vec::new();
        heap.follow_references(None, &mut |visit| {
            sizes.push(visit.size);
            if visit.size == 20 {
                VisitControl::Skip
            } else {
                VisitControl::Visit
            }
        })
        .unwrap();

        assert_eq!(sizes, vec![10, 20]);
    }

    #[test]
    fn start_object_traversal_ignores_roots() {
        let heap = SimulatedHeap::new();
        let root = heap.allocate(1, 10);
        let start = heap.allocate(1, 20);
        let child = heap.allocate(1, 30);
        heap.add_root(ReferenceKind::StackLocal, root);
        heap.add_reference(start, child);

        let edges = collect_edges(&heap, Some(start));
        assert_eq!(edges, vec![(Some(0), 30)]);
    }

    #[test]
    fn abort_stops_traversal() {
        let heap = SimulatedHeap::new();
        let a = heap.allocate(1, 10);
        let b = heap.allocate(1, 10);
        heap.add_root(ReferenceKind::StackLocal, a);
        heap.add_root(ReferenceKind::StackLocal, b);

        let mut calls = 0;
        heap.follow_references(None, &mut |_| {
            calls += 1;
            VisitControl::Abort
        })
        .unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn iteration_honours_filter() {
        let heap = SimulatedHeap::new();
        let a = heap.allocate(1, 10);
        let _b = heap.allocate(1, 20);
        heap.set_tag(a, 9).unwrap();

        let mut seen = Vec::new();
        heap.iterate_heap(HeapFilter::TaggedOnly, &mut |visit| {
            seen.push(visit.size);
            IterationControl::Continue
        })
        .unwrap();
        assert_eq!(seen, vec![10]);

        seen.clear();
        heap.iterate_heap(HeapFilter::UntaggedOnly, &mut |visit| {
            seen.push(visit.size);
            IterationControl::Continue
        })
        .unwrap();
        assert_eq!(seen, vec![20]);
    }

    #[test]
    fn injected_failures_fire_once() {
        let heap = SimulatedHeap::new();
        heap.fail_next_iteration(ServiceError::Internal);

        let result = heap.iterate_heap(HeapFilter::All, &mut |_| IterationControl::Continue);
        assert_eq!(result, Err(ServiceError::Internal));
        assert!(heap
            .iterate_heap(HeapFilter::All, &mut |_| IterationControl::Continue)
            .is_ok());
    }

    #[test]
    fn buffers_must_be_returned_once() {
        let heap = SimulatedHeap::new();
        let buffer = heap.get_objects_with_tags(&[1]).unwrap();
        assert_eq!(heap.outstanding_buffers(), 1);
        heap.deallocate(buffer).unwrap();
        assert_eq!(heap.outstanding_buffers(), 0);

        let forged = SimulatedBuffer {
            id: 99,
            entries: Vec::new(),
        };
        assert_eq!(heap.deallocate(forged), Err(ServiceError::IllegalArgument));
    }

    #[test]
    fn thread_suspension_state_machine() {
        let heap = SimulatedHeap::new();
        let worker = heap.spawn_thread("worker");

        heap.suspend_thread(&worker).unwrap();
        assert!(heap.is_suspended(worker));
        assert_eq!(heap.suspend_thread(&worker), Err(ServiceError::ThreadSuspended));

        heap.resume_thread(&worker).unwrap();
        assert_eq!(heap.resume_thread(&worker), Err(ServiceError::ThreadNotSuspended));

        heap.refuse_suspension(worker);
        assert_eq!(heap.suspend_thread(&worker), Err(ServiceError::ThreadNotAlive));
        assert_eq!(heap.thread_name(&worker).unwrap(), "worker");
        assert_eq!(heap.all_threads().unwrap().len(), 2);
    }
}

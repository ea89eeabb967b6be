// Collaborator interfaces.
//
// The heap introspection service is split in two traits: heap access and
// thread control. `crate::simulated::SimulatedHeap` implements both.

pub mod heap;
pub mod threading;

pub use heap::{
    EdgeCallback, EdgeVisit, HeapFilter, HeapIntrospection, IterationControl, ObjectCallback,
    ObjectVisit, ReferenceKind, VisitControl,
};
pub use threading::ThreadControl;

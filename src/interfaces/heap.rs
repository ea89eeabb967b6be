// Heap introspection interface.
//
// The engine never touches the managed heap directly. Everything it needs
// (per-object tag slots, reference traversal from roots, whole-heap
// iteration and lookup by tag) goes through the HeapIntrospection trait so
// the same algorithm can run over a live VM or over SimulatedHeap in tests.

use std::fmt::Debug;
use std::hash::Hash;

use crate::error::ServiceError;

/// Kind of a reported heap reference.
///
/// Root kinds are reported with no referrer; every other kind links two
/// heap objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Class,
    Field,
    ArrayElement,
    ClassLoader,
    Signers,
    ProtectionDomain,
    Interface,
    StaticField,
    ConstantPool,
    Superclass,
    JniGlobal,
    SystemClass,
    Monitor,
    StackLocal,
    JniLocal,
    Thread,
    Other,
}

impl ReferenceKind {
    pub fn is_root(&self) -> bool {
        matches!(
            self,
            ReferenceKind::JniGlobal
                | ReferenceKind::SystemClass
                | ReferenceKind::Monitor
                | ReferenceKind::StackLocal
                | ReferenceKind::JniLocal
                | ReferenceKind::Thread
                | ReferenceKind::Other
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            ReferenceKind::Class => "Reference from an object to its class.",
            ReferenceKind::Field => {
                "Reference from an object to the value of one of its instance fields."
            }
            ReferenceKind::ArrayElement => "Reference from an array to one of its elements.",
            ReferenceKind::ClassLoader => "Reference from a class to its class loader.",
            ReferenceKind::Signers => "Reference from a class to its signers array.",
            ReferenceKind::ProtectionDomain => "Reference from a class to its protection domain.",
            ReferenceKind::Interface => "Reference from a class to one of its interfaces.",
            ReferenceKind::StaticField => {
                "Reference from a class to the value of one of its static fields."
            }
            ReferenceKind::ConstantPool => {
                "Reference from a class to a resolved entry in the constant pool."
            }
            ReferenceKind::Superclass => "Reference from a class to its superclass.",
            ReferenceKind::JniGlobal => "Heap root reference: JNI global reference.",
            ReferenceKind::SystemClass => "Heap root reference: System class.",
            ReferenceKind::Monitor => "Heap root reference: monitor.",
            ReferenceKind::StackLocal => "Heap root reference: local variable on the stack.",
            ReferenceKind::JniLocal => "Heap root reference: JNI local reference.",
            ReferenceKind::Thread => "Heap root reference: Thread.",
            ReferenceKind::Other => "Heap root reference: other heap root reference.",
        }
    }
}

/// Which objects a heap iteration reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapFilter {
    All,
    TaggedOnly,
    UntaggedOnly,
}

impl HeapFilter {
    pub fn accepts(&self, tag: i64) -> bool {
        match self {
            HeapFilter::All => true,
            HeapFilter::TaggedOnly => tag != 0,
            HeapFilter::UntaggedOnly => tag == 0,
        }
    }
}

/// Decision returned from a reference callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitControl {
    /// Report the referent's own references too (at most once per referent).
    Visit,
    /// Do not expand the referent from this edge.
    Skip,
    /// Stop the whole traversal.
    Abort,
}

/// Decision returned from a heap iteration callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationControl {
    Continue,
    Abort,
}

/// One reported edge. `tag` is the referent's slot and may be rewritten in
/// place.
#[derive(Debug)]
pub struct EdgeVisit<'a> {
    pub kind: ReferenceKind,
    /// Tag of the referrer, `None` for root references.
    pub referrer_tag: Option<i64>,
    pub class_id: i64,
    pub size: i64,
    pub tag: &'a mut i64,
}

/// One reported heap object. `tag` may be rewritten in place.
#[derive(Debug)]
pub struct ObjectVisit<'a> {
    pub class_id: i64,
    pub size: i64,
    pub tag: &'a mut i64,
}

pub type EdgeCallback<'a> = dyn FnMut(&mut EdgeVisit<'_>) -> VisitControl + 'a;
pub type ObjectCallback<'a> = dyn FnMut(&mut ObjectVisit<'_>) -> IterationControl + 'a;

/// Heap introspection service contract.
///
/// Methods take `&self`: a service is a shared environment handle and the
/// tag slots it exposes live in the heap, not in the handle.
pub trait HeapIntrospection {
    type Object: Copy + Eq + Hash + Debug;
    /// Service-owned storage returned by `get_objects_with_tags`. It must be
    /// handed back through `deallocate`.
    type Buffer: AsRef<[(Self::Object, i64)]>;

    fn get_tag(&self, object: Self::Object) -> Result<i64, ServiceError>;

    fn set_tag(&self, object: Self::Object, tag: i64) -> Result<(), ServiceError>;

    /// Report reachable references. With `start == None` every root edge is
    /// reported first; with `Some(object)` only references out of `object`
    /// are seeded. A referent is expanded at most once per call and only
    /// if some callback for an edge to it returned [`VisitControl::Visit`].
    fn follow_references(
        &self,
        start: Option<Self::Object>,
        callback: &mut EdgeCallback<'_>,
    ) -> Result<(), ServiceError>;

    fn iterate_heap(
        &self,
        filter: HeapFilter,
        callback: &mut ObjectCallback<'_>,
    ) -> Result<(), ServiceError>;

    fn get_objects_with_tags(&self, tags: &[i64]) -> Result<Self::Buffer, ServiceError>;

    fn deallocate(&self, buffer: Self::Buffer) -> Result<(), ServiceError>;
}

// Thread control interface.
//
// The engine needs a quiescent heap for the whole computation. It gets one
// by suspending every other thread of the host process through this trait
// and resuming them when the computation ends.

use std::fmt::Debug;

use crate::error::ServiceError;

/// Thread enumeration and suspension half of the introspection service.
pub trait ThreadControl {
    type Thread: Clone + Debug;

    fn all_threads(&self) -> Result<Vec<Self::Thread>, ServiceError>;

    fn current_thread(&self) -> Result<Self::Thread, ServiceError>;

    /// Identity used to recognise the calling thread among `all_threads`.
    fn thread_name(&self, thread: &Self::Thread) -> Result<String, ServiceError>;

    fn suspend_thread(&self, thread: &Self::Thread) -> Result<(), ServiceError>;

    fn resume_thread(&self, thread: &Self::Thread) -> Result<(), ServiceError>;
}

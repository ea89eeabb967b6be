use crate::error::ServiceError;
use crate::interfaces::ThreadControl;

/// Suspends every other thread for as long as it lives.
///
/// Only threads that were actually suspended are recorded, and each of
/// them is resumed exactly once on drop, whatever path leaves the guarded
/// scope.
pub struct ThreadSuspension<'a, T: ThreadControl + ?Sized> {
    control: &'a T,
    suspended: Vec<T::Thread>,
}

impl<'a, T: ThreadControl + ?Sized> ThreadSuspension<'a, T> {
    /// Suspend all threads except the calling one. Enumeration failures are
    /// logged and leave whatever was already suspended recorded.
    pub fn new(control: &'a T) -> Self {
        let mut suspension = Self::disabled(control);
        if let Err(err) = suspension.suspend_others() {
            log::error!("ERROR: service: {}({}): failed to suspend threads", err.code(), err);
        }
        log::debug!("suspended {} threads", suspension.suspended.len());
        suspension
    }

    /// A guard that suspends nothing.
    pub fn disabled(control: &'a T) -> Self {
        Self {
            control,
            suspended: Vec::new(),
        }
    }

    fn suspend_others(&mut self) -> Result<(), ServiceError> {
        let threads = self.control.all_threads()?;
        let current = self.control.current_thread()?;
        let current_name = self.control.thread_name(&current)?;

        for thread in threads {
            if self.control.thread_name(&thread)? == current_name {
                continue;
            }

            match self.control.suspend_thread(&thread) {
                Ok(()) => self.suspended.push(thread),
                Err(err) => log::warn!("could not suspend {thread:?}: {err}"),
            }
        }

        Ok(())
    }

    pub fn suspended(&self) -> &[T::Thread] {
        &self.suspended
    }
}

impl<T: ThreadControl + ?Sized> Drop for ThreadSuspension<'_, T> {
    fn drop(&mut self) {
        for thread in self.suspended.drain(..) {
            if let Err(err) = self.control.resume_thread(&thread) {
                log::error!("ERROR: service: {}({}): failed to resume {thread:?}", err.code(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedHeap;

    #[test]
    fn suspends_everyone_but_the_caller() {
        let heap = SimulatedHeap::new();
        let a = heap.spawn_thread("a");
        let b = heap.spawn_thread("b");

        {
            let guard = ThreadSuspension::new(&heap);
            assert_eq!(guard.suspended(), &[a, b]);
            assert!(heap.is_suspended(a));
            assert!(heap.is_suspended(b));
            assert_eq!(heap.suspended_count(), 2);
        }

        assert_eq!(heap.suspended_count(), 0);
        assert_eq!(heap.stats().resumes, 2);
    }

    #[test]
    fn refusing_threads_are_not_recorded() {
        let heap = SimulatedHeap::new();
        let stubborn = heap.spawn_thread("stubborn");
        let polite = heap.spawn_thread("polite");
        heap.refuse_suspension(stubborn);

        let guard = ThreadSuspension::new(&heap);
        assert_eq!(guard.suspended(), &[polite]);
        drop(guard);

        assert_eq!(heap.stats().resumes, 1);
    }

    #[test]
    fn enumeration_failure_suspends_nothing() {
        let heap = SimulatedHeap::new();
        heap.spawn_thread("worker");
        heap.fail_next_thread_enumeration(ServiceError::OutOfMemory);

        let guard = ThreadSuspension::new(&heap);
        assert!(guard.suspended().is_empty());
        assert_eq!(heap.suspended_count(), 0);
    }

    #[test]
    fn current_thread_is_found_by_name() {
        let heap = SimulatedHeap::new();
        let main = heap.spawn_thread("analysis");
        heap.set_current_thread(main);

        let guard = ThreadSuspension::new(&heap);
        assert_eq!(guard.suspended().len(), 1, "only the first main thread");
        assert!(!heap.is_suspended(main));
    }

    #[test]
    fn resumes_on_unwind() {
        let heap = SimulatedHeap::new();
        let worker = heap.spawn_thread("worker");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = ThreadSuspension::new(&heap);
            assert!(heap.is_suspended(worker));
            panic!("computation failed");
        }));

        assert!(result.is_err());
        assert!(!heap.is_suspended(worker));
    }
}

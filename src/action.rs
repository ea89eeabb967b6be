//! Top-level entry points.
//!
//! An action owns one [`SizesConfig`] and runs each computation inside an
//! [`ExecutionGuard`]: other threads stay suspended and the deadline runs
//! for the whole computation, including cleanup after a failure.

use std::collections::HashSet;

use crate::config::SizesConfig;
use crate::error::{report_error, SizesResult};
use crate::execution::{CancellationToken, ExecutionGuard};
use crate::interfaces::{HeapIntrospection, ThreadControl};
use crate::resolver;
use crate::traversal::{RetainedSizeReport, TraversalDriver};

/// Retained size computation bound to one introspection service.
///
/// # Examples
///
/// ```
/// use retained_size::interfaces::ReferenceKind;
/// use retained_size::simulated::SimulatedHeap;
/// use retained_size::{RetainedSizeAction, SizesConfig};
///
/// let heap = SimulatedHeap::new();
/// let root = heap.allocate(1, 16);
/// let list = heap.allocate(2, 24);
/// let node = heap.allocate(3, 40);
/// heap.add_root(ReferenceKind::StackLocal, root);
/// heap.add_reference(root, list);
/// heap.add_reference(list, node);
///
/// let action = RetainedSizeAction::new(&heap, SizesConfig::default());
/// let report = action.compute(list).unwrap();
/// assert_eq!(report.retained_size, 64);
/// assert_eq!(report.held_objects, vec![node]);
///
/// action.clean_heap_tags().unwrap();
/// assert!(heap.tagged_objects().is_empty());
/// ```
pub struct RetainedSizeAction<'a, S: ?Sized> {
    service: &'a S,
    config: SizesConfig,
}

impl<'a, S> RetainedSizeAction<'a, S>
where
    S: HeapIntrospection + ThreadControl + ?Sized,
{
    pub fn new(service: &'a S, config: SizesConfig) -> Self {
        Self { service, config }
    }

    pub fn config(&self) -> &SizesConfig {
        &self.config
    }

    /// Retained size of `object` and the objects only it keeps alive, under
    /// the configured timeout.
    pub fn compute(&self, object: S::Object) -> SizesResult<RetainedSizeReport<S::Object>> {
        self.compute_with_token(object, CancellationToken::with_timeout(self.config.timeout))
    }

    /// Like [`compute`](Self::compute), stopping when `token` does. Keep a
    /// clone of the token to cancel from another thread.
    pub fn compute_with_token(
        &self,
        object: S::Object,
        token: CancellationToken,
    ) -> SizesResult<RetainedSizeReport<S::Object>> {
        let guard = ExecutionGuard::with_token(self.service, token, self.config.suspend_threads);
        let mut driver = TraversalDriver::new(self.service, guard.token());

        let result = driver.run(object);
        match &result {
            Ok(report) => log::debug!(
                "retained size {} with {} held objects",
                report.retained_size,
                report.held_objects.len()
            ),
            Err(err) => {
                report_error(err, "could not estimate retained size");
                if let Err(cleanup) = driver.abandon() {
                    report_error(&cleanup, "could not remove tags after failure");
                }
            }
        }

        result
    }

    /// Reset every tag in the heap to zero. Safe to call at any time and
    /// any number of times.
    pub fn clean_heap_tags(&self) -> SizesResult<()> {
        clean_heap_tags(self.service)
    }
}

/// One-shot form of [`RetainedSizeAction::compute`] with a timeout in
/// milliseconds. Zero means the deadline has already passed.
pub fn compute_retained_size_and_held_objects<S>(
    service: &S,
    object: S::Object,
    timeout_millis: u64,
) -> SizesResult<RetainedSizeReport<S::Object>>
where
    S: HeapIntrospection + ThreadControl + ?Sized,
{
    RetainedSizeAction::new(service, SizesConfig::with_timeout_millis(timeout_millis))
        .compute(object)
}

pub fn clean_heap_tags<H>(heap: &H) -> SizesResult<()>
where
    H: HeapIntrospection + ?Sized,
{
    let cleared = resolver::purge_tags_except(heap, &HashSet::new(), &mut |_| {})
        .inspect_err(|err| report_error(err, "could not clean heap tags"))?;
    log::debug!("cleaned {cleared} heap tags");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ServiceError, SizesError};
    use crate::interfaces::ReferenceKind;
    use crate::simulated::SimulatedHeap;

    #[test]
    fn service_failure_leaves_no_tags_behind() {
        let heap = SimulatedHeap::new();
        let root = heap.allocate(1, 8);
        let start = heap.allocate(1, 8);
        let child = heap.allocate(1, 8);
        heap.add_root(ReferenceKind::StackLocal, root);
        heap.add_reference(root, start);
        heap.add_reference(start, child);
        heap.fail_next_iteration(ServiceError::OutOfMemory);

        let action = RetainedSizeAction::new(&heap, SizesConfig::default());
        assert_eq!(
            action.compute(start),
            Err(SizesError::Service(ServiceError::OutOfMemory))
        );
        assert!(heap.tagged_objects().is_empty());
    }

    #[test]
    fn cancelled_token_reports_interruption() {
        let heap = SimulatedHeap::new();
        let root = heap.allocate(1, 8);
        heap.add_root(ReferenceKind::StackLocal, root);

        let token = CancellationToken::unbounded();
        token.cancel();
        let action = RetainedSizeAction::new(&heap, SizesConfig::default());
        assert_eq!(
            action.compute_with_token(root, token),
            Err(SizesError::Interrupted)
        );
    }

    #[test]
    fn clean_heap_tags_reports_service_errors() {
        let heap = SimulatedHeap::new();
        heap.fail_next_iteration(ServiceError::NotAvailable);
        assert_eq!(
            clean_heap_tags(&heap),
            Err(SizesError::Service(ServiceError::NotAvailable))
        );
    }
}

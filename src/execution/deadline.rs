//! Deadline-based cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{SizesError, SizesResult};

/// "Finish by" instant plus an external cancel flag.
///
/// Traversal callbacks poll [`should_stop`](Self::should_stop) once per
/// reported edge or object, so the worst-case overrun is the cost of one
/// callback. Clones share the cancel flag.
///
/// # Examples
///
/// ```
/// use retained_size::execution::CancellationToken;
/// use retained_size::SizesError;
/// use std::time::Duration;
///
/// let token = CancellationToken::with_timeout(Duration::from_secs(60));
/// assert!(token.check().is_ok());
///
/// let remote = token.clone();
/// remote.cancel();
/// assert_eq!(token.check(), Err(SizesError::Interrupted));
///
/// let expired = CancellationToken::with_timeout(Duration::ZERO);
/// assert_eq!(expired.check(), Err(SizesError::Timeout));
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    finish_by: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token whose deadline is `timeout` from now. A timeout too large to
    /// represent means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            finish_by: Instant::now().checked_add(timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_deadline(finish_by: Instant) -> Self {
        Self {
            finish_by: Some(finish_by),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A token that only stops on [`cancel`](Self::cancel).
    pub fn unbounded() -> Self {
        Self {
            finish_by: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_expired(&self) -> bool {
        self.finish_by
            .is_some_and(|finish_by| Instant::now() >= finish_by)
    }

    pub fn should_stop(&self) -> bool {
        self.is_cancelled() || self.is_expired()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.finish_by
            .map(|finish_by| finish_by.saturating_duration_since(Instant::now()))
    }

    /// `Err` with the reason to stop, if any. An external cancel wins over
    /// an expired deadline.
    pub fn check(&self) -> SizesResult<()> {
        if self.is_cancelled() {
            Err(SizesError::Interrupted)
        } else if self.is_expired() {
            Err(SizesError::Timeout)
        } else {
            Ok(())
        }
    }
}

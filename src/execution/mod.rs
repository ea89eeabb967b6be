//! Execution guard: a deadline plus a stopped world.
//!
//! The retained size computation is only meaningful over a heap that does
//! not change underneath it, and it must give up cleanly when it runs too
//! long. [`ExecutionGuard`] bundles both concerns for the length of one
//! operation: it suspends every other thread on construction, resumes them
//! on drop, and carries the [`CancellationToken`] that every traversal
//! callback polls.

pub mod deadline;
pub mod suspension;

pub use deadline::CancellationToken;
pub use suspension::ThreadSuspension;

use crate::config::SizesConfig;
use crate::interfaces::ThreadControl;

pub struct ExecutionGuard<'a, T: ThreadControl + ?Sized> {
    token: CancellationToken,
    suspension: ThreadSuspension<'a, T>,
}

impl<'a, T: ThreadControl + ?Sized> ExecutionGuard<'a, T> {
    /// Start the deadline described by `config` and stop the world.
    pub fn new(control: &'a T, config: &SizesConfig) -> Self {
        Self::with_token(
            control,
            CancellationToken::with_timeout(config.timeout),
            config.suspend_threads,
        )
    }

    pub fn with_token(control: &'a T, token: CancellationToken, suspend_threads: bool) -> Self {
        let suspension = if suspend_threads {
            ThreadSuspension::new(control)
        } else {
            log::debug!("running without thread suspension");
            ThreadSuspension::disabled(control)
        };

        Self { token, suspension }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn suspended_threads(&self) -> &[T::Thread] {
        self.suspension.suspended()
    }
}
